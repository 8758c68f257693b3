//! Request URL construction for ERDDAP data endpoints.
//!
//! A constrained request looks like
//! `<endpoint><id>.csvp?time%2Cdepth%2Clongitude%2Clatitude%2Ctemp&time%3E%3D2024-01-01T00:00:00Z&time%3C%3D2024-01-08T00:00:00Z`.

use crate::domain::{Dataset, TimeWindow, format_erddap_time};

pub const ATTRIBUTE_SEPARATOR: &str = "%2C";
const GREATER_EQUAL: &str = "%3E%3D";
const LESS_EQUAL: &str = "%3C%3D";

const VERTICAL_NAMES: &[&str] = &["depth", "altitude"];

/// Orders attribute names the way data requests list them: the time variable (only
/// when a time constraint follows), vertical coordinates, longitude, latitude, then
/// everything else in discovery order. Duplicates are dropped.
pub fn order_attributes(variables: &[String], time_attribute: Option<&str>) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(variables.len() + 1);

    if let Some(time) = time_attribute {
        push_unique(&mut ordered, time);
    }
    for leading in VERTICAL_NAMES.iter().chain(["longitude", "latitude"].iter()) {
        if variables.iter().any(|name| name == leading) {
            push_unique(&mut ordered, leading);
        }
    }
    for name in variables {
        push_unique(&mut ordered, name);
    }
    ordered
}

fn push_unique(ordered: &mut Vec<String>, name: &str) {
    if !ordered.iter().any(|existing| existing == name) {
        ordered.push(name.to_string());
    }
}

fn time_constraints(time_attribute: &str, window: &TimeWindow) -> String {
    constraint_pair(
        time_attribute,
        &format_erddap_time(&window.start),
        &format_erddap_time(&window.end),
    )
}

fn constraint_pair(time_attribute: &str, start: &str, end: &str) -> String {
    format!(
        "&{time_attribute}{GREATER_EQUAL}{start}Z&{time_attribute}{LESS_EQUAL}{end}Z"
    )
}

/// One request URL. Without a time attribute or window the request is unconstrained
/// and the time variable is left out entirely.
pub fn build_request_url(
    dataset: &Dataset,
    variables: &[String],
    time_attribute: Option<&str>,
    window: Option<&TimeWindow>,
) -> String {
    let constrained = time_attribute.zip(window);
    let attrs = order_attributes(variables, constrained.map(|(time, _)| time));
    let mut url = format!(
        "{}{}.{}?{}",
        dataset.data_endpoint(),
        dataset.id,
        dataset.protocol.response_format(),
        attrs.join(ATTRIBUTE_SEPARATOR)
    );
    if let Some((time, window)) = constrained {
        url.push_str(&time_constraints(time, window));
    }
    url
}

/// One URL per window, or a single URL when `windows` is empty. A single-window
/// plan for the whole range is expressed by passing that one window.
pub fn build_request_urls(
    dataset: &Dataset,
    variables: &[String],
    time_attribute: Option<&str>,
    windows: &[TimeWindow],
) -> Vec<String> {
    if windows.is_empty() {
        return vec![build_request_url(dataset, variables, time_attribute, None)];
    }
    windows
        .iter()
        .map(|window| build_request_url(dataset, variables, time_attribute, Some(window)))
        .collect()
}

/// Replaces the `>=`/`<=` constraints on `time_attribute` in an existing request URL.
/// Other query parameters are kept as they are; a URL without time constraints gets
/// the pair appended.
pub fn rewrite_time_constraints(url: &str, time_attribute: &str, window: &TimeWindow) -> String {
    let (base, query) = url.split_once('?').unwrap_or((url, ""));
    let lower_prefix = format!("{time_attribute}{GREATER_EQUAL}");
    let upper_prefix = format!("{time_attribute}{LESS_EQUAL}");
    let start = format!("{}{}Z", lower_prefix, format_erddap_time(&window.start));
    let end = format!("{}{}Z", upper_prefix, format_erddap_time(&window.end));

    let mut seen_lower = false;
    let mut seen_upper = false;
    let mut params: Vec<String> = query
        .split('&')
        .filter(|param| !param.is_empty())
        .map(|param| {
            if param.starts_with(&lower_prefix) {
                seen_lower = true;
                start.clone()
            } else if param.starts_with(&upper_prefix) {
                seen_upper = true;
                end.clone()
            } else {
                param.to_string()
            }
        })
        .collect();
    if !seen_lower {
        params.push(start);
    }
    if !seen_upper {
        params.push(end);
    }
    format!("{base}?{}", params.join("&"))
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::domain::{DatasetId, ErddapServer, Protocol};

    fn dataset(protocol: Protocol) -> Dataset {
        let id: DatasetId = "gcoos_42G01".parse().unwrap();
        let server = ErddapServer::parse("https://erddap.gcoos.org/erddap").unwrap();
        Dataset::new(id, server, protocol)
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn window(start: i64, end: i64) -> TimeWindow {
        TimeWindow::new(
            DateTime::from_timestamp(start, 0).unwrap(),
            DateTime::from_timestamp(end, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn constrained_url_shape() {
        let url = build_request_url(
            &dataset(Protocol::Tabledap),
            &names(&["latitude", "longitude", "temp", "depth"]),
            Some("time"),
            Some(&window(0, 604_800)),
        );
        assert_eq!(
            url,
            "https://erddap.gcoos.org/erddap/tabledap/gcoos_42G01.csvp?time%2Cdepth%2Clongitude%2Clatitude%2Ctemp&time%3E%3D1970-01-01T00:00:00Z&time%3C%3D1970-01-08T00:00:00Z"
        );
    }

    #[test]
    fn unconstrained_url_omits_time() {
        let url = build_request_url(
            &dataset(Protocol::Griddap),
            &names(&["latitude", "longitude", "chlorophyll"]),
            Some("time"),
            None,
        );
        assert_eq!(
            url,
            "https://erddap.gcoos.org/erddap/griddap/gcoos_42G01.nc?longitude%2Clatitude%2Cchlorophyll"
        );
    }

    #[test]
    fn one_url_per_window() {
        let windows = vec![window(0, 10), window(10, 20), window(20, 30)];
        let urls = build_request_urls(
            &dataset(Protocol::Tabledap),
            &names(&["latitude"]),
            Some("time"),
            &windows,
        );
        assert_eq!(urls.len(), 3);
        assert!(urls[1].ends_with("time%3E%3D1970-01-01T00:00:10Z&time%3C%3D1970-01-01T00:00:20Z"));
    }

    #[test]
    fn rewrite_replaces_only_time_bounds() {
        let url = "https://e.org/erddap/tabledap/x.csvp?time%2Clatitude&time%3E%3D2020-01-01T00:00:00Z&time%3C%3D2020-02-01T00:00:00Z&station=%22A%22";
        let rewritten = rewrite_time_constraints(url, "time", &window(0, 86_400));
        assert_eq!(
            rewritten,
            "https://e.org/erddap/tabledap/x.csvp?time%2Clatitude&time%3E%3D1970-01-01T00:00:00Z&time%3C%3D1970-01-02T00:00:00Z&station=%22A%22"
        );
    }

    #[test]
    fn rewrite_appends_missing_bounds() {
        let url = "https://e.org/erddap/tabledap/x.csvp?time%2Clatitude";
        let rewritten = rewrite_time_constraints(url, "time", &window(0, 60));
        assert!(rewritten.ends_with(
            "?time%2Clatitude&time%3E%3D1970-01-01T00:00:00Z&time%3C%3D1970-01-01T00:01:00Z"
        ));
    }
}
