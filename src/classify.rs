use serde::Serialize;
use tracing::debug;

use crate::das::{DasDocument, DasSection, GLOBAL_SECTION};
use crate::error::IngestError;

pub const TIME_ALIASES: &[&str] = &["datecollec", "date_gmt"];
pub const EPOCH_SECONDS_UNITS: &str = "seconds since 1970-01-01T00:00:00Z";

const QC_SUFFIXES: &[&str] = &[
    "_qc", "_clm", "_loc", "_flt", "_rct", "_agg", "_rng", "_gap", "_spk",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Requestable variables in document order. The time variable is not part of
    /// this list; the URL builder places it itself.
    pub variables: Vec<String>,
    pub has_latitude: bool,
    pub has_longitude: bool,
    pub time_attribute: Option<String>,
}

impl Classification {
    pub fn has_geometry(&self) -> bool {
        self.has_latitude || self.has_longitude
    }
}

pub fn classify(doc: &DasDocument, include_all: bool) -> Classification {
    let mut result = Classification::default();
    let mut alias_time = None;
    let mut ioos_time = None;

    for (name, attrs) in doc.sections() {
        if name == GLOBAL_SECTION || name.chars().count() <= 1 {
            continue;
        }

        match name.as_str() {
            "latitude" => {
                result.has_latitude = true;
                result.variables.push(name.clone());
                continue;
            }
            "longitude" => {
                result.has_longitude = true;
                result.variables.push(name.clone());
                continue;
            }
            "time" => {
                result.time_attribute = Some(name.clone());
                continue;
            }
            _ => {}
        }

        if TIME_ALIASES.contains(&name.as_str()) {
            alias_time.get_or_insert_with(|| name.clone());
        } else if is_epoch_time(attrs) {
            ioos_time.get_or_insert_with(|| name.clone());
        }

        if include_all || is_data_variable(name, attrs) {
            result.variables.push(name.clone());
        } else {
            debug!(variable = %name, "skipping non-data variable");
        }
    }

    if result.time_attribute.is_none() {
        result.time_attribute = alias_time.or(ioos_time);
    }
    if let Some(time) = &result.time_attribute {
        result.variables.retain(|name| name != time);
    }

    result
}

/// Like [`classify`] but rejects documents with neither latitude nor longitude.
pub fn classify_checked(
    dataset_id: &str,
    doc: &DasDocument,
    include_all: bool,
) -> Result<Classification, IngestError> {
    let result = classify(doc, include_all);
    if !result.has_geometry() {
        return Err(IngestError::GeometryMissing(dataset_id.to_string()));
    }
    Ok(result)
}

fn is_epoch_time(attrs: &DasSection) -> bool {
    let ioos_category = attrs.get("ioos_category").map(|attr| attr.value.as_str());
    let units = attrs.get("units").map(|attr| attr.value.as_str());
    ioos_category == Some("Time") && units == Some(EPOCH_SECONDS_UNITS)
}

pub fn is_quality_control(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    QC_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
        || lower.contains("_qc_")
        || lower.contains("qartod_")
}

fn is_data_variable(name: &str, attrs: &DasSection) -> bool {
    if is_quality_control(name) {
        return false;
    }
    let content_type = attrs
        .get("coverage_content_type")
        .map(|attr| attr.value.as_str());
    if matches!(content_type, Some("qualityInformation") | Some("other")) {
        return false;
    }
    attrs.contains_key("actual_range") || attrs.len() == 1
}
