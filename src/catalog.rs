use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IngestError;

const ALL_DATASETS: &str = "allDatasets";

/// One row of an ERDDAP `info/index.json` or `search/*.json` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    table: Option<CatalogTable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogTable {
    #[serde(default)]
    column_names: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

pub fn parse_catalog(json: &str) -> Result<Vec<CatalogEntry>, IngestError> {
    let response: CatalogResponse =
        serde_json::from_str(json).map_err(|err| IngestError::CatalogFormat(err.to_string()))?;
    let table = response
        .table
        .ok_or_else(|| IngestError::CatalogFormat("missing table".to_string()))?;

    let column = |name: &str| table.column_names.iter().position(|col| col == name);
    let id_col = column("Dataset ID")
        .ok_or_else(|| IngestError::CatalogFormat("missing Dataset ID column".to_string()))?;
    let title_col = column("Title");
    let min_col = column("minTime");
    let max_col = column("maxTime");

    let entries = table
        .rows
        .iter()
        .filter_map(|row| {
            let dataset_id = cell_str(row, Some(id_col))?;
            if dataset_id == ALL_DATASETS {
                return None;
            }
            Some(CatalogEntry {
                dataset_id,
                title: cell_str(row, title_col),
                min_time: cell_str(row, min_col).and_then(|v| parse_time(&v)),
                max_time: cell_str(row, max_col).and_then(|v| parse_time(&v)),
            })
        })
        .collect();
    Ok(entries)
}

fn cell_str(row: &[Value], index: Option<usize>) -> Option<String> {
    match row.get(index?)? {
        Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .ok()
}
