mod common;

use erddap_ingest::classify::{classify, classify_checked};
use erddap_ingest::das::{GLOBAL_SECTION, parse_das};
use erddap_ingest::error::IngestError;

use assert_matches::assert_matches;
use common::{BUOY_DAS, NO_GEOMETRY_DAS};

const EXAMPLE: &str = "Attributes {
  NC_GLOBAL {
    String license \"Public Domain\";
  }
  time {
    Float64 actual_range 0.0, 604800.0;
  }
  latitude {
  }
  longitude {
  }
}
";

#[test]
fn reserialized_document_parses_to_the_same_attributes() {
    for text in [BUOY_DAS, NO_GEOMETRY_DAS, EXAMPLE] {
        let doc = parse_das(text);
        let again = parse_das(&doc.to_das_text());
        assert_eq!(doc, again);
    }
}

#[test]
fn multiline_global_value_is_joined() {
    let doc = parse_das(BUOY_DAS);
    let summary = doc.attribute(GLOBAL_SECTION, "summary").unwrap();
    assert_eq!(summary.datatype, "String");
    assert_eq!(summary.value, "Hourly observations.\nCollected at the surface.");
    assert_eq!(
        doc.attribute(GLOBAL_SECTION, "institution").unwrap().value,
        "GCOOS"
    );
}

#[test]
fn example_document_classifies_with_geometry_and_time() {
    let result = classify(&parse_das(EXAMPLE), false);
    assert!(result.has_latitude);
    assert!(result.has_longitude);
    assert_eq!(result.time_attribute.as_deref(), Some("time"));
}

#[test]
fn missing_geometry_is_an_error() {
    let err = classify_checked("nogeo", &parse_das(NO_GEOMETRY_DAS), false).unwrap_err();
    assert_matches!(err, IngestError::GeometryMissing(id) if id == "nogeo");
}

#[test]
fn cache_json_round_trip() {
    let doc = parse_das(BUOY_DAS);
    let json = serde_json::to_string(&doc).unwrap();
    assert!(json.starts_with("{\"s\":{}"));
    let back: erddap_ingest::das::DasDocument = serde_json::from_str(&json).unwrap();
    assert_eq!(back, doc);
}
