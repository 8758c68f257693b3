//! Parser for the Dataset Attribute Structure text served at `<dataset>.das`.
//!
//! The grammar is brace-delimited and line oriented:
//!
//! ```text
//! Attributes {
//!  s {
//!   time {
//!     Float64 actual_range 0.0, 604800.0;
//!     String units "seconds since 1970-01-01T00:00:00Z";
//!   }
//!  }
//!  NC_GLOBAL {
//!     String summary "first line
//! second line";
//!  }
//! }
//! ```
//!
//! Sections never nest in the parsed document: opening a section replaces the
//! current one, so the wrapper `s { ... }` ends up as an empty section that the
//! classifier ignores.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const GLOBAL_SECTION: &str = "NC_GLOBAL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DasAttribute {
    pub datatype: String,
    pub value: String,
}

impl DasAttribute {
    pub fn new(datatype: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            datatype: datatype.into(),
            value: value.into(),
        }
    }

    pub fn is_string(&self) -> bool {
        self.datatype.eq_ignore_ascii_case("String")
    }
}

pub type DasSection = IndexMap<String, DasAttribute>;

/// Ordered mapping of section name to its attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DasDocument {
    sections: IndexMap<String, DasSection>,
}

impl DasDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn section(&self, name: &str) -> Option<&DasSection> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&String, &DasSection)> {
        self.sections.iter()
    }

    pub fn global(&self) -> Option<&DasSection> {
        self.section(GLOBAL_SECTION)
    }

    pub fn attribute(&self, section: &str, name: &str) -> Option<&DasAttribute> {
        self.section(section).and_then(|attrs| attrs.get(name))
    }

    pub fn insert(&mut self, section: &str, name: &str, attribute: DasAttribute) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(name.to_string(), attribute);
    }

    pub fn open_section(&mut self, name: &str) {
        self.sections.insert(name.to_string(), DasSection::new());
    }

    /// Renders the document back into DAS text that [`parse_das`] reads losslessly.
    pub fn to_das_text(&self) -> String {
        let mut out = String::from("Attributes {\n");
        for (name, attrs) in &self.sections {
            out.push_str(&format!("  {name} {{\n"));
            for (attr_name, attr) in attrs {
                if attr.is_string() {
                    out.push_str(&format!(
                        "    {} {} \"{}\";\n",
                        attr.datatype, attr_name, attr.value
                    ));
                } else {
                    out.push_str(&format!(
                        "    {} {} {};\n",
                        attr.datatype, attr_name, attr.value
                    ));
                }
            }
            out.push_str("  }\n");
        }
        out.push_str("}\n");
        out
    }
}

enum ParseState {
    Outside,
    InSection(String),
    InMultiline {
        section: String,
        datatype: String,
        name: String,
        buffer: String,
    },
}

/// Parses DAS text into a [`DasDocument`].
///
/// Malformed input (an unterminated section or multi-line value) yields whatever was
/// read so far; judging whether the result is usable is left to the classifier.
pub fn parse_das(text: &str) -> DasDocument {
    let mut doc = DasDocument::new();
    let mut state = ParseState::Outside;

    for raw in text.lines() {
        let raw = raw.trim_end_matches('\r');

        if let ParseState::InMultiline { buffer, .. } = &mut state {
            buffer.push('\n');
            buffer.push_str(raw.trim_end());
            if raw.trim_end().ends_with("\";") {
                if let ParseState::InMultiline {
                    section,
                    datatype,
                    name,
                    buffer,
                } = std::mem::replace(&mut state, ParseState::Outside)
                {
                    doc.insert(&section, &name, DasAttribute::new(datatype, strip_value(&buffer)));
                    state = ParseState::InSection(section);
                }
            }
            continue;
        }

        let line = raw.trim();
        if line.is_empty() || line.starts_with("Attributes {") {
            continue;
        }

        if line.ends_with('{') {
            let name = line
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .trim_end_matches('{')
                .to_string();
            doc.open_section(&name);
            state = ParseState::InSection(name);
            continue;
        }

        if line == "}" {
            state = ParseState::Outside;
            continue;
        }

        let ParseState::InSection(section) = &state else {
            continue;
        };
        let Some((datatype, name, value)) = split_attribute(line) else {
            continue;
        };

        if section == GLOBAL_SECTION && opens_multiline(datatype, value) {
            state = ParseState::InMultiline {
                section: section.clone(),
                datatype: datatype.to_string(),
                name: name.to_string(),
                buffer: value.to_string(),
            };
            continue;
        }

        doc.insert(section, name, DasAttribute::new(datatype, strip_value(value)));
    }

    match state {
        ParseState::InMultiline {
            section,
            datatype,
            name,
            buffer,
        } => {
            warn!(attribute = %name, "unterminated multi-line DAS value; keeping partial text");
            doc.insert(&section, &name, DasAttribute::new(datatype, strip_value(&buffer)));
        }
        ParseState::InSection(section) => {
            warn!(section = %section, "unterminated DAS section");
        }
        ParseState::Outside => {}
    }

    doc
}

/// Splits `datatype name value` where the value keeps its inner whitespace.
fn split_attribute(line: &str) -> Option<(&str, &str, &str)> {
    let (datatype, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    let (name, value) = rest.split_once(char::is_whitespace)?;
    let value = value.trim_start();
    if value.is_empty() {
        return None;
    }
    Some((datatype, name, value))
}

fn opens_multiline(datatype: &str, value: &str) -> bool {
    datatype.eq_ignore_ascii_case("String")
        && value.starts_with('"')
        && !(value.len() > 2 && value.ends_with("\";"))
}

fn strip_value(value: &str) -> String {
    value.trim().trim_matches(|ch| ch == '"' || ch == ';').to_string()
}
