//! Custom metadata (properties) attached to a [`crate::Data`].
//!
//! Field names follow the Nyx wire format.

use serde::{Deserialize, Serialize};

/// The value (object) of a property. The variant is determined by which
/// JSON keys are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A string with a 2-character language code (`rdf:langString`).
    LangLiteral { lang: String, value: String },
    /// A literal with an XSD datatype, without namespace prefix, e.g.
    /// `float` or `dateTime` (`rdfs:Literal`).
    Literal {
        #[serde(rename = "dataType")]
        data_type: String,
        value: String,
    },
    Uri { uri: String },
    /// A string without language (`rdf:string`).
    StringLiteral { value: String },
}

/// A metadata property with a single value. A key with several values is
/// represented by several properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// The predicate; must be an IRI.
    pub key: String,
    pub value: PropertyValue,
}

impl Property {
    pub fn lang_string(
        key: impl Into<String>,
        value: impl Into<String>,
        lang: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: PropertyValue::LangLiteral {
                lang: lang.into(),
                value: value.into(),
            },
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: PropertyValue::StringLiteral {
                value: value.into(),
            },
        }
    }

    pub fn literal(
        key: impl Into<String>,
        value: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: PropertyValue::Literal {
                data_type: data_type.into(),
                value: value.into(),
            },
        }
    }

    pub fn uri(key: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: PropertyValue::Uri { uri: uri.into() },
        }
    }
}
