//! Datasets ("data") as returned by Nyx, with lazily downloaded content.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::OnceCell;
use tracing::warn;
use url::Url;

use crate::circles::Circle;
use crate::error::{NyxError, Result};
use crate::http::Transport;
use crate::property::Property;

/// Access control IRI granting every organisation access.
pub const ALLOW_ALL: &str = "http://data.iotics.com/nyx#AllowAll";
/// Access control IRI restricting access to the owner.
pub const ALLOW_NONE: &str = "http://data.iotics.com/nyx#AllowNone";

/// Who may see and subscribe to a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only the owning organisation.
    #[default]
    Private,
    /// Every organisation on the network.
    Public,
    /// Members of the circles with these DIDs.
    Circles(Vec<String>),
}

impl Visibility {
    /// Shares with the given circles, which must have been created remotely
    /// (i.e. carry a DID).
    pub fn shared_with<'a>(circles: impl IntoIterator<Item = &'a Circle>) -> Result<Self> {
        circles
            .into_iter()
            .map(|c| {
                c.did.clone().ok_or_else(|| {
                    NyxError::Validation(format!("circle '{}' has no did, create it first", c.name))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Visibility::Circles)
    }

    fn from_wire(access_control: &[String], circles: &[String]) -> Self {
        if access_control.iter().any(|a| a == ALLOW_ALL) {
            Visibility::Public
        } else if !circles.is_empty() {
            Visibility::Circles(circles.to_vec())
        } else {
            Visibility::Private
        }
    }
}

/// A dataset object as found in API responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct DataRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(rename = "accessURL", deserialize_with = "null_as_default")]
    pub access_url: String,
    #[serde(rename = "downloadURL")]
    pub download_url: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub content_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub creator: String,
    #[serde(deserialize_with = "null_as_default")]
    pub categories: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub genre: String,
    #[serde(deserialize_with = "lenient_size")]
    pub size: u64,
    pub lang: Option<String>,
    #[serde(rename = "licenseURL")]
    pub license_url: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub access_control: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub circles: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub custom_metadata: Vec<Property>,
    pub connection_id: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Sizes arrive as numbers, numeric strings or nothing at all.
fn lenient_size<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Downloaded content, decoded according to the declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(Bytes),
}

/// A dataset in the Nyx network.
///
/// Metadata is fixed at the time of the listing that produced it. Content
/// is downloaded on first access and kept for the lifetime of the value.
#[derive(Debug, Clone, Serialize)]
pub struct Data {
    /// Unique per owning organisation
    pub name: String,
    pub title: String,
    pub description: String,
    /// Organisation that owns the dataset
    pub creator: String,
    pub genre: String,
    pub categories: Vec<String>,
    /// Approximate size in bytes, as reported by the producer
    pub size: u64,
    pub lang: Option<String>,
    pub license_url: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub visibility: Visibility,
    pub custom_metadata: Vec<Property>,
    pub connection_id: Option<String>,
    #[serde(rename = "content_type")]
    media_type: String,
    url: Url,
    #[serde(skip)]
    transport: Transport,
    #[serde(skip)]
    content: OnceCell<Bytes>,
}

impl Data {
    pub(crate) fn from_record(record: DataRecord, org: &str, transport: Transport) -> Result<Self> {
        let raw_url = if record.access_url.is_empty() {
            record.download_url.clone().unwrap_or_default()
        } else {
            record.access_url.clone()
        };
        if raw_url.is_empty() {
            return Err(NyxError::InvalidResponse(format!(
                "data '{}' has neither accessURL nor downloadURL",
                record.name
            )));
        }
        let mut url = Url::parse(&raw_url).map_err(|e| {
            NyxError::InvalidResponse(format!("data '{}' has invalid URL '{raw_url}': {e}", record.name))
        })?;
        url.query_pairs_mut().append_pair("buyer_org", org);

        let visibility = Visibility::from_wire(&record.access_control, &record.circles);

        Ok(Self {
            name: record.name,
            title: record.title,
            description: record.description,
            creator: record.creator,
            genre: record.genre,
            categories: record.categories,
            size: record.size,
            lang: record.lang,
            license_url: record.license_url,
            created: record.created,
            updated: record.updated,
            visibility,
            custom_metadata: record.custom_metadata,
            connection_id: record.connection_id,
            media_type: record.content_type,
            url,
            transport,
            content: OnceCell::new(),
        })
    }

    /// The brokered access URL, qualified with the caller's organisation.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The content type exactly as declared by the producer.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The content type without IANA IRI prefix, e.g. `csv` for
    /// `https://www.iana.org/assignments/media-types/text/csv`.
    pub fn content_type(&self) -> &str {
        if self.media_type.starts_with("http") {
            self.media_type.rsplit('/').next().unwrap_or_default()
        } else {
            &self.media_type
        }
    }

    /// Whether [`Data::content`] decodes the content as text.
    ///
    /// Decided on the media type's top level (`text/*`) or its exact
    /// subtype, so archives such as `...spreadsheetml.sheet` stay binary.
    pub fn is_textual(&self) -> bool {
        const TEXTUAL: [&str; 9] = [
            "csv",
            "json",
            "xml",
            "yaml",
            "x-yaml",
            "markdown",
            "html",
            "plain",
            "tab-separated-values",
        ];
        let essence = self
            .media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let mut parts = essence.rsplit('/');
        let subtype = parts.next().unwrap_or_default();
        let top_level = parts.next().unwrap_or_default();

        top_level == "text"
            || TEXTUAL.contains(&subtype)
            || subtype.ends_with("+json")
            || subtype.ends_with("+xml")
    }

    /// Whether the content has already been downloaded.
    pub fn is_loaded(&self) -> bool {
        self.content.initialized()
    }

    /// Downloads the content (once) and returns it as raw bytes.
    pub async fn as_bytes(&self) -> Result<Bytes> {
        self.content
            .get_or_try_init(|| async {
                self.transport.fetch(&self.url).await.map_err(|e| {
                    warn!(
                        "failed to download content of data [{}], confirm the source is still available with the data producer: {e}",
                        self.title
                    );
                    NyxError::Retrieval {
                        title: self.title.clone(),
                        reason: e.to_string(),
                    }
                })
            })
            .await
            .cloned()
    }

    /// Downloads the content (once) and decodes it as UTF-8 text.
    pub async fn as_string(&self) -> Result<String> {
        let bytes = self.as_bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| NyxError::Retrieval {
            title: self.title.clone(),
            reason: format!("content is not valid UTF-8: {e}"),
        })
    }

    /// Downloads the content (once); text for textual content types,
    /// raw bytes otherwise.
    pub async fn content(&self) -> Result<Content> {
        if self.is_textual() {
            self.as_string().await.map(Content::Text)
        } else {
            self.as_bytes().await.map(Content::Binary)
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data({}, {}, {})", self.title, self.url, self.content_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NyxConfig;
    use serde_json::json;

    fn transport() -> Transport {
        let config = NyxConfig::builder()
            .process_env(false)
            .working_dir(std::env::temp_dir().join("nyx-data-tests-missing"))
            .url("https://nyx.example.com")
            .override_token("t")
            .build()
            .unwrap();
        Transport::new(&config).unwrap()
    }

    fn data(value: serde_json::Value) -> Result<Data> {
        let record: DataRecord = serde_json::from_value(value).unwrap();
        Data::from_record(record, "acme", transport())
    }

    #[test]
    fn test_minimal_record() {
        let d = data(json!({
            "name": "aha",
            "title": "aha2",
            "description": "server description",
            "contentType": "text/csv",
            "creator": "the creator",
            "genre": "server whatever",
            "categories": ["server", "categories"],
            "size": 101,
            "accessURL": "http://here.com/server"
        }))
        .unwrap();

        assert_eq!(d.name, "aha");
        assert_eq!(d.size, 101);
        assert_eq!(d.categories, vec!["server", "categories"]);
        assert_eq!(d.url().as_str(), "http://here.com/server?buyer_org=acme");
        assert_eq!(d.visibility, Visibility::Private);
        assert!(d.custom_metadata.is_empty());
        assert!(!d.is_loaded());
    }

    #[test]
    fn test_download_url_fallback_and_lenient_fields() {
        let d = data(json!({
            "name": "x",
            "title": "X",
            "downloadURL": "http://here.com/x.csv?sig=1",
            "size": "12",
            "categories": null,
            "accessControl": [ALLOW_ALL]
        }))
        .unwrap();

        assert_eq!(d.size, 12);
        assert!(d.categories.is_empty());
        assert_eq!(d.url().as_str(), "http://here.com/x.csv?sig=1&buyer_org=acme");
        assert_eq!(d.visibility, Visibility::Public);
    }

    #[test]
    fn test_missing_url_is_invalid_response() {
        let err = data(json!({"name": "x", "title": "X"})).unwrap_err();
        assert!(matches!(err, NyxError::InvalidResponse(_)));
    }

    #[test]
    fn test_circle_visibility() {
        let d = data(json!({
            "name": "x",
            "title": "X",
            "accessURL": "http://here.com/x",
            "circles": ["did:iotics:abc"]
        }))
        .unwrap();
        assert_eq!(
            d.visibility,
            Visibility::Circles(vec!["did:iotics:abc".to_string()])
        );
    }

    #[test]
    fn test_content_type_strips_iana_prefix() {
        let d = data(json!({
            "name": "x",
            "title": "X",
            "accessURL": "http://here.com/x",
            "contentType": "https://www.iana.org/assignments/media-types/text/csv"
        }))
        .unwrap();
        assert_eq!(d.content_type(), "csv");
        assert!(d.is_textual());

        let d = data(json!({
            "name": "y",
            "title": "Y",
            "accessURL": "http://here.com/y",
            "contentType": "image/png"
        }))
        .unwrap();
        assert_eq!(d.content_type(), "image/png");
        assert!(!d.is_textual());
    }

    #[test]
    fn test_textual_by_media_type() {
        let textual = |content_type: &str| {
            data(json!({
                "name": "x",
                "title": "X",
                "accessURL": "http://here.com/x",
                "contentType": content_type
            }))
            .unwrap()
            .is_textual()
        };

        assert!(textual("text/plain; charset=utf-8"));
        assert!(textual("application/json"));
        assert!(textual("application/ld+json"));
        assert!(textual("csv"));
        assert!(textual("https://www.iana.org/assignments/media-types/application/xml"));

        assert!(!textual("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"));
        assert!(!textual("application/vnd.oasis.opendocument.text"));
        assert!(!textual("application/vnd.ms-excel"));
        assert!(!textual("application/pdf"));
    }

    #[test]
    fn test_display() {
        let d = data(json!({
            "name": "x",
            "title": "Weather",
            "accessURL": "http://here.com/x",
            "contentType": "text/csv"
        }))
        .unwrap();
        assert_eq!(
            d.to_string(),
            "Data(Weather, http://here.com/x?buyer_org=acme, text/csv)"
        );
    }

    #[test]
    fn test_shared_with_requires_did() {
        let created = Circle {
            name: "friends".into(),
            did: Some("did:iotics:1".into()),
            ..Default::default()
        };
        let draft = Circle::new("draft");

        assert_eq!(
            Visibility::shared_with([&created]).unwrap(),
            Visibility::Circles(vec!["did:iotics:1".into()])
        );
        assert!(Visibility::shared_with([&created, &draft])
            .unwrap_err()
            .is_validation());
    }
}
