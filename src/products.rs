//! Publishing, amending and withdrawing the caller's own datasets.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    client::{require_name, NyxClient},
    data::{Data, DataRecord, Visibility, ALLOW_ALL, ALLOW_NONE},
    error::{NyxError, Result},
    http::Body,
    property::Property,
};

const PRODUCTS: &str = "products";
const OCTET_STREAM: &str = "application/octet-stream";

/// File content uploaded alongside a dataset's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub bytes: Bytes,
}

impl FilePayload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A dataset to publish. Exactly one of `download_url` and `file` must be set.
#[derive(Debug, Clone)]
pub struct NewData {
    pub name: String,
    pub title: String,
    pub description: String,
    pub genre: String,
    pub categories: Vec<String>,
    pub content_type: String,
    pub lang: String,
    pub status: String,
    /// Plain text sample; sent base64 encoded
    pub preview: String,
    pub size: Option<u64>,
    /// In cents; zero or unset means free
    pub price: Option<u64>,
    pub license_url: Option<String>,
    pub download_url: Option<String>,
    pub file: Option<FilePayload>,
    pub visibility: Visibility,
    pub custom_metadata: Vec<Property>,
    pub connection_id: Option<String>,
}

impl NewData {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: String::new(),
            genre: String::new(),
            categories: Vec::new(),
            content_type: content_type.into(),
            lang: "en".to_string(),
            status: "published".to_string(),
            preview: String::new(),
            size: None,
            price: None,
            license_url: None,
            download_url: None,
            file: None,
            visibility: Visibility::default(),
            custom_metadata: Vec::new(),
            connection_id: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    pub fn file(mut self, file: FilePayload) -> Self {
        self.file = Some(file);
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = preview.into();
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn license_url(mut self, url: impl Into<String>) -> Self {
        self.license_url = Some(url.into());
        self
    }

    pub fn custom_metadata(mut self, properties: Vec<Property>) -> Self {
        self.custom_metadata = properties;
        self
    }

    pub fn connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    fn validate(&self) -> Result<()> {
        require_name("data", &self.name)?;
        match (&self.download_url, &self.file) {
            (None, None) => Err(NyxError::Validation(
                "either a download url or a file must be supplied".to_string(),
            )),
            (Some(_), Some(_)) => Err(NyxError::Validation(
                "a download url and a file must not both be supplied".to_string(),
            )),
            (None, Some(_)) => {
                part_mime(&self.content_type)?;
                validate_visibility(&self.visibility)
            }
            _ => validate_visibility(&self.visibility),
        }
    }

    fn metadata(&self) -> ProductMetadata<'_> {
        let (access_control, circles) = visibility_to_wire(&self.visibility);
        let size = match (&self.file, self.size) {
            (_, Some(size)) => Some(size),
            (Some(file), None) => Some(file.len() as u64),
            (None, None) => None,
        };
        ProductMetadata {
            name: Some(&self.name),
            title: Some(&self.title),
            description: Some(&self.description),
            genre: Some(&self.genre),
            categories: Some(&self.categories),
            lang: Some(&self.lang),
            status: Some(&self.status),
            preview: Some(STANDARD.encode(&self.preview)),
            content_type: Some(&self.content_type),
            custom_metadata: Some(&self.custom_metadata),
            price: self.price.filter(|p| *p > 0),
            download_url: self.download_url.as_deref(),
            size,
            license_url: self.license_url.as_deref(),
            connection_id: self.connection_id.as_deref(),
            access_control,
            circles,
        }
    }
}

/// Changes to an existing dataset. Unset fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct DataUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub categories: Option<Vec<String>>,
    pub content_type: Option<String>,
    pub lang: Option<String>,
    pub status: Option<String>,
    pub preview: Option<String>,
    pub size: Option<u64>,
    pub price: Option<u64>,
    pub license_url: Option<String>,
    pub download_url: Option<String>,
    pub file: Option<FilePayload>,
    pub visibility: Option<Visibility>,
    pub custom_metadata: Option<Vec<Property>>,
    pub connection_id: Option<String>,
}

impl DataUpdate {
    fn validate(&self) -> Result<()> {
        if self.download_url.is_some() && self.file.is_some() {
            return Err(NyxError::Validation(
                "a download url and a file must not both be supplied".to_string(),
            ));
        }
        if let Some(content_type) = &self.content_type {
            part_mime(content_type)?;
        }
        match &self.visibility {
            Some(visibility) => validate_visibility(visibility),
            None => Ok(()),
        }
    }

    fn metadata(&self) -> ProductMetadata<'_> {
        let (access_control, circles) = match &self.visibility {
            Some(visibility) => visibility_to_wire(visibility),
            None => (None, None),
        };
        ProductMetadata {
            name: None,
            title: self.title.as_deref(),
            description: self.description.as_deref(),
            genre: self.genre.as_deref(),
            categories: self.categories.as_deref(),
            lang: self.lang.as_deref(),
            status: self.status.as_deref(),
            preview: self.preview.as_ref().map(|p| STANDARD.encode(p)),
            content_type: self.content_type.as_deref(),
            custom_metadata: self.custom_metadata.as_deref(),
            price: self.price,
            download_url: self.download_url.as_deref(),
            size: self.size,
            license_url: self.license_url.as_deref(),
            connection_id: self.connection_id.as_deref(),
            access_control,
            circles,
        }
    }
}

/// The `productMetadata` part of create and update requests.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProductMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    genre: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    categories: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lang: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_metadata: Option<&'a [Property]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<u64>,
    #[serde(rename = "downloadURL", skip_serializing_if = "Option::is_none")]
    download_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(rename = "licenseURL", skip_serializing_if = "Option::is_none")]
    license_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_control: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    circles: Option<&'a [String]>,
}

fn validate_visibility(visibility: &Visibility) -> Result<()> {
    match visibility {
        Visibility::Circles(dids) if dids.is_empty() => Err(NyxError::Validation(
            "sharing with circles requires at least one circle".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Either an access control list or circle DIDs; the remote needs one of them.
fn visibility_to_wire(
    visibility: &Visibility,
) -> (Option<Vec<&'static str>>, Option<&[String]>) {
    match visibility {
        Visibility::Private => (Some(vec![ALLOW_NONE]), None),
        Visibility::Public => (Some(vec![ALLOW_ALL]), None),
        Visibility::Circles(dids) => (None, Some(dids)),
    }
}

/// The MIME type of an uploaded file part. IANA IRIs such as
/// `https://www.iana.org/assignments/media-types/text/csv` reduce to
/// `text/csv`.
fn part_mime(content_type: &str) -> Result<String> {
    let invalid = || NyxError::Validation(format!("invalid content type '{content_type}'"));
    let content_type = content_type.trim();
    let (essence, params) = match content_type.split_once(';') {
        Some((essence, params)) => (essence.trim(), Some(params)),
        None => (content_type, None),
    };

    let essence = if essence.starts_with("http") {
        let mut segments = essence.trim_end_matches('/').rsplit('/');
        match (segments.next(), segments.next()) {
            (Some(subtype), Some(top_level)) => format!("{top_level}/{subtype}"),
            _ => return Err(invalid()),
        }
    } else {
        essence.to_string()
    };

    let is_token = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
    };
    match essence.split_once('/') {
        Some((top_level, subtype)) if is_token(top_level) && is_token(subtype) => {}
        _ => return Err(invalid()),
    }

    Ok(match params {
        Some(params) => format!("{essence};{params}"),
        None => essence,
    })
}

fn multipart(
    metadata: &ProductMetadata<'_>,
    name: &str,
    file: Option<&FilePayload>,
    content_type: Option<&str>,
) -> Result<Form> {
    let form = Form::new().text("productMetadata", serde_json::to_string(metadata)?);
    let Some(file) = file else {
        return Ok(form);
    };
    let part = Part::bytes(file.bytes.to_vec())
        .file_name(name.to_string())
        .mime_str(&part_mime(content_type.unwrap_or(OCTET_STREAM))?)
        .map_err(|e| NyxError::Validation(format!("invalid content type: {e}")))?;
    Ok(form.part("productData", part))
}

impl NyxClient {
    /// Publishes a new dataset owned by the caller's organisation.
    #[instrument(skip_all, fields(name = %data.name))]
    pub async fn create_data(&self, data: &NewData) -> Result<Data> {
        data.validate()?;
        let form = multipart(
            &data.metadata(),
            &data.name,
            data.file.as_ref(),
            Some(&data.content_type),
        )?;
        let record: DataRecord = self
            .transport
            .post::<_, ()>(&[PRODUCTS], Body::Multipart(form))
            .await?;
        info!("created data");
        self.data_from_record(record)
    }

    /// Applies `update` to the caller's dataset `name` and returns the
    /// dataset as stored afterwards.
    #[instrument(skip_all, fields(name = %name))]
    pub async fn update_data(&self, name: &str, update: &DataUpdate) -> Result<Data> {
        require_name("data", name)?;
        update.validate()?;
        let form = multipart(
            &update.metadata(),
            name,
            update.file.as_ref(),
            update.content_type.as_deref(),
        )?;
        let record: DataRecord = self
            .transport
            .patch::<_, ()>(&[PRODUCTS, name], Body::Multipart(form))
            .await?;
        info!("updated data");
        self.data_from_record(record)
    }

    pub async fn delete_data(&self, data: &Data) -> Result<()> {
        self.delete_data_by_name(&data.name).await
    }

    /// Withdraws the caller's dataset `name`. A missing name is `NotFound`.
    #[instrument(skip_all, fields(name = %name))]
    pub async fn delete_data_by_name(&self, name: &str) -> Result<()> {
        require_name("data", name)?;
        self.transport.delete(&[PRODUCTS, name]).await?;
        info!("deleted data");
        Ok(())
    }
}
