//! Authenticated REST transport against the Nyx portal API.

use std::time::Instant;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{multipart::Form, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::config::NyxConfig;
use crate::error::{NyxError, Result};

/// Path prefix of every portal endpoint.
pub const API_PREFIX: [&str; 2] = ["api", "portal"];

pub const SDK_NAME: &str = "nyx-sdk";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A request body.
pub enum Body<'a, B: Serialize> {
    None,
    Json(&'a B),
    Multipart(Form),
}

/// Issues requests against `<url>/api/portal/`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    root: Url,
    token: Option<String>,
}

impl Transport {
    pub fn new(config: &NyxConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Requested-With", HeaderValue::from_static(SDK_NAME));
        headers.insert("X-Client-Type", HeaderValue::from_static(SDK_NAME));
        headers.insert("sdk-version", HeaderValue::from_static(SDK_VERSION));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("nyx-client-rs/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        Ok(Self {
            http,
            root: config.url.clone(),
            token: config.override_token.clone(),
        })
    }

    /// Returns a transport that sends `token` as bearer credentials.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            root: self.root.clone(),
            token: Some(token.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Builds the URL of an endpoint from already-unescaped path segments.
    pub fn endpoint<I, S>(&self, segments: I) -> Url
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.root.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(API_PREFIX).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(segments);
        let request = self.request(Method::GET, url.clone()).query(query);
        let response = self.send(&Method::GET, &url, request).await?;
        decode_json(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        segments: &[&str],
        body: Body<'_, B>,
    ) -> Result<T> {
        self.with_body(Method::POST, segments, body).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        segments: &[&str],
        body: Body<'_, B>,
    ) -> Result<T> {
        self.with_body(Method::PATCH, segments, body).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        segments: &[&str],
        body: Body<'_, B>,
    ) -> Result<T> {
        self.with_body(Method::PUT, segments, body).await
    }

    /// Sends a DELETE; any success body is ignored.
    pub async fn delete(&self, segments: &[&str]) -> Result<()> {
        let url = self.endpoint(segments);
        let request = self.request(Method::DELETE, url.clone());
        self.send(&Method::DELETE, &url, request).await?;
        Ok(())
    }

    /// Posts a raw text body and returns the raw text response.
    pub async fn post_text(
        &self,
        segments: &[&str],
        content_type: &str,
        accept: &str,
        body: String,
    ) -> Result<String> {
        let url = self.endpoint(segments);
        let request = self
            .request(Method::POST, url.clone())
            .header(CONTENT_TYPE, content_type)
            .header(ACCEPT, accept)
            .body(body);
        let response = self.send(&Method::POST, &url, request).await?;
        Ok(response.text().await?)
    }

    /// Downloads an absolute URL, e.g. the brokered access URL of a dataset.
    /// Credentials are only attached when the URL is on the Nyx host.
    pub async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let request = if url.origin() == self.root.origin() {
            self.request(Method::GET, url.clone())
        } else {
            self.http.request(Method::GET, url.clone())
        };
        let response = self.send(&Method::GET, url, request).await?;
        Ok(response.bytes().await?)
    }

    async fn with_body<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        segments: &[&str],
        body: Body<'_, B>,
    ) -> Result<T> {
        let url = self.endpoint(segments);
        let request = self.request(method.clone(), url.clone());
        let request = match body {
            Body::None => request,
            Body::Json(json) => request.json(json),
            Body::Multipart(form) => request.multipart(form),
        };
        let response = self.send(&method, &url, request).await?;
        decode_json(response).await
    }

    async fn send(&self, method: &Method, url: &Url, request: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        tracing::debug!(method = %method, path = %url.path(), "sending request");

        let response = request.send().await?;
        let status = response.status();

        tracing::debug!(
            method = %method,
            path = %url.path(),
            status = %status.as_u16(),
            duration_ms = %start.elapsed().as_millis(),
            "received response"
        );

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body).unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.clone()
            }
        });

        tracing::warn!(
            method = %method,
            path = %url.path(),
            status = %status.as_u16(),
            error = %message,
            "request rejected"
        );

        Err(status_to_error(status, message))
    }
}

/// Convert HTTP status to appropriate error type.
pub(crate) fn status_to_error(status: StatusCode, message: String) -> NyxError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            NyxError::Validation(message)
        }
        StatusCode::UNAUTHORIZED => NyxError::Unauthorized(message),
        StatusCode::FORBIDDEN => NyxError::Forbidden(message),
        StatusCode::NOT_FOUND => NyxError::NotFound(message),
        StatusCode::CONFLICT => NyxError::Conflict(message),
        s => NyxError::Status {
            status: s.as_u16(),
            message,
        },
    }
}

/// Pulls a human readable message out of a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "detail", "message"]
        .iter()
        .find_map(|key| match value.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.bytes().await?;
    // Some endpoints answer with an empty body; treat that as JSON null.
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &body
    };
    serde_json::from_slice(body).map_err(|e| {
        NyxError::InvalidResponse(format!(
            "failed to parse response: {e} (body: {})",
            String::from_utf8_lossy(body)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn transport(url: &str) -> Transport {
        let config = NyxConfig::builder()
            .process_env(false)
            .working_dir(std::env::temp_dir().join("nyx-transport-tests-missing"))
            .url(url)
            .override_token("t")
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        Transport::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_joins_prefix() {
        let t = transport("https://nyx.example.com");
        assert_eq!(
            t.endpoint(["products"]).as_str(),
            "https://nyx.example.com/api/portal/products"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_and_escapes_segments() {
        let t = transport("https://nyx.example.com/tenant/");
        assert_eq!(
            t.endpoint(["products", "my data/v1"]).as_str(),
            "https://nyx.example.com/tenant/api/portal/products/my%20data%2Fv1"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_to_error(StatusCode::BAD_REQUEST, "bad".into()),
            NyxError::Validation(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::UNPROCESSABLE_ENTITY, "bad".into()),
            NyxError::Validation(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::UNAUTHORIZED, "no".into()),
            NyxError::Unauthorized(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::NOT_FOUND, "gone".into()),
            NyxError::NotFound(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::CONFLICT, "dup".into()),
            NyxError::Conflict(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::BAD_GATEWAY, "down".into()),
            NyxError::Status { status: 502, .. }
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":"name taken"}"#).as_deref(),
            Some("name taken")
        );
        assert_eq!(
            error_message(r#"{"detail":{"field":"genre"}}"#).as_deref(),
            Some(r#"{"field":"genre"}"#)
        );
        assert_eq!(error_message("plain text"), None);
        assert_eq!(error_message(r#"{"other":1}"#), None);
    }
}
