//! Connections to third-party storage that data can be uploaded through.

use serde::{Deserialize, Serialize};

use crate::{client::NyxClient, error::Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Non-sensitive storage configuration.
    #[serde(default)]
    pub json_blob: serde_json::Value,
    #[serde(default)]
    pub allow_upload: bool,
}

impl NyxClient {
    /// Lists connections, optionally only those that do (or don't) allow
    /// uploads.
    pub async fn get_connections(&self, allow_upload: Option<bool>) -> Result<Vec<Connection>> {
        let params: Vec<(&str, String)> = allow_upload
            .map(|allow| vec![("allow_upload", allow.to_string())])
            .unwrap_or_default();
        self.transport.get(&["connections"], &params).await
    }
}
