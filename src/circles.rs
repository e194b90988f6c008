//! Circles: named groups of remote organisations that data can be shared with.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    client::{require_name, NyxClient},
    error::{NyxError, Result},
    http::Body,
};

const CIRCLES: &str = "circles";

/// An organisation on the federated network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHost {
    pub did: String,
    #[serde(default)]
    pub name: String,
}

/// A named group of remote hosts. The name is unique within an instance; the
/// DID is assigned by the remote when the circle is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub organizations: Vec<RemoteHost>,
}

impl Circle {
    /// A local circle definition, not yet created remotely.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_organization(mut self, host: RemoteHost) -> Self {
        self.organizations.push(host);
        self
    }
}

#[derive(Serialize)]
struct NewCircle<'a> {
    name: &'a str,
    description: &'a Option<String>,
    organizations: &'a [RemoteHost],
}

#[derive(Deserialize)]
struct Created {
    did: String,
}

impl NyxClient {
    pub async fn get_circles(&self) -> Result<Vec<Circle>> {
        self.transport.get(&[CIRCLES], &[]).await
    }

    pub async fn get_circle_by_name(&self, name: &str) -> Result<Circle> {
        require_name("circle", name)?;
        self.transport.get(&[CIRCLES, name], &[]).await
    }

    /// Creates `circle` remotely and returns it with its assigned DID.
    #[instrument(skip_all, fields(name = %circle.name))]
    pub async fn create_circle(&self, circle: &Circle) -> Result<Circle> {
        require_name("circle", &circle.name)?;
        let body = NewCircle {
            name: &circle.name,
            description: &circle.description,
            organizations: &circle.organizations,
        };
        let created: Created = self.transport.post(&[CIRCLES], Body::Json(&body)).await?;
        if created.did.is_empty() {
            return Err(NyxError::InvalidResponse(
                "created circle has no did".to_string(),
            ));
        }
        info!(did = %created.did, "created circle");

        Ok(Circle {
            did: Some(created.did),
            ..circle.clone()
        })
    }

    /// Replaces the description and members of the circle with the same name.
    #[instrument(skip_all, fields(name = %circle.name))]
    pub async fn update_circle(&self, circle: &Circle) -> Result<()> {
        require_name("circle", &circle.name)?;
        let _: serde_json::Value = self
            .transport
            .put(&[CIRCLES, circle.name.as_str()], Body::Json(circle))
            .await?;
        Ok(())
    }

    pub async fn delete_circle(&self, circle: &Circle) -> Result<()> {
        self.delete_circle_by_name(&circle.name).await
    }

    #[instrument(skip_all, fields(name = %name))]
    pub async fn delete_circle_by_name(&self, name: &str) -> Result<()> {
        require_name("circle", name)?;
        self.transport.delete(&[CIRCLES, name]).await
    }
}
