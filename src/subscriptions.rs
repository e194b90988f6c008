//! Subscribing to and unsubscribing from other organisations' datasets.
//!
//! Both operations are idempotent: repeating one leaves the remote state
//! unchanged and succeeds.

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::{
    client::{require_name, NyxClient},
    data::Data,
    error::{NyxError, Result},
    http::Body,
};

#[derive(Serialize)]
struct Purchase<'a> {
    product_name: &'a str,
    seller_org: &'a str,
}

impl NyxClient {
    /// Subscribes to `data`, which grants access to its content.
    #[instrument(skip_all, fields(name = %data.name, creator = %data.creator))]
    pub async fn subscribe(&self, data: &Data) -> Result<()> {
        require_name("data", &data.name)?;
        let purchase = Purchase {
            product_name: &data.name,
            seller_org: &data.creator,
        };
        match self
            .transport
            .post::<serde_json::Value, _>(&["purchases", "transactions"], Body::Json(&purchase))
            .await
        {
            Ok(_) => {
                info!("subscribed");
                Ok(())
            }
            Err(NyxError::Conflict(_)) => {
                debug!("already subscribed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ends the subscription to `data`. Not being subscribed is not an error.
    #[instrument(skip_all, fields(name = %data.name, creator = %data.creator))]
    pub async fn unsubscribe(&self, data: &Data) -> Result<()> {
        require_name("data", &data.name)?;
        // The creator segment is expected double encoded, e.g. `org%252Fuser`.
        let creator = urlencoding::encode(&data.creator);
        match self
            .transport
            .delete(&["purchases", "transactions", &*creator, data.name.as_str()])
            .await
        {
            Ok(()) => {
                info!("unsubscribed");
                Ok(())
            }
            Err(NyxError::NotFound(_)) => {
                debug!("was not subscribed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
