use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    config::NyxConfig,
    data::{Data, DataRecord},
    error::{NyxError, Result},
    http::{Body, Transport},
};

/// The identity a client acts as, established once by [`NyxClient::connect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Nickname of the logged-in user
    pub username: String,
    /// Organisation used as creator and buyer identity
    pub org: String,
    pub community_mode: bool,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    name: String,
}

#[derive(Deserialize)]
struct QapiConnection {
    org_name: String,
    #[serde(default)]
    community_mode: bool,
}

/// A client for a Nyx instance. Clones share the same session.
///
/// Every operation is a single request: nothing is cached between calls and
/// nothing is retried.
#[derive(Debug, Clone)]
pub struct NyxClient {
    pub(crate) transport: Transport,
    session: Arc<Session>,
    config: Arc<NyxConfig>,
}

impl NyxClient {
    /// Authenticates against the configured instance and resolves the
    /// caller's organisation.
    ///
    /// Logs in with email and password unless the configuration carries an
    /// override token.
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn connect(config: NyxConfig) -> Result<Self> {
        config.validate()?;
        let transport = Transport::new(&config)?;

        let transport = if transport.is_authenticated() {
            transport
        } else {
            let login = LoginRequest {
                email: config.email.as_deref().unwrap_or_default(),
                password: config.password.as_deref().unwrap_or_default(),
            };
            let tokens: LoginResponse = transport
                .post(&["auth", "login"], Body::Json(&login))
                .await?;
            transport.with_token(tokens.access_token)
        };

        let me: UserInfo = transport.get(&["users", "me"], &[]).await?;
        let host: QapiConnection = transport.get(&["auth", "qapi-connection"], &[]).await?;

        let org = if host.community_mode {
            format!("{}/{}", host.org_name, me.name)
        } else {
            host.org_name
        };
        debug!("successful login as {} ({org})", me.name);

        Ok(Self {
            transport,
            session: Arc::new(Session {
                username: me.name,
                org,
                community_mode: host.community_mode,
            }),
            config: Arc::new(config),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The caller's organisation.
    pub fn org(&self) -> &str {
        &self.session.org
    }

    pub fn config(&self) -> &NyxConfig {
        &self.config
    }

    pub(crate) fn data_from_record(&self, record: DataRecord) -> Result<Data> {
        Data::from_record(record, &self.session.org, self.transport.clone())
    }

    pub(crate) fn data_from_records(&self, records: Vec<DataRecord>) -> Result<Vec<Data>> {
        records
            .into_iter()
            .map(|r| self.data_from_record(r))
            .collect()
    }
}

/// Rejects blank identifiers before they reach the network.
pub(crate) fn require_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(NyxError::Validation(format!("{kind} name must not be empty")));
    }
    Ok(())
}
