//! Dataset search: a typed filter resolved into one remote listing request.

use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;

use crate::{
    circles::RemoteHost,
    client::NyxClient,
    data::{Data, DataRecord},
    error::{NyxError, Result},
};

const PRODUCTS: &str = "products";
const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Which datasets to include relative to the caller's subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscriptionState {
    #[default]
    All,
    Subscribed,
    NotSubscribed,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::All => "all",
            SubscriptionState::Subscribed => "subscribed",
            SubscriptionState::NotSubscribed => "not-subscribed",
        }
    }
}

/// Whether to query the whole federated network or only the local instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    Global,
    Local,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Local => "local",
        }
    }
}

/// Criteria for listing datasets. Every unset field is unconstrained; set
/// fields are combined with AND. `categories` matches datasets having any of
/// the listed categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFilter {
    /// Free-text search; switches to the text search endpoint
    pub text: Option<String>,
    pub name: Option<String>,
    pub categories: Vec<String>,
    pub genre: Option<String>,
    pub creator: Option<String>,
    pub license: Option<String>,
    pub content_type: Option<String>,
    pub subscription_state: SubscriptionState,
    pub scope: Scope,
    /// How long the remote may spend federating the query
    pub timeout: Option<Duration>,
}

/// A filter resolved into an endpoint and its query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub segments: Vec<&'static str>,
    pub params: Vec<(&'static str, String)>,
}

impl DataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    pub fn license(mut self, license: impl Into<String>) -> Self {
        self.license = Some(license.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn subscription_state(mut self, state: SubscriptionState) -> Self {
        self.subscription_state = state;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validates the filter and resolves it into a single request.
    pub fn to_request(&self) -> Result<SearchRequest> {
        let optional = [
            ("text", &self.text),
            ("name", &self.name),
            ("genre", &self.genre),
            ("creator", &self.creator),
            ("license", &self.license),
            ("contentType", &self.content_type),
        ];
        for (param, value) in &optional {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(NyxError::Validation(format!("filter '{param}' must not be blank")));
            }
        }
        if self.categories.iter().any(|c| c.trim().is_empty()) {
            return Err(NyxError::Validation(
                "filter 'category' must not contain blank values".to_string(),
            ));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(NyxError::Validation("filter timeout must be positive".to_string()));
        }

        let (segments, default_timeout) = if self.text.is_some() {
            (vec!["meta", "search", "text"], DEFAULT_SEARCH_TIMEOUT)
        } else {
            (vec![PRODUCTS], DEFAULT_LIST_TIMEOUT)
        };
        let timeout = self.timeout.unwrap_or(default_timeout);

        let mut params: Vec<(&'static str, String)> = vec![
            ("include", self.subscription_state.as_str().to_string()),
            ("timeout", timeout.as_secs().max(1).to_string()),
            ("scope", self.scope.as_str().to_string()),
        ];
        params.extend(
            optional
                .into_iter()
                .filter_map(|(param, value)| value.clone().map(|v| (param, v))),
        );
        params.extend(self.categories.iter().map(|c| ("category", c.clone())));

        Ok(SearchRequest { segments, params })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparqlResultType {
    SparqlJson,
    SparqlXml,
    SparqlCsv,
    RdfNTriples,
    RdfTurtle,
    RdfXml,
}

impl SparqlResultType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            SparqlResultType::SparqlJson => "application/sparql-results+json",
            SparqlResultType::SparqlXml => "application/sparql-results+xml",
            SparqlResultType::SparqlCsv => "text/csv",
            SparqlResultType::RdfNTriples => "application/n-triples",
            SparqlResultType::RdfTurtle => "text/turtle",
            SparqlResultType::RdfXml => "application/rdf+xml",
        }
    }
}

#[derive(Deserialize)]
struct RemoteHostRecord {
    did: String,
    #[serde(default)]
    name: Option<String>,
}

impl NyxClient {
    /// Lists the datasets matching `filter`, in the remote's ranking order.
    /// An empty filter lists everything visible to the caller.
    #[instrument(skip_all)]
    pub async fn get_data(&self, filter: &DataFilter) -> Result<Vec<Data>> {
        let request = filter.to_request()?;
        let records: Vec<DataRecord> = self
            .transport
            .get(&request.segments, &request.params)
            .await?;
        self.data_from_records(records)
    }

    /// Free-text search, further narrowed by `filter`.
    pub async fn search(&self, text: &str, filter: &DataFilter) -> Result<Vec<Data>> {
        self.get_data(&filter.clone().text(text)).await
    }

    /// Fetches one of the caller's own datasets by its unique name.
    #[instrument(skip_all, fields(name = %name))]
    pub async fn get_my_data_by_name(&self, name: &str) -> Result<Data> {
        crate::client::require_name("data", name)?;
        let record: DataRecord = self.transport.get(&[PRODUCTS, name], &[]).await?;
        self.data_from_record(record)
    }

    /// Datasets created by the caller's organisation on the local instance.
    ///
    /// The filter may not name another creator or narrow the subscription
    /// state, since own datasets are never subscriptions.
    pub async fn my_data(&self, filter: &DataFilter) -> Result<Vec<Data>> {
        if let Some(creator) = filter.creator.as_deref().filter(|c| *c != self.org()) {
            return Err(NyxError::Validation(format!(
                "creator '{creator}' conflicts with own organisation '{}'",
                self.org()
            )));
        }
        if filter.subscription_state != SubscriptionState::All {
            return Err(NyxError::Validation(format!(
                "subscription state '{}' does not apply to own data",
                filter.subscription_state.as_str()
            )));
        }
        let filter = filter.clone().creator(self.org()).scope(Scope::Local);
        self.get_data(&filter).await
    }

    /// Datasets the caller is currently subscribed to, freshly fetched.
    pub async fn my_subscriptions(&self, filter: &DataFilter) -> Result<Vec<Data>> {
        if filter.subscription_state == SubscriptionState::NotSubscribed {
            return Err(NyxError::Validation(
                "subscription state 'not-subscribed' conflicts with subscriptions".into(),
            ));
        }
        let filter = filter
            .clone()
            .subscription_state(SubscriptionState::Subscribed);
        self.get_data(&filter).await
    }

    /// All categories used across the network.
    pub async fn categories(&self) -> Result<Vec<String>> {
        self.transport.get(&["meta", "categories"], &[]).await
    }

    pub async fn genres(&self) -> Result<Vec<String>> {
        self.transport.get(&["meta", "genres"], &[]).await
    }

    pub async fn creators(&self) -> Result<Vec<String>> {
        self.transport.get(&["meta", "creators"], &[]).await
    }

    pub async fn content_types(&self) -> Result<Vec<String>> {
        self.transport.get(&["meta", "contentTypes"], &[]).await
    }

    pub async fn licenses(&self) -> Result<Vec<String>> {
        self.transport.get(&["meta", "licenseURLs"], &[]).await
    }

    /// All organisations in the federated network.
    pub async fn organizations(&self) -> Result<Vec<RemoteHost>> {
        let hosts: Vec<RemoteHostRecord> = self.transport.get(&["organizations"], &[]).await?;
        Ok(hosts
            .into_iter()
            .map(|h| RemoteHost {
                did: h.did,
                name: h.name.unwrap_or_default(),
            })
            .collect())
    }

    /// Runs a SPARQL 1.1 query and returns the raw result document.
    ///
    /// Experimental: the remote endpoint may change without notice.
    #[instrument(skip_all)]
    pub async fn sparql_query(
        &self,
        query: &str,
        result_type: SparqlResultType,
        local_only: bool,
    ) -> Result<String> {
        let scope = if local_only { "local" } else { "global" };
        self.transport
            .post_text(
                &["meta", "sparql", scope],
                "application/sparql-query",
                result_type.mime_type(),
                query.to_string(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(filter: &DataFilter) -> Vec<(&'static str, String)> {
        filter.to_request().unwrap().params
    }

    #[test]
    fn test_empty_filter_lists_products() {
        let request = DataFilter::new().to_request().unwrap();
        assert_eq!(request.segments, vec!["products"]);
        assert_eq!(
            request.params,
            vec![
                ("include", "all".to_string()),
                ("timeout", "10".to_string()),
                ("scope", "global".to_string()),
            ]
        );
    }

    #[test]
    fn test_text_switches_endpoint() {
        let request = DataFilter::new().text("weather").to_request().unwrap();
        assert_eq!(request.segments, vec!["meta", "search", "text"]);
        assert!(request.params.contains(&("text", "weather".to_string())));
        assert!(request.params.contains(&("timeout", "3".to_string())));
    }

    #[test]
    fn test_all_criteria_resolved() {
        let filter = DataFilter::new()
            .categories(["ai", "climate"])
            .genre("science")
            .creator("acme")
            .license("https://license")
            .content_type("text/csv")
            .name("ds1")
            .subscription_state(SubscriptionState::NotSubscribed)
            .scope(Scope::Local)
            .timeout(Duration::from_secs(5));
        let params = params(&filter);

        for expected in [
            ("include", "not-subscribed"),
            ("timeout", "5"),
            ("scope", "local"),
            ("genre", "science"),
            ("creator", "acme"),
            ("license", "https://license"),
            ("contentType", "text/csv"),
            ("name", "ds1"),
            ("category", "ai"),
            ("category", "climate"),
        ] {
            assert!(
                params.contains(&(expected.0, expected.1.to_string())),
                "missing {expected:?} in {params:?}"
            );
        }
        assert!(!params.iter().any(|(k, _)| *k == "text"));
    }

    #[test]
    fn test_blank_values_rejected() {
        let err = DataFilter::new().genre("  ").to_request().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("genre"));

        let err = DataFilter::new().category("").to_request().unwrap_err();
        assert!(err.is_validation());

        let err = DataFilter::new()
            .timeout(Duration::ZERO)
            .to_request()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_sparql_mime_types() {
        assert_eq!(SparqlResultType::SparqlCsv.mime_type(), "text/csv");
        assert_eq!(
            SparqlResultType::SparqlJson.mime_type(),
            "application/sparql-results+json"
        );
    }
}
