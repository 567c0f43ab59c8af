//! HTTP client for the RapidPro REST API (v1).
//!
//! Wraps `reqwest` with token authentication, cursor pagination over the
//! `next` link in list envelopes, and transient-error retry with back-off.
//! All list endpoints follow `next` until exhausted and return the collected
//! results.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Url};
use uuid::Uuid;

use crate::error::RapidProError;
use crate::retry::retry_with_backoff;
use crate::types::{Contact, ContactUpdate, Flow, FlowDefinition, FlowStart, Page, Run};

const DEFAULT_BASE_URL: &str = "https://app.rapidpro.io/api/v1/";

/// Client for the RapidPro REST API.
///
/// Manages the HTTP client, API token, and base URL. Use
/// [`RapidProClient::new`] for production or [`RapidProClient::with_base_url`]
/// to point at a mock server in tests.
pub struct RapidProClient {
    client: Client,
    base_url: Url,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl RapidProClient {
    /// Creates a new client pointed at the hosted RapidPro API.
    ///
    /// # Errors
    ///
    /// Returns [`RapidProError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`RapidProError::Client`] if the token is
    /// not a valid header value.
    pub fn new(api_token: &str, timeout_secs: u64) -> Result<Self, RapidProError> {
        Self::with_base_url(api_token, timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a new client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`RapidProError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`RapidProError::Client`] if `base_url` is
    /// not a valid URL or the token is not a valid header value.
    pub fn with_base_url(
        api_token: &str,
        timeout_secs: u64,
        base_url: &str,
    ) -> Result<Self, RapidProError> {
        let mut auth = HeaderValue::from_str(&format!("Token {api_token}"))
            .map_err(|e| RapidProError::Client(format!("invalid API token: {e}")))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("tracpro/0.1 (survey-tracking)")
            .default_headers(headers)
            .build()?;

        // Normalise: ensure the base URL ends with exactly one slash so that
        // Url::join appends endpoints instead of replacing the last path
        // segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised)
            .map_err(|e| RapidProError::Client(format!("invalid base URL '{base_url}': {e}")))?;

        Ok(Self {
            client,
            base_url,
            max_retries: 3,
            backoff_base_ms: 1_000,
        })
    }

    /// Overrides the retry policy (attempts beyond the first, base delay).
    #[must_use]
    pub fn with_retry_policy(mut self, max_retries: u32, backoff_base_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    /// Fetches all flows for the org, following pagination.
    ///
    /// When `archived` is `Some`, filters server-side by archived state.
    ///
    /// # Errors
    ///
    /// - [`RapidProError::Http`] on network failure or non-2xx HTTP status.
    /// - [`RapidProError::Deserialize`] if a page does not match the expected
    ///   shape.
    pub async fn get_flows(&self, archived: Option<bool>) -> Result<Vec<Flow>, RapidProError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(archived) = archived {
            params.push(("archived", archived.to_string()));
        }
        let url = self.build_url("flows.json", &params)?;
        self.get_all_pages(url, "flows").await
    }

    /// Fetches the full definition of a single flow, ruleset rules included.
    ///
    /// # Errors
    ///
    /// - [`RapidProError::Http`] on network failure or non-2xx HTTP status.
    /// - [`RapidProError::Deserialize`] if the response does not match the
    ///   expected shape.
    pub async fn get_flow_definition(&self, flow_uuid: Uuid) -> Result<FlowDefinition, RapidProError> {
        let url = self.build_url("flow_definition.json", &[("uuid", flow_uuid.to_string())])?;
        self.get_json(url, &format!("flow_definition(uuid={flow_uuid})"))
            .await
    }

    /// Fetches runs of a flow modified after the given watermark, following
    /// pagination. Passing `None` fetches the flow's full run history.
    ///
    /// # Errors
    ///
    /// - [`RapidProError::Http`] on network failure or non-2xx HTTP status.
    /// - [`RapidProError::Deserialize`] if a page does not match the expected
    ///   shape.
    pub async fn get_runs_for_flow(
        &self,
        flow_uuid: Uuid,
        after: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<Run>, RapidProError> {
        let mut params = vec![("flow_uuid", flow_uuid.to_string())];
        if let Some(after) = after {
            params.push(("after", after.to_rfc3339()));
        }
        let url = self.build_url("runs.json", &params)?;
        self.get_all_pages(url, "runs").await
    }

    /// Fetches a single contact by UUID.
    ///
    /// # Errors
    ///
    /// - [`RapidProError::Http`] on network failure or non-2xx HTTP status.
    /// - [`RapidProError::Client`] if no contact with that UUID exists.
    /// - [`RapidProError::Deserialize`] if the response does not match the
    ///   expected shape.
    pub async fn get_contact(&self, contact_uuid: Uuid) -> Result<Contact, RapidProError> {
        let url = self.build_url("contacts.json", &[("uuid", contact_uuid.to_string())])?;
        let page: Page<Contact> = self
            .get_json(url, &format!("contacts(uuid={contact_uuid})"))
            .await?;
        page.results
            .into_iter()
            .next()
            .ok_or_else(|| RapidProError::Client(format!("contact {contact_uuid} not found")))
    }

    /// Creates or updates a contact. RapidPro matches on the `uuid` field when
    /// present and replaces the submitted attributes.
    ///
    /// # Errors
    ///
    /// - [`RapidProError::Http`] on network failure or non-2xx HTTP status.
    /// - [`RapidProError::Deserialize`] if the response does not match the
    ///   expected shape.
    pub async fn update_contact(&self, update: &ContactUpdate) -> Result<Contact, RapidProError> {
        let url = self.build_url::<&str>("contacts.json", &[])?;
        self.post_json(url, update, "update_contact").await
    }

    /// Starts contacts down a flow (used to fan out alert messages).
    ///
    /// # Errors
    ///
    /// - [`RapidProError::Http`] on network failure or non-2xx HTTP status.
    /// - [`RapidProError::Deserialize`] if the response is not valid JSON.
    pub async fn create_flow_start(&self, start: &FlowStart) -> Result<(), RapidProError> {
        let url = self.build_url::<&str>("runs.json", &[])?;
        let _: serde_json::Value = self.post_json(url, start, "create_flow_start").await?;
        Ok(())
    }

    /// Joins an endpoint path onto the base URL and appends query parameters.
    fn build_url<S: AsRef<str>>(
        &self,
        endpoint: &str,
        params: &[(&str, S)],
    ) -> Result<Url, RapidProError> {
        let mut url = self
            .base_url
            .join(endpoint)
            .map_err(|e| RapidProError::Client(format!("invalid endpoint '{endpoint}': {e}")))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v.as_ref());
            }
        }
        Ok(url)
    }

    /// Follows `next` links from a list endpoint, collecting every page's
    /// results. Each page fetch goes through the retry policy independently.
    async fn get_all_pages<T: serde::de::DeserializeOwned>(
        &self,
        first: Url,
        context: &str,
    ) -> Result<Vec<T>, RapidProError> {
        let mut results = Vec::new();
        let mut next = Some(first);
        let mut page_no = 1u32;
        while let Some(url) = next {
            let page: Page<T> = self.get_json(url, &format!("{context} page {page_no}")).await?;
            results.extend(page.results);
            next = match page.next.as_deref() {
                Some(href) => Some(Url::parse(href).map_err(|e| {
                    RapidProError::Client(format!("invalid next link '{href}': {e}"))
                })?),
                None => None,
            };
            page_no += 1;
        }
        Ok(results)
    }

    /// Sends a GET request with retry, asserts a 2xx HTTP status, and parses
    /// the response body.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        context: &str,
    ) -> Result<T, RapidProError> {
        let body = retry_with_backoff(self.max_retries, self.backoff_base_ms, || {
            let url = url.clone();
            async move {
                let response = self.client.get(url).send().await?;
                let response = response.error_for_status()?;
                Ok(response.text().await?)
            }
        })
        .await?;
        serde_json::from_str(&body).map_err(|e| RapidProError::Deserialize {
            context: context.to_owned(),
            source: e,
        })
    }

    /// Sends a POST request with a JSON body and retry, asserts a 2xx HTTP
    /// status, and parses the response body.
    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
        context: &str,
    ) -> Result<T, RapidProError> {
        let text = retry_with_backoff(self.max_retries, self.backoff_base_ms, || {
            let url = url.clone();
            async move {
                let response = self.client.post(url).json(body).send().await?;
                let response = response.error_for_status()?;
                Ok(response.text().await?)
            }
        })
        .await?;
        serde_json::from_str(&text).map_err(|e| RapidProError::Deserialize {
            context: context.to_owned(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_client(base_url: &str) -> RapidProClient {
        RapidProClient::with_base_url("test-token", 5, base_url)
            .expect("client construction should not fail")
            .with_retry_policy(0, 1)
    }

    #[test]
    fn build_url_appends_endpoint_and_params() {
        let client = test_client("http://localhost:1234/api/v1");
        let url = client
            .build_url("flows.json", &[("archived", "false")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:1234/api/v1/flows.json?archived=false"
        );
    }

    #[tokio::test]
    async fn get_flows_sends_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flows.json"))
            .and(header("authorization", "Token test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "next": null,
                "results": [{
                    "uuid": "00000000-0000-0000-0000-000000000001",
                    "name": "Weekly Poll",
                    "archived": false,
                    "rulesets": []
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let flows = client.get_flows(None).await.unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].name, "Weekly Poll");
        assert!(!flows[0].archived);
    }

    #[tokio::test]
    async fn get_runs_follows_pagination() {
        let server = MockServer::start().await;
        let flow = Uuid::nil();
        let run = |id: i64| {
            json!({
                "id": id,
                "flow": flow,
                "contact": "00000000-0000-0000-0000-0000000000aa",
                "created_on": "2026-08-01T10:00:00Z",
                "completed": true,
                "values": []
            })
        };

        Mock::given(method("GET"))
            .and(path("/runs.json"))
            .and(query_param("flow_uuid", flow.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "next": format!("{}/runs.json?page=2", server.uri()),
                "results": [run(1)]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/runs.json"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "next": null,
                "results": [run(2)]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let runs = client.get_runs_for_flow(flow, None).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, 1);
        assert_eq!(runs[1].id, 2);
    }

    #[tokio::test]
    async fn server_error_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flows.json"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flows.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 0,
                "next": null,
                "results": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RapidProClient::with_base_url("test-token", 5, &server.uri())
            .unwrap()
            .with_retry_policy(2, 1);
        let flows = client.get_flows(Some(false)).await.unwrap();
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn missing_contact_is_a_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contacts.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 0,
                "next": null,
                "results": []
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.get_contact(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, RapidProError::Client(_)));
    }
}
