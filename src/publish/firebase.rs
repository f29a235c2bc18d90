//! Firebase Realtime Database publisher over the REST API

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::protocol::{CallHistoryRecord, CallPopupRecord};
use super::CallPublisher;
use crate::monitor::{CallEvent, CallerId, Classification, CustomerProfile, RideSummary};

const CUSTOMERS: &str = "customers";
const RIDES: &str = "rides";
const CALL_POPUP: &str = "callPopup";
const CALL_HISTORY: &str = "callHistory";

/// Shown when a customer entry has no name
const UNKNOWN_NAME: &str = "Unbekannt";

/// Contents of the credentials file
#[derive(Debug, Clone, Deserialize)]
pub struct FirebaseCredentials {
    /// Overrides the configured database URL when present
    #[serde(default)]
    pub database_url: Option<String>,
    /// Database secret or ID token, sent as the `auth` query parameter
    pub auth_token: String,
}

impl FirebaseCredentials {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Firebase credentials not found: {}\n\
                 Next step: open the Firebase console, go to Project settings > \
                 Service accounts > Database secrets, and save\n  \
                 {{ \"auth_token\": \"<secret>\" }}\n\
                 as that file (or pass --auth-token / set CALLWATCH_AUTH_TOKEN).",
                path.display()
            );
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials: {}", path.display()))?;
        let credentials: FirebaseCredentials = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse credentials {}; expected {{ \"auth_token\": \"...\" }}",
                path.display()
            )
        })?;

        if credentials.auth_token.trim().is_empty() {
            anyhow::bail!(
                "Credentials file {} has an empty auth_token; paste the database secret into it",
                path.display()
            );
        }

        Ok(credentials)
    }
}

#[derive(Debug, Deserialize)]
struct CustomerDoc {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

/// Publisher writing to `callPopup` and `callHistory`
pub struct FirebasePublisher {
    client: reqwest::Client,
    database_url: String,
    auth_token: String,
    recent_rides: usize,
}

impl FirebasePublisher {
    pub fn new(
        database_url: &str,
        auth_token: impl Into<String>,
        request_timeout: Duration,
        recent_rides: usize,
    ) -> Result<Self> {
        let database_url = database_url.trim().trim_end_matches('/').to_string();
        if database_url.is_empty() {
            anyhow::bail!(
                "No Firebase database URL configured\n\
                 Next step: set [publisher] database_url in the config file \
                 (or pass --database-url / set CALLWATCH_DATABASE_URL)."
            );
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("callwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .context("Failed to construct HTTP client")?;

        Ok(Self {
            client,
            database_url,
            auth_token: auth_token.into(),
            recent_rides,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.database_url, path)
    }

    /// `orderBy`/`equalTo` query; values are JSON encoded as the REST API expects
    async fn query_equal<T: DeserializeOwned>(
        &self,
        path: &str,
        child: &str,
        value: &str,
        limit_to_last: Option<usize>,
    ) -> Result<BTreeMap<String, T>> {
        let mut params = vec![
            ("orderBy", serde_json::to_string(child)?),
            ("equalTo", serde_json::to_string(value)?),
            ("auth", self.auth_token.clone()),
        ];
        if let Some(limit) = limit_to_last {
            params.push(("limitToLast", limit.to_string()));
        }

        let response = self
            .client
            .get(self.url(path))
            .query(&params)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Request to {} failed", path))?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Query on {} rejected", path))?;

        // An empty result comes back as `null` or `{}`
        let found: Option<BTreeMap<String, T>> = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Unexpected response from {}", path))?;

        Ok(found.unwrap_or_default())
    }

    async fn find_customer(&self, caller: &CallerId) -> Result<Option<CustomerProfile>> {
        let mut found: BTreeMap<String, CustomerDoc> =
            self.query_equal(CUSTOMERS, "phone", caller.as_str(), None).await?;

        if found.is_empty() && caller.digits() != caller.as_str() {
            debug!("No customer for {}, retrying with {}", caller, caller.digits());
            found = self
                .query_equal(CUSTOMERS, "phone", caller.digits(), None)
                .await?;
        }

        Ok(found.into_iter().next().map(|(id, doc)| CustomerProfile {
            id,
            name: doc.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            address: doc.address.unwrap_or_default(),
            email: doc.email.unwrap_or_default(),
        }))
    }

    async fn recent_rides(&self, customer_id: &str) -> Result<Vec<RideSummary>> {
        let rides: BTreeMap<String, serde_json::Value> = self
            .query_equal(RIDES, "customerId", customer_id, Some(self.recent_rides))
            .await?;

        // One odd entry must not hide the customer
        Ok(rides
            .into_iter()
            .filter_map(|(id, ride)| match serde_json::from_value(ride) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("Skipping unreadable ride {}: {}", id, e);
                    None
                }
            })
            .collect())
    }

    async fn write<T: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        self.client
            .request(method, self.url(path))
            .query(&[("auth", self.auth_token.as_str())])
            .json(body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Request to {} failed", path))?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Write to {} rejected", path))
    }
}

#[async_trait]
impl CallPublisher for FirebasePublisher {
    async fn lookup(&self, caller: &CallerId) -> Result<Classification> {
        let Some(customer) = self.find_customer(caller).await? else {
            return Ok(Classification::New);
        };

        let last_rides = self.recent_rides(&customer.id).await?;
        Ok(Classification::Existing {
            customer,
            last_rides,
        })
    }

    async fn publish(&self, event: &CallEvent) -> Result<()> {
        let popup = CallPopupRecord::from(event);
        self.write(reqwest::Method::PUT, CALL_POPUP, &popup).await?;

        let history = CallHistoryRecord::from(event);
        let pushed: PushResponse = self
            .write(reqwest::Method::POST, CALL_HISTORY, &history)
            .await?
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Unexpected response from callHistory")?;

        info!("Call from {} stored as callHistory/{}", event.caller, pushed.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use httpmock::Method::{GET, POST, PUT};
    use httpmock::MockServer;
    use tempfile::tempdir;

    fn publisher(url: &str) -> FirebasePublisher {
        FirebasePublisher::new(url, "secret", Duration::from_secs(5), 5).unwrap()
    }

    #[test]
    fn test_url_building() {
        let p = publisher("https://taxi-default-rtdb.europe-west1.firebasedatabase.app/");
        assert_eq!(
            p.database_url(),
            "https://taxi-default-rtdb.europe-west1.firebasedatabase.app"
        );
        assert_eq!(
            p.url(CALL_POPUP),
            "https://taxi-default-rtdb.europe-west1.firebasedatabase.app/callPopup.json"
        );
    }

    #[test]
    fn test_empty_database_url_is_rejected() {
        let err = FirebasePublisher::new("  ", "secret", Duration::from_secs(5), 5)
            .err()
            .unwrap();
        assert!(err.to_string().contains("database_url"));
    }

    #[test]
    fn test_load_credentials() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("firebase-key.json");
        std::fs::write(
            &path,
            r#"{"auth_token":"abc","database_url":"https://x.firebaseio.com"}"#,
        )
        .unwrap();

        let creds = FirebaseCredentials::load(&path).unwrap();
        assert_eq!(creds.auth_token, "abc");
        assert_eq!(creds.database_url.as_deref(), Some("https://x.firebaseio.com"));
    }

    #[test]
    fn test_missing_credentials_explain_next_step() {
        let dir = tempdir().unwrap();
        let err = FirebaseCredentials::load(&dir.path().join("firebase-key.json")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("Next step"));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("firebase-key.json");
        std::fs::write(&path, r#"{"auth_token":"  "}"#).unwrap();
        assert!(FirebaseCredentials::load(&path).is_err());
    }

    #[test]
    fn test_customer_doc_tolerates_missing_fields() {
        let docs: BTreeMap<String, CustomerDoc> =
            serde_json::from_str(r#"{"-Na":{"phone":"+4911"}}"#).unwrap();
        assert!(docs["-Na"].name.is_none());

        let empty: Option<BTreeMap<String, CustomerDoc>> = serde_json::from_str("null").unwrap();
        assert!(empty.is_none());
    }

    fn caller(raw: &str) -> CallerId {
        CallerId::normalize(raw).unwrap()
    }

    fn new_call() -> CallEvent {
        CallEvent::new(caller("+4912345"), "+4930111", Utc::now(), Classification::New)
    }

    #[tokio::test]
    async fn test_unknown_caller_is_new() {
        let server = MockServer::start();
        let raw = server.mock(|when, then| {
            when.method(GET)
                .path("/customers.json")
                .query_param("orderBy", "\"phone\"")
                .query_param("equalTo", "\"+4912345\"")
                .query_param("auth", "secret");
            then.status(200).body("null");
        });
        let digits = server.mock(|when, then| {
            when.method(GET)
                .path("/customers.json")
                .query_param("equalTo", "\"4912345\"");
            then.status(200).body("{}");
        });

        let p = publisher(&server.base_url());
        let classification = p.lookup(&caller("+4912345")).await.unwrap();

        assert_eq!(classification, Classification::New);
        assert_eq!(raw.hits(), 1);
        assert_eq!(digits.hits(), 1);
    }

    #[tokio::test]
    async fn test_plain_number_is_queried_once() {
        let server = MockServer::start();
        let customers = server.mock(|when, then| {
            when.method(GET).path("/customers.json");
            then.status(200).body("null");
        });

        let p = publisher(&server.base_url());
        assert_eq!(p.lookup(&caller("030123")).await.unwrap(), Classification::New);
        assert_eq!(customers.hits(), 1);
    }

    #[tokio::test]
    async fn test_digits_retry_finds_customer_with_rides() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/customers.json")
                .query_param("equalTo", "\"+4912345\"");
            then.status(200).body("null");
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/customers.json")
                .query_param("equalTo", "\"4912345\"");
            then.status(200).body(
                r#"{"-Nb":{"name":"Berta","phone":"4912345"},"-Na":{"phone":"4912345","address":"Seestr. 1"}}"#,
            );
        });
        let rides = server.mock(|when, then| {
            when.method(GET)
                .path("/rides.json")
                .query_param("orderBy", "\"customerId\"")
                .query_param("equalTo", "\"-Na\"")
                .query_param("limitToLast", "5");
            then.status(200).body(
                r#"{"-R1":{"pickup":"Bahnhof","destination":"Klinik","timestamp":1738000000000},"-R2":"garbled"}"#,
            );
        });

        let p = publisher(&server.base_url());
        let classification = p.lookup(&caller("+4912345")).await.unwrap();

        let Classification::Existing {
            customer,
            last_rides,
        } = classification
        else {
            panic!("expected an existing customer");
        };
        assert_eq!(customer.id, "-Na");
        assert_eq!(customer.name, "Unbekannt");
        assert_eq!(customer.address, "Seestr. 1");
        assert_eq!(last_rides.len(), 1);
        assert_eq!(last_rides[0].pickup, "Bahnhof");
        assert_eq!(rides.hits(), 1);
    }

    #[tokio::test]
    async fn test_publish_writes_popup_then_history() {
        let server = MockServer::start();
        let popup = server.mock(|when, then| {
            when.method(PUT)
                .path("/callPopup.json")
                .query_param("auth", "secret")
                .body_contains("\"caller\":\"+4912345\"")
                .body_contains("\"type\":\"new\"");
            then.status(200).body("{}");
        });
        let history = server.mock(|when, then| {
            when.method(POST)
                .path("/callHistory.json")
                .query_param("auth", "secret")
                .body_contains("\"customerFound\":false");
            then.status(200).body(r#"{"name":"-NpushId"}"#);
        });

        publisher(&server.base_url())
            .publish(&new_call())
            .await
            .unwrap();

        popup.assert();
        history.assert();
    }

    #[tokio::test]
    async fn test_rejected_popup_skips_history() {
        let server = MockServer::start();
        let popup = server.mock(|when, then| {
            when.method(PUT).path("/callPopup.json");
            then.status(401).body(r#"{"error":"Permission denied"}"#);
        });
        let history = server.mock(|when, then| {
            when.method(POST).path("/callHistory.json");
            then.status(200).body(r#"{"name":"-NpushId"}"#);
        });

        let err = publisher(&server.base_url())
            .publish(&new_call())
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("callPopup"));
        assert_eq!(popup.hits(), 1);
        assert_eq!(history.hits(), 0);
    }

    #[tokio::test]
    async fn test_failed_query_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/customers.json");
            then.status(500);
        });

        let p = publisher(&server.base_url());
        assert!(p.lookup(&caller("+4912345")).await.is_err());
    }

    #[tokio::test]
    async fn test_errors_do_not_reveal_auth_token() {
        let unreachable =
            FirebasePublisher::new("http://127.0.0.1:1", "TOPSECRET", Duration::from_secs(2), 5)
                .unwrap();
        let err = unreachable.publish(&new_call()).await.unwrap_err();
        assert!(!format!("{:#}", err).contains("TOPSECRET"));
        let err = unreachable.lookup(&caller("+4912345")).await.unwrap_err();
        assert!(!format!("{:#}", err).contains("TOPSECRET"));

        let server = MockServer::start();
        server.mock(|when, then| {
            when.path_contains(".json");
            then.status(403);
        });
        let rejected =
            FirebasePublisher::new(&server.base_url(), "TOPSECRET", Duration::from_secs(2), 5)
                .unwrap();
        let err = rejected.lookup(&caller("+4912345")).await.unwrap_err();
        assert!(!format!("{:#}", err).contains("TOPSECRET"));
        let err = rejected.publish(&new_call()).await.unwrap_err();
        assert!(!format!("{:#}", err).contains("TOPSECRET"));
    }
}
