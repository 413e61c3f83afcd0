use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{Account, Error, Meter, MeterReading};

pub const AUTH_ENDPOINT: &str = "/account/signin";
pub const METERS_ENDPOINT: &str = "/api/2/meters";
pub const SEARCH_ENDPOINT: &str = "/api/2/search/meters";

const AUTH_REJECTED_MARKER: &str = "Username or password was not recognized";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the shared HTTP session. The sign-in cookie lives in its jar.
pub fn build_session() -> Result<reqwest::Client, Error> {
    Ok(reqwest::Client::builder()
        .cookie_store(true)
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

pub struct Client {
    session: reqwest::Client,
    account: Account,
    authenticated: AtomicBool,
}

impl Client {
    pub fn new(session: reqwest::Client, account: Account) -> Self {
        Self {
            session,
            account,
            authenticated: AtomicBool::new(false),
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    /// Signs in with the account credentials
    pub async fn authenticate(&self) -> Result<(), Error> {
        let url = format!("{}{}", self.account.base_url(), AUTH_ENDPOINT);
        debug!(%url, username = %self.account.username, "signing in to EyeOnWater");

        let response = self
            .session
            .post(&url)
            .form(&[
                ("username", self.account.username.as_str()),
                ("password", self.account.password.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::FORBIDDEN || body.contains(AUTH_REJECTED_MARKER) {
            self.authenticated.store(false, Ordering::Relaxed);
            return Err(Error::Auth(format!(
                "username or password was not recognized for {}",
                self.account.username
            )));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Api("sign-in was rate limited".to_string()));
        }
        if !status.is_success() {
            return Err(Error::Api(format!("sign-in failed (HTTP {status})")));
        }

        self.authenticated.store(true, Ordering::Relaxed);
        debug!("sign-in successful");
        Ok(())
    }

    /// Lists the meters attached to the account
    pub async fn discover_meters(&self) -> Result<Vec<Arc<Meter>>, Error> {
        let listings: Vec<MeterListing> = self.request(Method::GET, METERS_ENDPOINT, None).await?;
        debug!(count = listings.len(), "discovered meters");
        Ok(listings
            .into_iter()
            .map(|listing| Arc::new(Meter::new(listing.meter_uuid, listing.meter_info)))
            .collect())
    }

    /// Fetches the latest flags and register read for `meter` and stores them on it
    pub async fn read_meter(&self, meter: &Meter) -> Result<(), Error> {
        let query = json!({"query": {"terms": {"meter.meter_uuid": [meter.meter_uuid()]}}});
        let response: SearchResponse = self
            .request(Method::POST, SEARCH_ENDPOINT, Some(&query))
            .await?;

        let hit = response
            .elastic_results
            .hits
            .hits
            .into_iter()
            .next()
            .ok_or_else(|| Error::Api(format!("meter {} not found", meter.meter_uuid())))?;

        let source = hit.source;
        let reading = source.register_0.latest_read.map(|read| MeterReading {
            full_read: read.full_read,
            units: read.units,
        });
        meter.update(source.meter, source.register_0.flags, reading);
        Ok(())
    }

    /// Sends an authenticated request, signing in again once if the session expired
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, Error> {
        if !self.is_authenticated() {
            self.authenticate().await?;
        }

        let url = format!("{}{}", self.account.base_url(), path);
        let mut signed_in_again = false;
        loop {
            let mut request = self.session.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            let status = response.status();

            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) && !signed_in_again {
                debug!(%url, "session expired, signing in again");
                self.authenticated.store(false, Ordering::Relaxed);
                self.authenticate().await?;
                signed_in_again = true;
                continue;
            }
            if !status.is_success() {
                return Err(Error::Api(format!("{method} {path} failed (HTTP {status})")));
            }

            let text = response.text().await?;
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

#[derive(Debug, Deserialize)]
struct MeterListing {
    meter_uuid: String,
    #[serde(flatten)]
    meter_info: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    elastic_results: ElasticResults,
}

#[derive(Debug, Deserialize)]
struct ElasticResults {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: MeterSource,
}

#[derive(Debug, Deserialize)]
struct MeterSource {
    #[serde(default)]
    meter: Map<String, Value>,
    register_0: Register,
}

#[derive(Debug, Deserialize)]
struct Register {
    #[serde(default)]
    flags: Map<String, Value>,
    latest_read: Option<LatestRead>,
}

#[derive(Debug, Deserialize)]
struct LatestRead {
    full_read: f64,
    #[serde(default)]
    units: Option<String>,
}

#[cfg(test)]
mod test_eow_client {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> Client {
        let account =
            Account::new("eyeonwater.com", "user@example.com", "secret", false).with_base_url(server.url());
        Client::new(reqwest::Client::new(), account)
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", AUTH_ENDPOINT)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("username".into(), "user@example.com".into()),
                Matcher::UrlEncoded("password".into(), "secret".into()),
            ]))
            .with_status(200)
            .with_body("<html>dashboard</html>")
            .create_async()
            .await;

        let client = client_for(&server);
        client.authenticate().await.unwrap();

        assert!(client.is_authenticated());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_authenticate_rejected_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", AUTH_ENDPOINT)
            .with_status(200)
            .with_body("<p>Username or password was not recognized</p>")
            .create_async()
            .await;

        let client = client_for(&server);
        let result = client.authenticate().await;

        assert!(matches!(result, Err(Error::Auth(_))));
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_authenticate_forbidden() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", AUTH_ENDPOINT)
            .with_status(403)
            .create_async()
            .await;

        let result = client_for(&server).authenticate().await;
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_authenticate_server_error_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", AUTH_ENDPOINT)
            .with_status(503)
            .create_async()
            .await;

        let result = client_for(&server).authenticate().await;
        assert!(matches!(result, Err(Error::Api(_))));
    }

    #[tokio::test]
    async fn test_authenticate_connection_refused_is_transport_error() {
        // Bind then drop to get a port with nothing listening on it
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let account = Account::new("eyeonwater.com", "user", "secret", false)
            .with_base_url(format!("http://127.0.0.1:{port}"));

        let result = Client::new(reqwest::Client::new(), account).authenticate().await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_authenticate_timeout() {
        // Accepts connections into the backlog but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let account = Account::new("eyeonwater.com", "user", "secret", false)
            .with_base_url(format!("http://{}", listener.local_addr().unwrap()));
        let session = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        let result = Client::new(session, account).authenticate().await;
        assert!(matches!(result, Err(Error::Timeout)));
        drop(listener);
    }

    #[tokio::test]
    async fn test_discover_meters() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", AUTH_ENDPOINT)
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", METERS_ENDPOINT)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"meter_uuid": "5215777958325016766", "meter_id": "200024940"},
                    {"meter_uuid": "1234", "meter_id": "300"}
                ]"#,
            )
            .create_async()
            .await;

        let meters = client_for(&server).discover_meters().await.unwrap();

        assert_eq!(meters.len(), 2);
        assert_eq!(meters[0].meter_uuid(), "5215777958325016766");
        assert_eq!(meters[0].meter_id(), "200024940");
        assert_eq!(meters[1].meter_id(), "300");
    }

    #[tokio::test]
    async fn test_read_meter_updates_flags_and_reading() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", AUTH_ENDPOINT)
            .with_status(200)
            .create_async()
            .await;
        let search = server
            .mock("POST", SEARCH_ENDPOINT)
            .match_body(Matcher::PartialJson(serde_json::json!({
                "query": {"terms": {"meter.meter_uuid": ["uuid-1"]}}
            })))
            .with_status(200)
            .with_body(
                r#"{
                    "elastic_results": {"hits": {"hits": [{
                        "_source": {
                            "meter": {"meter_id": "100"},
                            "register_0": {
                                "flags": {"Leak": true, "EmptyPipe": false},
                                "latest_read": {"full_read": 4321.5, "units": "GAL"}
                            }
                        }
                    }]}}
                }"#,
            )
            .create_async()
            .await;

        let meter = Meter::new("uuid-1", Map::new());
        client_for(&server).read_meter(&meter).await.unwrap();

        search.assert_async().await;
        assert_eq!(meter.get_flags("Leak"), Some(Value::Bool(true)));
        assert_eq!(meter.get_flags("EmptyPipe"), Some(Value::Bool(false)));
        assert_eq!(meter.meter_id(), "100");
        let reading = meter.reading().unwrap();
        assert_eq!(reading.full_read, 4321.5);
        assert_eq!(reading.units.as_deref(), Some("GAL"));
    }

    #[tokio::test]
    async fn test_read_meter_without_hits_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", AUTH_ENDPOINT)
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("POST", SEARCH_ENDPOINT)
            .with_status(200)
            .with_body(r#"{"elastic_results": {"hits": {"hits": []}}}"#)
            .create_async()
            .await;

        let meter = Meter::new("uuid-1", Map::new());
        let result = client_for(&server).read_meter(&meter).await;
        assert!(matches!(result, Err(Error::Api(_))));
    }

    #[tokio::test]
    async fn test_read_meter_malformed_body_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", AUTH_ENDPOINT)
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("POST", SEARCH_ENDPOINT)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let meter = Meter::new("uuid-1", Map::new());
        let result = client_for(&server).read_meter(&meter).await;
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_expired_session_signs_in_again_once() {
        let mut server = mockito::Server::new_async().await;
        let sign_in = server
            .mock("POST", AUTH_ENDPOINT)
            .with_status(200)
            .expect(2)
            .create_async()
            .await;
        let listing = server
            .mock("GET", METERS_ENDPOINT)
            .with_status(401)
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server);
        let result = client.discover_meters().await;

        // Initial sign-in, one retry after the 401, then the second 401 is reported
        assert!(matches!(result, Err(Error::Api(_))));
        sign_in.assert_async().await;
        listing.assert_async().await;
    }
}
