// Authenticated HTTP session against the IMS portal
use crate::domain::account::Credentials;
use crate::domain::error::{PortalError, PortalResult};
use crate::infrastructure::portal_models::AuthResponse;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const SESSION_COOKIE: &str = "SsdAccessToken";

/// Portal endpoint URLs derived from one base URL.
#[derive(Debug, Clone)]
pub struct PortalEndpoints {
    base_url: String,
}

impl PortalEndpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn login(&self) -> String {
        format!("{}/account/login", self.base_url)
    }

    pub fn points_of_delivery(&self) -> String {
        format!(
            "{}/consumption-production/profile-data/get-points-of-delivery",
            self.base_url
        )
    }

    pub fn profile_data(&self) -> String {
        format!("{}/consumption-production/profile-data", self.base_url)
    }

    pub fn chart_data(&self) -> String {
        format!(
            "{}/consumption-production/profile-data/chart-data",
            self.base_url
        )
    }
}

#[derive(Default)]
struct SessionState {
    authenticated: bool,
    token: Option<String>,
    credentials: Option<Credentials>,
}

/// An expired session answers with the HTML login page instead of JSON.
pub fn is_session_expired(headers: &HeaderMap) -> bool {
    let expired = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_lowercase().contains("text/html"))
        .unwrap_or(false);
    if expired {
        tracing::warn!("Session expired - received HTML response instead of JSON");
    }
    expired
}

pub struct SessionClient {
    client: Client,
    endpoints: PortalEndpoints,
    state: Mutex<SessionState>,
    generation: AtomicU64,
}

impl SessionClient {
    pub fn new(endpoints: PortalEndpoints, timeout: Duration) -> PortalResult<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoints,
            state: Mutex::new(SessionState::default()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn endpoints(&self) -> &PortalEndpoints {
        &self.endpoints
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().authenticated
    }

    pub fn session_token(&self) -> Option<String> {
        self.state.lock().token.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn logout(&self) {
        let mut state = self.state.lock();
        state.authenticated = false;
        state.token = None;
        state.credentials = None;
        tracing::debug!("Session cleared");
    }

    /// Log in and remember the credentials for later re-authentication.
    pub async fn authenticate(&self, username: &str, password: &str) -> bool {
        {
            let mut state = self.state.lock();
            state.credentials = Some(Credentials::new(username, password));
            state.authenticated = false;
            state.token = None;
        }

        match self.login(username, password).await {
            Ok(token) => {
                match &token {
                    Some(token) => tracing::debug!(
                        "Session token extracted: {}...",
                        token.chars().take(20).collect::<String>()
                    ),
                    None => tracing::warn!("No session token found in response cookies"),
                }
                {
                    let mut state = self.state.lock();
                    state.authenticated = true;
                    state.token = token;
                }
                self.generation.fetch_add(1, Ordering::SeqCst);
                tracing::info!("Authentication successful for user: {}", username);
                true
            }
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        }
    }

    async fn login(&self, username: &str, password: &str) -> PortalResult<Option<String>> {
        let response = self
            .client
            .post(self.endpoints.login())
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| {
                PortalError::AuthenticationFailed(format!("network error: {}", e))
            })?;

        if response.status() != StatusCode::OK {
            return Err(PortalError::AuthenticationFailed(
                response.status().as_u16().to_string(),
            ));
        }

        let token = response
            .cookies()
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string());

        response.json::<AuthResponse>().await.map_err(|e| {
            PortalError::AuthenticationFailed(format!("unexpected login response: {}", e))
        })?;
        Ok(token)
    }

    async fn reauthenticate(&self) -> bool {
        let credentials = {
            let mut state = self.state.lock();
            state.authenticated = false;
            state.token = None;
            state.credentials.clone()
        };
        match credentials {
            Some(credentials) => {
                tracing::info!("Re-authenticating with SSD IMS...");
                self.authenticate(&credentials.username, &credentials.password)
                    .await
            }
            None => {
                tracing::error!("Cannot re-authenticate: no stored credentials");
                false
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> PortalResult<Response> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.map_err(|e| {
            tracing::error!("Network error in authenticated request: {}", e);
            PortalError::from(e)
        })
    }

    /// Send a request on the current session and decode its JSON body.
    ///
    /// An expired session triggers exactly one re-authentication and one
    /// retry. If the retry is not a 200 JSON response it surfaces as
    /// [`PortalError::ApiError`].
    pub async fn request_json(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> PortalResult<Value> {
        if !self.is_authenticated() {
            return Err(PortalError::NotAuthenticated);
        }

        let mut response = self.send(method.clone(), url, body).await?;
        if is_session_expired(response.headers()) {
            tracing::info!("Session expired, attempting re-authentication...");
            if !self.reauthenticate().await {
                return Err(PortalError::ReauthFailed);
            }
            tracing::info!("Re-authentication successful, retrying request...");
            response = self.send(method, url, body).await?;
            if is_session_expired(response.headers()) {
                return Err(PortalError::ApiError {
                    status: response.status().as_u16(),
                });
            }
        }

        if response.status() != StatusCode::OK {
            return Err(PortalError::ApiError {
                status: response.status().as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PortalError::Decode(format!("invalid JSON from {}: {}", url, e)))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{auth_body, login_mock};
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};

    fn client(server: &ServerGuard) -> SessionClient {
        SessionClient::new(
            PortalEndpoints::new(format!("{}/api", server.url())),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoints_trim_trailing_slash() {
        let endpoints = PortalEndpoints::new("https://ims.ssd.sk/api/");
        assert_eq!(endpoints.login(), "https://ims.ssd.sk/api/account/login");
        assert_eq!(
            endpoints.chart_data(),
            "https://ims.ssd.sk/api/consumption-production/profile-data/chart-data"
        );
    }

    #[test]
    fn test_expiry_detection_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        assert!(!is_session_expired(&headers));
        headers.insert(CONTENT_TYPE, "Text/HTML; charset=utf-8".parse().unwrap());
        assert!(is_session_expired(&headers));
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(!is_session_expired(&headers));
    }

    #[tokio::test]
    async fn test_successful_login_extracts_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/account/login")
            .match_body(Matcher::Json(json!({"username": "test_user", "password": "test_pass"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("set-cookie", "SsdAccessToken=abc123; Path=/; HttpOnly")
            .with_body(auth_body())
            .create_async()
            .await;
        let client = client(&server);

        assert!(client.authenticate("test_user", "test_pass").await);
        assert!(client.is_authenticated());
        assert_eq!(client.session_token().as_deref(), Some("abc123"));
        assert_eq!(client.generation(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_login_returns_false() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/account/login")
            .with_status(401)
            .create_async()
            .await;
        let client = client(&server);

        assert!(!client.authenticate("invalid", "invalid").await);
        assert!(!client.is_authenticated());
        assert_eq!(client.generation(), 0);
    }

    #[tokio::test]
    async fn test_malformed_profile_returns_false() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/account/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"userProfile": {"userId": 1}}"#)
            .create_async()
            .await;
        let client = client(&server);

        assert!(!client.authenticate("test_user", "test_pass").await);
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_network_error_returns_false() {
        let client = SessionClient::new(
            PortalEndpoints::new("http://127.0.0.1:1/api"),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!client.authenticate("test_user", "test_pass").await);
    }

    #[tokio::test]
    async fn test_request_requires_login() {
        let server = Server::new_async().await;
        let client = client(&server);
        let err = client
            .request_json(Method::GET, &client.endpoints().points_of_delivery(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_expired_session_reauthenticates_once_and_retries() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/api/account/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("set-cookie", "SsdAccessToken=abc123; Path=/; HttpOnly")
            .with_body(auth_body())
            .expect(2)
            .create_async()
            .await;
        let expired = server
            .mock("GET", "/api/consumption-production/profile-data/get-points-of-delivery")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>login</html>")
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/api/consumption-production/profile-data/get-points-of-delivery")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"text": "99XXX1234560000G (Home)", "value": "v1"}]"#)
            .expect(1)
            .create_async()
            .await;
        let client = client(&server);
        assert!(client.authenticate("test_user", "test_pass").await);

        let body = client
            .request_json(Method::GET, &client.endpoints().points_of_delivery(), None)
            .await
            .unwrap();

        assert_eq!(body[0]["value"], "v1");
        assert_eq!(client.generation(), 2);
        login.assert_async().await;
        expired.assert_async().await;
        fresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_second_expiry_surfaces_as_api_error() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/api/account/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(auth_body())
            .expect(2)
            .create_async()
            .await;
        let expired = server
            .mock("GET", "/api/consumption-production/profile-data/get-points-of-delivery")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>login</html>")
            .expect(2)
            .create_async()
            .await;
        let client = client(&server);
        assert!(client.authenticate("test_user", "test_pass").await);

        let err = client
            .request_json(Method::GET, &client.endpoints().points_of_delivery(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, PortalError::ApiError { status: 200 }));
        expired.assert_async().await;
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_reauthentication() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/account/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(auth_body())
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/api/account/login")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("GET", "/api/consumption-production/profile-data/get-points-of-delivery")
            .with_status(200)
            .with_header("content-type", "text/html")
            .create_async()
            .await;
        let client = client(&server);
        assert!(client.authenticate("test_user", "test_pass").await);

        let err = client
            .request_json(Method::GET, &client.endpoints().points_of_delivery(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, PortalError::ReauthFailed));
        assert!(err.is_auth_failure());
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_non_200_is_api_error() {
        let mut server = Server::new_async().await;
        login_mock(&mut server).await;
        server
            .mock("POST", "/api/consumption-production/profile-data/chart-data")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;
        let client = client(&server);
        assert!(client.authenticate("test_user", "test_pass").await);

        let err = client
            .request_json(Method::POST, &client.endpoints().chart_data(), Some(&json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::ApiError { status: 500 }));
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let mut server = Server::new_async().await;
        login_mock(&mut server).await;
        let client = client(&server);
        assert!(client.authenticate("test_user", "test_pass").await);

        client.logout();
        assert!(!client.is_authenticated());
        assert!(client.session_token().is_none());
    }
}
