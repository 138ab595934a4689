use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

const LOGIN_PATH: &str = "/api/login";
const WEBHOOK_PATH: &str = "/webhook/chat/";
const GENERIC_REJECTION: &str = "Login failed. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("Please enter your username and password.")]
    MissingCredentials,

    #[error("{message}")]
    Rejected { message: String },

    #[error("Could not reach the server. Check your connection.")]
    Network { detail: String },

    #[error("The server returned an unreadable login response.")]
    Format,
}

/// Signed-in user and the webhook bound to them. Stored as `{name, webhook}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSession {
    pub name: String,
    #[serde(rename = "webhook")]
    pub webhook_url: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Exchanges credentials for a per-user webhook endpoint.
#[derive(Clone)]
pub struct LoginClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl LoginClient {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(reqwest::Client::new(), timeout)
    }

    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn login(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<LoginSession, LoginError> {
        if username.trim().is_empty() || password.trim().is_empty() {
            return Err(LoginError::MissingCredentials);
        }

        let base = base_url.trim().trim_end_matches('/');
        let response = self
            .client
            .post(format!("{}{}", base, LOGIN_PATH))
            .timeout(self.timeout)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Login request failed");
                LoginError::Network {
                    detail: e.to_string(),
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| LoginError::Network {
            detail: e.to_string(),
        })?;
        let parsed = serde_json::from_str::<Value>(&body).ok();

        if !status.is_success() {
            let message = parsed
                .as_ref()
                .and_then(|v| v.get("message"))
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or(GENERIC_REJECTION)
                .to_string();
            warn!(status = status.as_u16(), "Login rejected");
            return Err(LoginError::Rejected { message });
        }

        let body = parsed.ok_or_else(|| {
            warn!(status = status.as_u16(), "Login response was not JSON");
            LoginError::Format
        })?;

        let name = body
            .pointer("/user/name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(username)
            .to_string();

        info!(user = %name, "Login succeeded");
        Ok(LoginSession {
            name,
            webhook_url: format!("{}{}{}", base, WEBHOOK_PATH, username.to_lowercase()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> LoginClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        LoginClient::new(http, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_successful_login_builds_webhook_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .and(body_json(json!({"username": "Alice", "password": "secret"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"user": {"name": "Alice Doe"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = client()
            .login(&format!("{}/", server.uri()), "Alice", "secret")
            .await
            .unwrap();
        assert_eq!(session.name, "Alice Doe");
        assert_eq!(
            session.webhook_url,
            format!("{}/webhook/chat/alice", server.uri())
        );
    }

    #[tokio::test]
    async fn test_name_falls_back_to_username() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let session = client().login(&server.uri(), "bob", "pw").await.unwrap();
        assert_eq!(session.name, "bob");
    }

    #[tokio::test]
    async fn test_rejection_uses_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid credentials"})),
            )
            .mount(&server)
            .await;

        let result = client().login(&server.uri(), "bob", "wrong").await;
        assert_eq!(
            result,
            Err(LoginError::Rejected {
                message: "Invalid credentials".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_rejection_without_message_is_generic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let err = client().login(&server.uri(), "bob", "pw").await.unwrap_err();
        assert_eq!(err.to_string(), GENERIC_REJECTION);
    }

    #[tokio::test]
    async fn test_non_json_success_is_format_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let result = client().login(&server.uri(), "bob", "pw").await;
        assert_eq!(result, Err(LoginError::Format));
    }

    #[tokio::test]
    async fn test_blank_credentials_skip_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = client().login(&server.uri(), "  ", "pw").await;
        assert_eq!(result, Err(LoginError::MissingCredentials));
    }

    #[test]
    fn test_session_storage_shape() {
        let session = LoginSession {
            name: "Alice".to_string(),
            webhook_url: "https://host/webhook/chat/alice".to_string(),
        };
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value, json!({"name": "Alice", "webhook": "https://host/webhook/chat/alice"}));
    }
}
