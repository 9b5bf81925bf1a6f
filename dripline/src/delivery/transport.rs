//! Outbound transport: the third-party HTTP email API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// One fully rendered message.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    /// `Name <email>` mailbox
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Sends a single message and returns the provider's message id.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<String, TransportError>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Resend HTTP API (`POST /emails`).
pub struct ResendTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl ResendTransport {
    pub fn new(client: Client, api_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: format!("{}/emails", api_url.trim_end_matches('/')),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl EmailTransport for ResendTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": email.from,
                "to": [email.to],
                "subject": email.subject,
                "html": email.html,
            }))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: SendResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(body.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn email() -> OutboundEmail {
        OutboundEmail {
            from: "Example <news@example.com>".to_string(),
            to: "ada@example.com".to_string(),
            subject: "Hello".to_string(),
            html: "<p>Hi Ada</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_posts_message_and_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer re_test")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "from": "Example <news@example.com>",
                "to": ["ada@example.com"],
                "subject": "Hello",
                "html": "<p>Hi Ada</p>",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"49a3999c-0ce1-4ea6-ab68-afcd6dc2e794"}"#)
            .create_async()
            .await;

        // Trailing slash on the base url is tolerated
        let transport = ResendTransport::new(Client::new(), &format!("{}/", server.url()), "re_test");
        let id = transport.send(&email()).await.unwrap();

        assert_eq!(id, "49a3999c-0ce1-4ea6-ab68-afcd6dc2e794");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_provider_rejection_keeps_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name":"validation_error","message":"Invalid `to` field"}"#)
            .create_async()
            .await;

        let transport = ResendTransport::new(Client::new(), &server.url(), "re_test");
        let err = transport.send(&email()).await.unwrap_err();

        match err {
            TransportError::Rejected { status, message } => {
                assert_eq!(status, 422);
                assert!(message.contains("Invalid `to` field"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_success_without_id_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/emails")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"queued":true}"#)
            .create_async()
            .await;

        let transport = ResendTransport::new(Client::new(), &server.url(), "re_test");
        let err = transport.send(&email()).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_network_error() {
        let transport = ResendTransport::new(Client::new(), "http://127.0.0.1:1", "re_test");
        let err = transport.send(&email()).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }
}
