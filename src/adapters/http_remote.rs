//! HTTP adapter for the Remote Sync Bridge.
//!
//! A thin, stateless translation from engine intents to the authoritative
//! backend's REST API. No retry logic lives here — failures are classified
//! and returned; the retry scheduler decides what happens next.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use crate::error::{classify_reqwest_error, NetworkError, SyncError, SyncResult};
use crate::models::{Message, MessagePatch, MessageRole, Thread, ThreadPatch};
use crate::traits::{GenerateRequest, RemoteSyncBridge};

/// Default base URL for the sync backend; overridable through
/// [`SyncConfig`](crate::config::SyncConfig).
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Remote bridge backed by the backend's REST API.
pub struct HttpRemoteBridge {
    base_url: String,
    client: Client,
    api_token: Option<String>,
}

impl HttpRemoteBridge {
    /// Create a bridge against the default base URL.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    /// Create a bridge against a custom base URL.
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            base_url,
            client: Client::new(),
            api_token: None,
        }
    }

    /// Attach a bearer token to every request.
    pub fn with_api_token(mut self, token: String) -> Self {
        self.api_token = Some(token);
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send<B: Serialize>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> SyncResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| SyncError::Network(classify_reqwest_error(&err, &url)))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        if status == 429 {
            Err(SyncError::Network(NetworkError::RateLimited {
                retry_after_secs: None,
            }))
        } else if status >= 500 || status == 408 {
            Err(SyncError::Network(NetworkError::HttpStatus {
                status,
                message,
            }))
        } else {
            Err(SyncError::Rejected { status, message })
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> SyncResult<T> {
        response.json::<T>().await.map_err(|err| {
            SyncError::Network(NetworkError::InvalidResponse {
                message: err.to_string(),
            })
        })
    }
}

impl Default for HttpRemoteBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSyncBridge for HttpRemoteBridge {
    async fn list_threads(&self) -> SyncResult<Vec<Thread>> {
        let response = self
            .send::<()>(reqwest::Method::GET, "/v1/threads", None)
            .await?;
        Self::decode(response).await
    }

    async fn create_thread(
        &self,
        title: &str,
        provider: &str,
        model: &str,
    ) -> SyncResult<Thread> {
        let body = json!({ "title": title, "provider": provider, "model": model });
        let response = self
            .send(reqwest::Method::POST, "/v1/threads", Some(&body))
            .await?;
        Self::decode(response).await
    }

    async fn update_thread(&self, id: &str, patch: &ThreadPatch) -> SyncResult<()> {
        self.send(
            reqwest::Method::PATCH,
            &format!("/v1/threads/{}", id),
            Some(patch),
        )
        .await?;
        Ok(())
    }

    async fn delete_thread(&self, id: &str) -> SyncResult<()> {
        self.send::<()>(reqwest::Method::DELETE, &format!("/v1/threads/{}", id), None)
            .await?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> SyncResult<Vec<Message>> {
        let response = self
            .send::<()>(
                reqwest::Method::GET,
                &format!("/v1/threads/{}/messages", thread_id),
                None,
            )
            .await?;
        Self::decode(response).await
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
        attachment_ids: &[String],
    ) -> SyncResult<Message> {
        let body = json!({
            "role": role,
            "content": content,
            "attachmentIds": attachment_ids,
        });
        let response = self
            .send(
                reqwest::Method::POST,
                &format!("/v1/threads/{}/messages", thread_id),
                Some(&body),
            )
            .await?;
        Self::decode(response).await
    }

    async fn update_message(&self, id: &str, patch: &MessagePatch) -> SyncResult<()> {
        self.send(
            reqwest::Method::PATCH,
            &format!("/v1/messages/{}", id),
            Some(patch),
        )
        .await?;
        Ok(())
    }

    async fn delete_message(&self, id: &str) -> SyncResult<()> {
        self.send::<()>(
            reqwest::Method::DELETE,
            &format!("/v1/messages/{}", id),
            None,
        )
        .await?;
        Ok(())
    }

    async fn generate_response(&self, request: &GenerateRequest) -> SyncResult<()> {
        let body = json!({
            "threadId": request.thread_id,
            "userMessageId": request.user_message_id,
            "provider": request.provider,
            "model": request.model,
            "apiKey": request.api_key,
            "systemPrompt": request.system_prompt,
        });
        self.send(reqwest::Method::POST, "/v1/generate", Some(&body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_thread_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": "Test",
            "ownerId": "user-1",
            "lastMessageAt": "2026-08-01T10:00:00Z",
            "provider": "anthropic",
            "model": "claude-3",
            "version": 1,
            "isOptimistic": false,
            "lastModified": "2026-08-01T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_list_threads_decodes_entities() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/threads"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([sample_thread_json("t1"), sample_thread_json("t2")])),
            )
            .mount(&server)
            .await;

        let bridge = HttpRemoteBridge::with_base_url(server.uri());
        let threads = bridge.list_threads().await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, "t1");
        assert_eq!(threads[0].owner_id, "user-1");
    }

    #[tokio::test]
    async fn test_create_thread_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/threads"))
            .and(body_partial_json(json!({ "title": "Hi", "model": "claude-3" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(sample_thread_json("t-new")))
            .mount(&server)
            .await;

        let bridge = HttpRemoteBridge::with_base_url(server.uri());
        let thread = bridge
            .create_thread("Hi", "anthropic", "claude-3")
            .await
            .unwrap();
        assert_eq!(thread.id, "t-new");
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/threads"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let bridge = HttpRemoteBridge::with_base_url(server.uri());
        let err = bridge
            .create_thread("Hi", "anthropic", "claude-3")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Rejected { status: 403, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/threads"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let bridge = HttpRemoteBridge::with_base_url(server.uri());
        let err = bridge.list_threads().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/threads/t1"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let bridge = HttpRemoteBridge::with_base_url(server.uri());
        let err = bridge.delete_thread("t1").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Network(NetworkError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Port 1 is never listening.
        let bridge = HttpRemoteBridge::with_base_url("http://127.0.0.1:1".to_string());
        let err = bridge.list_threads().await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_generate_response_posts_opaque_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generate"))
            .and(body_partial_json(json!({ "threadId": "t1", "userMessageId": "m1" })))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let bridge = HttpRemoteBridge::with_base_url(server.uri());
        bridge
            .generate_response(&GenerateRequest {
                thread_id: "t1".to_string(),
                user_message_id: "m1".to_string(),
                provider: "anthropic".to_string(),
                model: "claude-3".to_string(),
                api_key: None,
                system_prompt: None,
            })
            .await
            .unwrap();
    }
}
