//! Thin REST client for the Reelchat service.
//!
//! Every endpoint the client consumes lives here. The coordinators only see
//! the [`ChatBackend`] trait so they can run against fakes.

use crate::error::ApiError;
use crate::models::{
    AuthResponse, AuthStatus, ChatHistoryEntry, Conversation, DeleteResponse, ErrorBody,
    HealthStatus, History, Message, MessagesEnvelope, VideoAnalysisEntry,
};
use crate::validation::{validate_attachments, validate_conversation_title, Attachment};
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// The calls the session and poll coordinators depend on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `GET /user/tokens`. Dropping the future aborts the request.
    async fn fetch_tokens(&self) -> Result<Value, ApiError>;

    /// `GET /conversations/{id}/messages`.
    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError>;

    /// `POST /send_message`.
    async fn send_message(
        &self,
        message: &str,
        attachments: &[Attachment],
        conversation_id: Option<&str>,
    ) -> Result<Value, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: Url) -> Result<Self, ApiError> {
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Validation(format!(
                "base url `{base_url}` cannot carry paths"
            )));
        }
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|err| ApiError::Network(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Validation(format!("base url `{}` cannot carry paths", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Whether the server considers this client logged in. Failures count as
    /// "no".
    pub async fn check_auth(&self) -> bool {
        let result: Result<AuthStatus, ApiError> = async {
            let response = self.http.get(self.endpoint(&["auth_status"])?).send().await?;
            read_json(response, "Failed to check authentication").await
        }
        .await;
        match result {
            Ok(status) => status.authenticated,
            Err(err) => {
                warn!(%err, "auth check failed");
                false
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        self.credentials(&["login"], email, password, "Login failed")
            .await
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        self.credentials(&["signup"], email, password, "Signup failed")
            .await
    }

    async fn credentials(
        &self,
        segments: &[&str],
        email: &str,
        password: &str,
        fallback: &str,
    ) -> Result<AuthResponse, ApiError> {
        let response = self
            .http
            .post(self.endpoint(segments)?)
            .form(&[("email", email), ("password", password)])
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return read_json(response, fallback).await;
        }
        if status.is_server_error() {
            return Err(error_from_response(response, fallback).await);
        }
        let reason = error_reason(response)
            .await
            .unwrap_or_else(|| fallback.to_string());
        Err(ApiError::Service(reason))
    }

    pub async fn logout(&self) -> Result<bool, ApiError> {
        let response = self.http.post(self.endpoint(&["logout"])?).send().await?;
        Ok(response.status().is_success())
    }

    pub async fn create_conversation(&self, title: &str) -> Result<Conversation, ApiError> {
        let response = self
            .http
            .post(self.endpoint(&["conversations"])?)
            .form(&[("title", title)])
            .send()
            .await?;
        read_json(response, "Failed to create conversation").await
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let response = self
            .http
            .get(self.endpoint(&["conversations"])?)
            .send()
            .await?;
        read_json(response, "Failed to fetch conversations").await
    }

    pub async fn update_conversation_title(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, ApiError> {
        if !validate_conversation_title(title) {
            return Err(ApiError::Validation("Title cannot be empty".to_string()));
        }
        let response = self
            .http
            .put(self.endpoint(&["conversations", conversation_id])?)
            .form(&[("title", title.trim())])
            .send()
            .await?;
        read_json(response, "Failed to update conversation").await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, ApiError> {
        if conversation_id.trim().is_empty() {
            return Err(ApiError::Validation("Invalid conversation ID".to_string()));
        }
        let response = self
            .http
            .delete(self.endpoint(&["conversations", conversation_id])?)
            .send()
            .await?;
        let body: DeleteResponse = read_json(response, "Failed to delete conversation")
            .await
            .map_err(missing_conversation)?;
        Ok(body.success)
    }

    pub async fn chat_history(&self) -> Result<History<ChatHistoryEntry>, ApiError> {
        let response = self
            .http
            .get(self.endpoint(&["chat_history"])?)
            .send()
            .await?;
        read_json(response, "Failed to fetch chat history").await
    }

    pub async fn video_analysis_history(&self) -> Result<History<VideoAnalysisEntry>, ApiError> {
        let response = self
            .http
            .get(self.endpoint(&["video_analysis_history"])?)
            .send()
            .await?;
        read_json(response, "Failed to fetch video analysis history").await
    }

    /// `true` iff the service reports itself healthy.
    pub async fn check_health(&self) -> bool {
        let result: Result<HealthStatus, ApiError> = async {
            let response = self.http.get(self.endpoint(&["health"])?).send().await?;
            read_json(response, "Health check failed").await
        }
        .await;
        match result {
            Ok(health) => health.status == "healthy",
            Err(err) => {
                debug!(%err, "health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn fetch_tokens(&self) -> Result<Value, ApiError> {
        let response = self
            .http
            .get(self.endpoint(&["user", "tokens"])?)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        read_json(
            response,
            &format!("Failed to fetch token information: {}", status.as_u16()),
        )
        .await
    }

    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let response = self
            .http
            .get(self.endpoint(&["conversations", conversation_id, "messages"])?)
            .send()
            .await?;
        let envelope: MessagesEnvelope =
            read_json(response, "Failed to fetch conversation messages")
                .await
                .map_err(missing_conversation)?;
        Ok(envelope.messages)
    }

    async fn send_message(
        &self,
        message: &str,
        attachments: &[Attachment],
        conversation_id: Option<&str>,
    ) -> Result<Value, ApiError> {
        validate_attachments(attachments)?;
        let mut form = Form::new().text("message", message.to_string());
        if let Some(id) = conversation_id {
            form = form.text("conversation_id", id.to_string());
        }
        for attachment in attachments {
            let part = Part::bytes(attachment.bytes.clone())
                .file_name(attachment.file_name.clone())
                .mime_str(&attachment.mime)
                .map_err(|err| {
                    ApiError::Validation(format!("invalid MIME type {}: {err}", attachment.mime))
                })?;
            form = form.part("videos", part);
        }
        debug!(
            conversation = conversation_id.unwrap_or("<new>"),
            attachments = attachments.len(),
            "sending message"
        );
        let response = self
            .http
            .post(self.endpoint(&["send_message"])?)
            .multipart(form)
            .send()
            .await?;
        read_json(response, "Failed to send message").await
    }
}

/// Decode a JSON body, turning non-2xx answers and `{detail: ...}` bodies
/// into errors.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    fallback: &str,
) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(error_from_response(response, fallback).await);
    }
    let body = response.text().await?;
    let value: Value = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body)?
    };
    if let Some(detail) = value.get("detail").filter(|detail| !detail.is_null()) {
        let reason = match detail {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        return Err(ApiError::Service(reason));
    }
    Ok(serde_json::from_value(value)?)
}

pub(crate) async fn error_from_response(response: Response, fallback: &str) -> ApiError {
    let status = response.status();
    let reason = error_reason(response)
        .await
        .unwrap_or_else(|| fallback.to_string());
    ApiError::from_status(status, reason)
}

async fn error_reason(response: Response) -> Option<String> {
    let body = response.text().await.ok()?;
    serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|body| body.reason())
}

/// The service answers a request for an unknown conversation id with a 2xx
/// `detail` string instead of a 404. Only routes addressed by conversation id
/// apply this; everywhere else a `detail` stays a [`ApiError::Service`].
fn missing_conversation(err: ApiError) -> ApiError {
    match err {
        ApiError::Service(reason) if reason.to_ascii_lowercase().contains("not found") => {
            ApiError::NotFound(reason)
        }
        other => other,
    }
}
