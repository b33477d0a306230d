use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::routes;
use crate::error::ClientError;
use crate::Result;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// The backend's REST contract. Every call takes the base address resolved
/// for this attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn list_conversations(
        &self,
        base_url: &str,
        user_id: &str,
        user_type: UserType,
    ) -> Result<Vec<Conversation>>;

    async fn get_messages(
        &self,
        base_url: &str,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>>;

    async fn send_message(
        &self,
        base_url: &str,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse>;

    async fn mark_read(
        &self,
        base_url: &str,
        conversation_id: &str,
        user_type: UserType,
    ) -> Result<Conversation>;

    async fn get_clip_quota(&self, base_url: &str, conversation_id: &str) -> Result<QuotaResponse>;

    async fn get_daily_message_quota(
        &self,
        base_url: &str,
        conversation_id: &str,
    ) -> Result<QuotaResponse>;

    async fn create_session(
        &self,
        base_url: &str,
        request: &CreateSessionRequest,
    ) -> Result<SessionPayload>;
}

pub struct HttpBackendApi {
    client: Client,
}

impl HttpBackendApi {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: url::Url) -> Result<T> {
        debug!(url = %url, "GET");
        let response = self.client.get(url).send().await?;
        handle_response(response).await
    }

    async fn post_json<B, T>(&self, url: url::Url, body: &B) -> Result<T>
    where
        B: serde::Serialize + Sync,
        T: DeserializeOwned,
    {
        let request_id = Uuid::new_v4();
        debug!(url = %url, request_id = %request_id, "POST");

        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .json(body)
            .send()
            .await?;

        handle_response(response).await
    }
}

#[async_trait]
impl BackendApi for HttpBackendApi {
    async fn list_conversations(
        &self,
        base_url: &str,
        user_id: &str,
        user_type: UserType,
    ) -> Result<Vec<Conversation>> {
        let url = routes::url_for(base_url, &routes::conversations(user_id, user_type.as_str()))?;
        let body: ConversationsResponse = self.get_json(url).await?;
        Ok(body.conversations)
    }

    async fn get_messages(
        &self,
        base_url: &str,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut url = routes::url_for(base_url, &routes::messages(conversation_id))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());

        let body: MessagesResponse = self.get_json(url).await?;
        Ok(body.messages)
    }

    async fn send_message(
        &self,
        base_url: &str,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse> {
        let url = routes::url_for(base_url, &routes::messages(conversation_id))?;
        self.post_json(url, request).await
    }

    async fn mark_read(
        &self,
        base_url: &str,
        conversation_id: &str,
        user_type: UserType,
    ) -> Result<Conversation> {
        let url = routes::url_for(base_url, &routes::mark_read(conversation_id))?;
        self.post_json(url, &MarkReadRequest { user_type }).await
    }

    async fn get_clip_quota(&self, base_url: &str, conversation_id: &str) -> Result<QuotaResponse> {
        let url = routes::url_for(base_url, &routes::clips(conversation_id))?;
        self.get_json(url).await
    }

    async fn get_daily_message_quota(
        &self,
        base_url: &str,
        conversation_id: &str,
    ) -> Result<QuotaResponse> {
        let url = routes::url_for(base_url, &routes::daily_messages(conversation_id))?;
        self.get_json(url).await
    }

    async fn create_session(
        &self,
        base_url: &str,
        request: &CreateSessionRequest,
    ) -> Result<SessionPayload> {
        let url = routes::url_for(base_url, &routes::sessions())?;
        let body: CreateSessionResponse = self.post_json(url, request).await?;
        Ok(body.session)
    }
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status, &body))
}

/// Maps a non-2xx response onto the error taxonomy. Quota violations are
/// recognised by the flags the backend puts in the body, not by the text.
pub fn classify_failure(status: StatusCode, body: &str) -> ClientError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ClientError::AuthenticationRequired;
    }

    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        if parsed.chat_expired {
            return ClientError::ChatExpired;
        }
        if parsed.daily_limit_reached {
            return ClientError::DailyLimitReached;
        }
        if parsed.clip_limit_reached {
            return ClientError::NoClipsRemaining;
        }
    }

    let message = parsed
        .error
        .or(parsed.message)
        .unwrap_or_else(|| body.to_string());

    ClientError::Backend {
        status: status.as_u16(),
        message,
    }
}
