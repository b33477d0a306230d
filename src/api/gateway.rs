use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::client::BackendApi;
use super::models::*;
use super::routes;
use crate::connection::ConnectionResolver;
use crate::rate_limit::RateLimiter;
use crate::Result;

/// Every backend call goes resolver → limiter → api. The endpoint key for
/// throttling is the full resolved URL of the logical target.
pub struct BackendGateway {
    resolver: Arc<ConnectionResolver>,
    limiter: Arc<RateLimiter>,
    api: Arc<dyn BackendApi>,
}

impl BackendGateway {
    pub fn new(
        resolver: Arc<ConnectionResolver>,
        limiter: Arc<RateLimiter>,
        api: Arc<dyn BackendApi>,
    ) -> Self {
        Self { resolver, limiter, api }
    }

    pub fn resolver(&self) -> &Arc<ConnectionResolver> {
        &self.resolver
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Idempotent reads get one more attempt against a freshly resolved
    /// endpoint when the first one fails on connectivity.
    async fn read<T, F, Fut>(&self, segments: Vec<String>, operation: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.attempt(&segments, &operation).await {
            Err(err) if err.is_connectivity_failure() => {
                debug!(error = %err, "Retrying read against re-resolved endpoint");
                self.attempt(&segments, &operation).await
            }
            result => result,
        }
    }

    async fn write<T, F, Fut>(&self, segments: Vec<String>, operation: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.attempt(&segments, &operation).await
    }

    async fn attempt<T, F, Fut>(&self, segments: &[String], operation: &F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let base_url = self.resolver.resolve().await?;
        let endpoint_key = routes::url_for(&base_url, segments)?.to_string();

        let result = self
            .limiter
            .execute(&endpoint_key, || operation(base_url.clone()))
            .await;

        if let Err(err) = &result {
            if err.is_connectivity_failure() {
                debug!(endpoint = %endpoint_key, error = %err, "Connectivity failure, dropping resolved endpoint");
                self.resolver.invalidate().await;
            }
        }

        result
    }

    pub async fn list_conversations(
        &self,
        user_id: &str,
        user_type: UserType,
    ) -> Result<Vec<Conversation>> {
        let api = &self.api;
        self.read(
            routes::conversations(user_id, user_type.as_str()),
            move |base| async move { api.list_conversations(&base, user_id, user_type).await },
        )
        .await
    }

    pub async fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let api = &self.api;
        self.read(routes::messages(conversation_id), move |base| async move {
            api.get_messages(&base, conversation_id, limit, offset).await
        })
        .await
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse> {
        let api = &self.api;
        self.write(routes::messages(conversation_id), move |base| async move {
            api.send_message(&base, conversation_id, request).await
        })
        .await
    }

    pub async fn mark_read(&self, conversation_id: &str, user_type: UserType) -> Result<Conversation> {
        let api = &self.api;
        self.write(routes::mark_read(conversation_id), move |base| async move {
            api.mark_read(&base, conversation_id, user_type).await
        })
        .await
    }

    pub async fn get_clip_quota(&self, conversation_id: &str) -> Result<QuotaResponse> {
        let api = &self.api;
        self.read(routes::clips(conversation_id), move |base| async move {
            api.get_clip_quota(&base, conversation_id).await
        })
        .await
    }

    pub async fn get_daily_message_quota(&self, conversation_id: &str) -> Result<QuotaResponse> {
        let api = &self.api;
        self.read(routes::daily_messages(conversation_id), move |base| async move {
            api.get_daily_message_quota(&base, conversation_id).await
        })
        .await
    }

    pub async fn create_session(&self, request: &CreateSessionRequest) -> Result<SessionPayload> {
        let api = &self.api;
        self.write(routes::sessions(), move |base| async move {
            api.create_session(&base, request).await
        })
        .await
    }
}
