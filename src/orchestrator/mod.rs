//! High-level conversation operations for the UI layer
//!
//! Composes discovery, throttling and quota tracking. Quota-kind failures
//! are decided locally whenever the cached view allows it, so the UI gets an
//! immediate typed answer without a round-trip.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::api::{
    BackendGateway, Conversation, CreateSessionRequest, HttpBackendApi, Message, MessageType,
    Participant, SendMessageRequest,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::connection::ConnectionResolver;
use crate::error::ClientError;
use crate::quota::{
    ChatExpiry, ClipQuota, CoachingSession, DailyQuota, PackageKind, QuotaService,
};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::Result;

/// Everything a conversation screen needs in one read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub clip_quota: ClipQuota,
    pub daily_quota: DailyQuota,
    pub chat_expiry: ChatExpiry,
}

#[derive(Debug, Clone, Copy)]
enum RefreshTarget {
    Clips,
    DailyMessages,
}

pub struct SessionOrchestrator {
    gateway: Arc<BackendGateway>,
    quota: Arc<QuotaService>,
    sender: Participant,
    refresh_after_send: bool,
    send_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    refreshes: TaskTracker,
    cancel: CancellationToken,
}

impl SessionOrchestrator {
    pub fn new(
        gateway: Arc<BackendGateway>,
        quota: Arc<QuotaService>,
        sender: Participant,
        refresh_after_send: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            quota,
            sender,
            refresh_after_send,
            send_locks: Mutex::new(HashMap::new()),
            refreshes: TaskTracker::new(),
            cancel,
        }
    }

    /// Wires the full stack from configuration against the real backend.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::from_settings_with_clock(settings, Arc::new(SystemClock))
    }

    pub fn from_settings_with_clock(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        settings.validate()?;
        let cancel = CancellationToken::new();

        let resolver = ConnectionResolver::from_settings(settings, cancel.clone())?;
        let limiter = RateLimiter::new(RateLimitConfig::from(&settings.rate_limit), cancel.clone());
        let api = HttpBackendApi::new(settings.backend.request_timeout())?;
        let gateway = Arc::new(BackendGateway::new(
            Arc::new(resolver),
            Arc::new(limiter),
            Arc::new(api),
        ));

        let quota = Arc::new(QuotaService::new(
            gateway.clone(),
            clock,
            settings.timezone()?,
            settings.quota.daily_message_limit,
        ));

        let sender = Participant {
            id: settings.identity.user_id.clone(),
            user_type: settings.identity.user_type,
        };

        Ok(Self::new(
            gateway,
            quota,
            sender,
            settings.quota.refresh_after_send,
            cancel,
        ))
    }

    pub fn quota(&self) -> &Arc<QuotaService> {
        &self.quota
    }

    pub fn gateway(&self) -> &Arc<BackendGateway> {
        &self.gateway
    }

    pub fn sender(&self) -> &Participant {
        &self.sender
    }

    /// Creates the coaching session at payment confirmation and starts
    /// tracking its expiry for the conversation.
    pub async fn open_session(
        &self,
        conversation_id: &str,
        coach_id: &str,
        package: PackageKind,
    ) -> Result<CoachingSession> {
        let request = CreateSessionRequest {
            conversation_id: conversation_id.to_string(),
            coach_id: coach_id.to_string(),
            client_id: self.sender.id.clone(),
            package_kind: package.wire_name().to_string(),
            package_tier: package.tier().map(|t| t.number()),
        };

        let payload = self.gateway.create_session(&request).await?;
        let session = CoachingSession::new(payload.id, coach_id, package, payload.created_at);
        info!(
            conversation = %conversation_id,
            session = %session.id,
            clip_quota = session.clip_quota,
            expires_at = %session.expires_at,
            "Coaching session opened"
        );

        self.quota.register_session(conversation_id, session.clone()).await;
        Ok(session)
    }

    /// Starts tracking a session that already exists on the backend.
    pub async fn attach_session(&self, conversation_id: &str, session: CoachingSession) {
        self.quota.register_session(conversation_id, session).await;
    }

    pub async fn send_text_message(&self, conversation_id: &str, text: &str) -> Result<Message> {
        if text.trim().is_empty() {
            return Err(ClientError::Validation("message text is empty".into()));
        }

        self.one_at_a_time(conversation_id, self.dispatch_text(conversation_id, text))
            .await
    }

    async fn dispatch_text(&self, conversation_id: &str, text: &str) -> Result<Message> {
        self.ensure_chat_open(conversation_id).await?;
        self.ensure_daily_allowance(conversation_id).await?;

        let request = SendMessageRequest {
            sender_id: self.sender.id.clone(),
            sender_type: self.sender.user_type,
            content: text.to_string(),
            message_type: MessageType::Text,
            video_uri: None,
        };

        match self.gateway.send_message(conversation_id, &request).await {
            Ok(response) => {
                self.quota
                    .record_message_sent(conversation_id, response.daily_messages_remaining)
                    .await;
                self.schedule_refresh(conversation_id, RefreshTarget::DailyMessages);
                Ok(response.message)
            }
            Err(err) => Err(self.absorb_send_failure(conversation_id, err).await),
        }
    }

    pub async fn send_clip(&self, conversation_id: &str, clip_ref: &str) -> Result<Message> {
        if clip_ref.trim().is_empty() {
            return Err(ClientError::Validation("clip reference is empty".into()));
        }

        self.one_at_a_time(conversation_id, self.dispatch_clip(conversation_id, clip_ref))
            .await
    }

    async fn dispatch_clip(&self, conversation_id: &str, clip_ref: &str) -> Result<Message> {
        self.ensure_chat_open(conversation_id).await?;
        self.ensure_clip_allowance(conversation_id).await?;

        let request = SendMessageRequest {
            sender_id: self.sender.id.clone(),
            sender_type: self.sender.user_type,
            content: String::new(),
            message_type: MessageType::Video,
            video_uri: Some(clip_ref.to_string()),
        };

        match self.gateway.send_message(conversation_id, &request).await {
            Ok(response) => {
                self.quota
                    .record_clip_sent(conversation_id, response.clips_remaining)
                    .await;
                self.schedule_refresh(conversation_id, RefreshTarget::Clips);
                Ok(response.message)
            }
            Err(err) => Err(self.absorb_send_failure(conversation_id, err).await),
        }
    }

    pub async fn fetch_conversation_state(
        &self,
        conversation_id: &str,
        message_limit: u32,
    ) -> Result<ConversationState> {
        let (messages, clip_quota, daily_quota) = tokio::join!(
            self.gateway.get_messages(conversation_id, message_limit, 0),
            self.quota.get_clip_quota(conversation_id),
            self.quota.get_daily_message_quota(conversation_id),
        );

        Ok(ConversationState {
            messages: messages?,
            clip_quota,
            daily_quota,
            chat_expiry: self.quota.chat_expiry(conversation_id).await,
        })
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.gateway
            .list_conversations(&self.sender.id, self.sender.user_type)
            .await
    }

    pub async fn load_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        self.gateway.get_messages(conversation_id, limit, offset).await
    }

    pub async fn mark_read(&self, conversation_id: &str) -> Result<Conversation> {
        self.gateway
            .mark_read(conversation_id, self.sender.user_type)
            .await
    }

    /// Waits for every scheduled quota refresh issued so far.
    pub async fn settle_refreshes(&self) {
        self.refreshes.close();
        self.refreshes.wait().await;
        self.refreshes.reopen();
    }

    /// Abandons pending probes, throttle waits, backoffs and refreshes.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.refreshes.close();
        self.refreshes.wait().await;
        debug!("Orchestrator shut down");
    }

    /// Runs `send` while holding the conversation's send lock, then drops the
    /// lock entry if no other caller is holding or waiting on it.
    async fn one_at_a_time<T>(&self, conversation_id: &str, send: impl Future<Output = T>) -> T {
        let lock = self
            .send_locks
            .lock()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .clone();

        let result = {
            let _in_flight = lock.lock().await;
            send.await
        };
        drop(lock);

        let mut locks = self.send_locks.lock().await;
        if locks
            .get(conversation_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(conversation_id);
        }
        result
    }

    async fn ensure_chat_open(&self, conversation_id: &str) -> Result<()> {
        if self.quota.is_chat_expired(conversation_id).await {
            info!(conversation = %conversation_id, "Send refused: chat expired");
            return Err(ClientError::ChatExpired);
        }
        Ok(())
    }

    /// A same-day authoritative zero is final. A zero that only exists in the
    /// optimistic projection, or no cached value at all, is checked against
    /// the backend first.
    async fn ensure_daily_allowance(&self, conversation_id: &str) -> Result<()> {
        let remaining = match self.quota.cached_daily_quota(conversation_id).await {
            Some(cached) if cached.projected.remaining > 0 => return Ok(()),
            Some(cached) if !cached.refresh_pending => 0,
            _ => self.quota.refresh_daily_quota(conversation_id).await?.remaining,
        };

        if remaining == 0 {
            info!(conversation = %conversation_id, "Send refused: daily message limit reached");
            return Err(ClientError::DailyLimitReached);
        }
        Ok(())
    }

    async fn ensure_clip_allowance(&self, conversation_id: &str) -> Result<()> {
        let remaining = match self.quota.cached_clip_quota(conversation_id).await {
            Some(cached) => cached.projected.remaining,
            None => {
                let fresh = self.quota.refresh_clip_quota(conversation_id).await?;
                if fresh.chat_expiry.is_expired {
                    return Err(ClientError::ChatExpired);
                }
                fresh.remaining
            }
        };

        if remaining == 0 {
            info!(conversation = %conversation_id, "Send refused: no clips remaining");
            return Err(ClientError::NoClipsRemaining);
        }
        Ok(())
    }

    /// The server refused a send the local checks let through: another device
    /// won the race. Bring the cache in line and surface the typed failure.
    async fn absorb_send_failure(&self, conversation_id: &str, err: ClientError) -> ClientError {
        match &err {
            ClientError::DailyLimitReached => self.quota.mark_daily_exhausted(conversation_id).await,
            ClientError::NoClipsRemaining => self.quota.mark_clips_exhausted(conversation_id).await,
            ClientError::ChatExpired => self.quota.mark_chat_expired(conversation_id).await,
            _ => return err,
        }
        warn!(conversation = %conversation_id, error = %err, "Backend refused send on quota");
        err
    }

    fn schedule_refresh(&self, conversation_id: &str, target: RefreshTarget) {
        if !self.refresh_after_send {
            return;
        }

        let quota = self.quota.clone();
        let cancel = self.cancel.clone();
        let conversation_id = conversation_id.to_string();

        self.refreshes.spawn(async move {
            let refresh = async {
                match target {
                    RefreshTarget::Clips => quota.refresh_clip_quota(&conversation_id).await.map(|_| ()),
                    RefreshTarget::DailyMessages => {
                        quota.refresh_daily_quota(&conversation_id).await.map(|_| ())
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {}
                result = refresh => {
                    if let Err(e) = result {
                        debug!(conversation = %conversation_id, ?target, error = %e, "Quota refresh after send failed");
                    }
                }
            }
        });
    }
}
