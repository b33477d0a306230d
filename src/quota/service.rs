use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::reset::calendar_date;
use super::session::{ChatExpiry, CoachingSession};
use crate::api::{BackendGateway, QuotaResponse};
use crate::clock::Clock;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipQuota {
    pub remaining: u32,
    pub total: u32,
    pub used: u32,
    pub chat_expiry: ChatExpiry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyQuota {
    pub remaining: u32,
    pub total: u32,
    pub used: u32,
}

/// Per-conversation daily allowance, dated in the quota timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyMessageCounter {
    pub date: NaiveDate,
    pub used: u32,
    pub limit: u32,
}

impl DailyMessageCounter {
    /// The counter as seen on `today`: a counter dated any other day reads
    /// as unused.
    pub fn as_of(&self, today: NaiveDate) -> Self {
        if self.date == today {
            *self
        } else {
            Self {
                date: today,
                used: 0,
                limit: self.limit,
            }
        }
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    pub fn quota(&self) -> DailyQuota {
        DailyQuota {
            remaining: self.remaining(),
            total: self.limit,
            used: self.used.min(self.limit),
        }
    }
}

/// A cached quota: the last authoritative read next to the locally
/// projected value after optimistic updates. `refresh_pending` stays set
/// until the next authoritative read replaces both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection<T> {
    pub authoritative: T,
    pub projected: T,
    pub refresh_pending: bool,
}

impl<T: Copy> Projection<T> {
    fn settled(value: T) -> Self {
        Self {
            authoritative: value,
            projected: value,
            refresh_pending: false,
        }
    }

    fn map<U>(&self, f: impl Fn(T) -> U) -> Projection<U> {
        Projection {
            authoritative: f(self.authoritative),
            projected: f(self.projected),
            refresh_pending: self.refresh_pending,
        }
    }
}

/// Clamps server-reported counters into `0 <= remaining, used <= total`.
fn normalize(remaining: i64, total: i64, used: i64) -> (u32, u32, u32) {
    let total = total.clamp(0, u32::MAX as i64) as u32;
    let remaining = remaining.clamp(0, total as i64) as u32;
    let used = used.clamp(0, total as i64) as u32;
    (remaining, total, used)
}

/// Tracks clip and daily-message allowances and chat expiry per
/// conversation. The backend stays the source of truth; this keeps a cached
/// projection of it.
pub struct QuotaService {
    gateway: Arc<BackendGateway>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    daily_limit: u32,
    sessions: RwLock<HashMap<String, CoachingSession>>,
    reported_expiry: RwLock<HashMap<String, ChatExpiry>>,
    clips: RwLock<HashMap<String, Projection<ClipQuota>>>,
    daily: RwLock<HashMap<String, Projection<DailyMessageCounter>>>,
}

impl QuotaService {
    pub fn new(
        gateway: Arc<BackendGateway>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        daily_limit: u32,
    ) -> Self {
        Self {
            gateway,
            clock,
            timezone,
            daily_limit,
            sessions: RwLock::new(HashMap::new()),
            reported_expiry: RwLock::new(HashMap::new()),
            clips: RwLock::new(HashMap::new()),
            daily: RwLock::new(HashMap::new()),
        }
    }

    fn today(&self) -> NaiveDate {
        calendar_date(self.clock.now(), self.timezone)
    }

    pub async fn register_session(&self, conversation_id: &str, session: CoachingSession) {
        debug!(
            conversation = %conversation_id,
            session = %session.id,
            expires_at = %session.expires_at,
            "Registered coaching session"
        );
        self.sessions
            .write()
            .await
            .insert(conversation_id.to_string(), session);
    }

    pub async fn session(&self, conversation_id: &str) -> Option<CoachingSession> {
        self.sessions.read().await.get(conversation_id).cloned()
    }

    /// Expiry from the locally known session, or failing that the last
    /// server-reported view. Either source saying expired wins.
    pub async fn chat_expiry(&self, conversation_id: &str) -> ChatExpiry {
        let now = self.clock.now();
        let local = self
            .sessions
            .read()
            .await
            .get(conversation_id)
            .map(|s| s.chat_expiry(now));
        let reported = self.reported_expiry.read().await.get(conversation_id).copied();

        match (local, reported) {
            (Some(local), Some(reported)) => ChatExpiry {
                days_remaining: local.days_remaining,
                is_expired: local.is_expired || reported.is_expired,
            },
            (Some(local), None) => local,
            (None, Some(reported)) => reported,
            (None, None) => ChatExpiry::UNKNOWN,
        }
    }

    pub async fn is_chat_expired(&self, conversation_id: &str) -> bool {
        self.chat_expiry(conversation_id).await.is_expired
    }

    /// Clip allowance read through the backend. Falls back to a zero
    /// allowance if the backend cannot be read.
    pub async fn get_clip_quota(&self, conversation_id: &str) -> ClipQuota {
        match self.refresh_clip_quota(conversation_id).await {
            Ok(quota) => quota,
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "Clip quota unavailable, using empty allowance");
                ClipQuota {
                    remaining: 0,
                    total: 0,
                    used: 0,
                    chat_expiry: self.chat_expiry(conversation_id).await,
                }
            }
        }
    }

    /// Daily message allowance read through the backend. Falls back to the
    /// full default allowance if the backend cannot be read.
    pub async fn get_daily_message_quota(&self, conversation_id: &str) -> DailyQuota {
        match self.refresh_daily_quota(conversation_id).await {
            Ok(quota) => quota,
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "Daily quota unavailable, using default allowance");
                DailyQuota {
                    remaining: self.daily_limit,
                    total: self.daily_limit,
                    used: 0,
                }
            }
        }
    }

    /// Authoritative clip read; replaces the cached projection.
    pub async fn refresh_clip_quota(&self, conversation_id: &str) -> Result<ClipQuota> {
        let response = self.gateway.get_clip_quota(conversation_id).await?;
        let reported = response.chat_expiry.map(|e| ChatExpiry {
            days_remaining: e.days_remaining.map(|d| d.max(0)),
            is_expired: e.is_expired,
        });

        if let Some(reported) = reported {
            self.reported_expiry
                .write()
                .await
                .insert(conversation_id.to_string(), reported);
        }

        let (remaining, total, used) = normalize(response.remaining, response.total, response.used);
        let quota = ClipQuota {
            remaining,
            total,
            used,
            chat_expiry: self.chat_expiry(conversation_id).await,
        };

        self.clips
            .write()
            .await
            .insert(conversation_id.to_string(), Projection::settled(quota));

        if let Some(session) = self.sessions.write().await.get_mut(conversation_id) {
            session.clips_used = used;
        }

        Ok(quota)
    }

    /// Authoritative daily read; replaces the cached projection and dates it
    /// today in the quota timezone.
    pub async fn refresh_daily_quota(&self, conversation_id: &str) -> Result<DailyQuota> {
        let response: QuotaResponse = self.gateway.get_daily_message_quota(conversation_id).await?;
        let (remaining, total, _) = normalize(response.remaining, response.total, response.used);

        let counter = DailyMessageCounter {
            date: self.today(),
            used: total - remaining,
            limit: total,
        };

        self.daily
            .write()
            .await
            .insert(conversation_id.to_string(), Projection::settled(counter));

        Ok(counter.quota())
    }

    pub async fn cached_clip_quota(&self, conversation_id: &str) -> Option<Projection<ClipQuota>> {
        let cached = self.clips.read().await.get(conversation_id).copied()?;
        let chat_expiry = self.chat_expiry(conversation_id).await;
        Some(cached.map(|q| ClipQuota { chat_expiry, ..q }))
    }

    /// Cached daily allowance as of today; a counter from an earlier day
    /// reads as fully available.
    pub async fn cached_daily_quota(&self, conversation_id: &str) -> Option<Projection<DailyQuota>> {
        let today = self.today();
        let cached = self.daily.read().await.get(conversation_id).copied()?;
        Some(cached.map(|c| c.as_of(today).quota()))
    }

    /// Optimistic update after a successful clip send. Prefers the count the
    /// server reported in its response.
    pub async fn record_clip_sent(&self, conversation_id: &str, server_remaining: Option<i64>) {
        let mut clips = self.clips.write().await;
        let Some(entry) = clips.get_mut(conversation_id) else {
            debug!(conversation = %conversation_id, "No cached clip quota to update");
            return;
        };

        let total = entry.projected.total;
        let remaining = match server_remaining {
            Some(r) => r.clamp(0, total as i64) as u32,
            None => entry.projected.remaining.saturating_sub(1),
        };
        entry.projected.remaining = remaining;
        entry.projected.used = total - remaining;
        entry.refresh_pending = true;
    }

    /// Optimistic update after a successful text send.
    pub async fn record_message_sent(&self, conversation_id: &str, server_remaining: Option<i64>) {
        let today = self.today();
        let mut daily = self.daily.write().await;
        let entry = daily
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                Projection::settled(DailyMessageCounter {
                    date: today,
                    used: 0,
                    limit: self.daily_limit,
                })
            });

        let mut counter = entry.projected.as_of(today);
        counter.used = match server_remaining {
            Some(r) => counter.limit - (r.clamp(0, counter.limit as i64) as u32),
            None => (counter.used + 1).min(counter.limit),
        };
        entry.projected = counter;
        entry.refresh_pending = true;
    }

    /// The server refused a text send for the daily limit.
    pub async fn mark_daily_exhausted(&self, conversation_id: &str) {
        let today = self.today();
        let exhausted = {
            let daily = self.daily.read().await;
            let limit = daily
                .get(conversation_id)
                .map(|p| p.authoritative.limit)
                .unwrap_or(self.daily_limit);
            DailyMessageCounter {
                date: today,
                used: limit,
                limit,
            }
        };
        self.daily
            .write()
            .await
            .insert(conversation_id.to_string(), Projection::settled(exhausted));
    }

    /// The server refused a clip send for lack of clips.
    pub async fn mark_clips_exhausted(&self, conversation_id: &str) {
        let chat_expiry = self.chat_expiry(conversation_id).await;
        let mut clips = self.clips.write().await;
        let total = clips.get(conversation_id).map(|p| p.authoritative.total).unwrap_or(0);
        clips.insert(
            conversation_id.to_string(),
            Projection::settled(ClipQuota {
                remaining: 0,
                total,
                used: total,
                chat_expiry,
            }),
        );
    }

    /// The server reported the chat closed.
    pub async fn mark_chat_expired(&self, conversation_id: &str) {
        self.reported_expiry.write().await.insert(
            conversation_id.to_string(),
            ChatExpiry {
                days_remaining: Some(0),
                is_expired: true,
            },
        );
    }
}
