use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageTier {
    One,
    Two,
    Three,
}

impl PackageTier {
    pub fn number(&self) -> u8 {
        match self {
            PackageTier::One => 1,
            PackageTier::Two => 2,
            PackageTier::Three => 3,
        }
    }

    pub fn from_number(tier: u8) -> Option<Self> {
        match tier {
            1 => Some(PackageTier::One),
            2 => Some(PackageTier::Two),
            3 => Some(PackageTier::Three),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageKind {
    Package(PackageTier),
    Subscription,
}

impl PackageKind {
    pub fn clip_quota(&self) -> u32 {
        match self {
            PackageKind::Package(PackageTier::One) => 5,
            PackageKind::Package(PackageTier::Two) => 7,
            PackageKind::Package(PackageTier::Three) => 10,
            PackageKind::Subscription => 50,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            PackageKind::Package(PackageTier::One) => Duration::days(3),
            PackageKind::Package(PackageTier::Two) => Duration::days(5),
            PackageKind::Package(PackageTier::Three) => Duration::days(7),
            PackageKind::Subscription => Duration::days(30),
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            PackageKind::Package(_) => "package",
            PackageKind::Subscription => "subscription",
        }
    }

    pub fn tier(&self) -> Option<PackageTier> {
        match self {
            PackageKind::Package(tier) => Some(*tier),
            PackageKind::Subscription => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachingSession {
    pub id: String,
    pub coach_id: String,
    pub package: PackageKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub clip_quota: u32,
    pub clips_used: u32,
    status: SessionStatus,
}

impl CoachingSession {
    pub fn new(
        id: impl Into<String>,
        coach_id: impl Into<String>,
        package: PackageKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            coach_id: coach_id.into(),
            package,
            created_at,
            expires_at: created_at + package.duration(),
            clip_quota: package.clip_quota(),
            clips_used: 0,
            status: SessionStatus::Active,
        }
    }

    /// Stored status with expiry applied. `Expired` is never stored.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        match self.status {
            SessionStatus::Active if now > self.expires_at => SessionStatus::Expired,
            status => status,
        }
    }

    pub fn chat_expiry(&self, now: DateTime<Utc>) -> ChatExpiry {
        ChatExpiry::at(self.expires_at, now)
    }

    pub fn complete(&mut self) -> Result<(), ClientError> {
        self.finish(SessionStatus::Completed)
    }

    pub fn cancel(&mut self) -> Result<(), ClientError> {
        self.finish(SessionStatus::Cancelled)
    }

    fn finish(&mut self, to: SessionStatus) -> Result<(), ClientError> {
        if self.status != SessionStatus::Active {
            return Err(ClientError::Validation(format!(
                "session {} is already {:?}",
                self.id, self.status
            )));
        }
        self.status = to;
        Ok(())
    }
}

/// Read-only view of how long a session's conversation stays writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatExpiry {
    pub days_remaining: Option<i64>,
    pub is_expired: bool,
}

impl ChatExpiry {
    pub const UNKNOWN: ChatExpiry = ChatExpiry {
        days_remaining: None,
        is_expired: false,
    };

    /// Expired strictly after `expires_at`; partial days round up.
    pub fn at(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let left = expires_at - now;
        let day = Duration::days(1).num_seconds();
        let secs = left.num_seconds().max(0);

        Self {
            days_remaining: Some((secs + day - 1) / day),
            is_expired: now > expires_at,
        }
    }
}
