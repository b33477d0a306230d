//! Consumable allowances
//!
//! Clip quotas and chat expiry come from the coaching session a client paid
//! for; text messages are capped per conversation per New York calendar day.

pub mod reset;
mod service;
pub mod session;

pub use reset::{calendar_date, next_reset_boundary, QUOTA_TIMEZONE};
pub use service::{ClipQuota, DailyMessageCounter, DailyQuota, Projection, QuotaService};
pub use session::{ChatExpiry, CoachingSession, PackageKind, PackageTier, SessionStatus};
