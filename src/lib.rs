pub mod api;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod orchestrator;
pub mod quota;
pub mod rate_limit;

pub use error::{ClientError, ErrorKind};
pub type Result<T> = std::result::Result<T, ClientError>;
pub use config::Settings;

pub use api::{BackendApi, BackendGateway, HttpBackendApi, Participant, UserType};
pub use clock::{Clock, SystemClock};
pub use connection::{ConnectionResolver, ConnectionState, HttpProbe, Probe};
pub use orchestrator::{ConversationState, SessionOrchestrator};
pub use quota::{ChatExpiry, ClipQuota, CoachingSession, DailyQuota, PackageKind, PackageTier, QuotaService};
pub use rate_limit::{RateLimitConfig, RateLimiter};
