// Library interface for ridewatch
// The binary and the integration tests both go through it

pub mod backend;
pub mod config;
pub mod errors;
pub mod live;
pub mod records;
pub mod scores;
pub mod ui;

// Re-export commonly used types
pub use backend::{Backend, MemoryBackend, SupabaseBackend};
pub use config::AppConfig;
pub use errors::RidewatchError;
pub use live::{LiveSession, Notice, NoticeLevel};
pub use records::{EventKind, PotholeEvent, RideEvent, SortOrder, TelemetrySample};
pub use scores::{SafetyScoreInputs, ScoreCard, ScoreTier};
