pub mod db;
pub mod error;
pub mod models;
pub mod monitor;
pub mod session;
pub mod settings;
pub mod surface;
pub mod utils;

pub use db::Database;
pub use error::EngineError;
pub use models::{BlockRule, BlockedApp, PauseRecord, SessionRecord, SessionStatus, WeeklyFocusStats};
pub use monitor::{ForegroundMonitor, ForegroundProbe, ForegroundSample, MonitorConfig, MonitorEvent, RecentProcessProbe};
pub use session::{
    EnforcementController, EngineConfig, SessionCommand, SessionPhase, SessionState, SessionSummary,
};
pub use settings::{EngineSettings, SettingsStore};
pub use surface::{
    render_status, InterventionSink, LogInterventionSink, LogStatusSink, StatusFrame, StatusSink,
    ToggleControl,
};
