pub mod blocked_app;
pub mod pause;
pub mod session;

pub use blocked_app::{BlockRule, BlockedApp};
pub use pause::PauseRecord;
pub use session::{SessionRecord, SessionStatus, WeeklyFocusStats};
