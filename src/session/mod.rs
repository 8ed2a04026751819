pub mod clock;
pub mod controller;
pub mod state;

pub use clock::{ClockEvent, SessionClock};
pub use controller::{
    EnforcementController, EngineConfig, EngineEvent, SessionCommand, SessionSummary,
};
pub use state::{SessionPhase, SessionState};
