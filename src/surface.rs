use anyhow::Result;
use log::{info, warn};
use serde::Serialize;

use crate::session::{SessionPhase, SessionState};

/// Which control the pause/resume slot of the status surface should offer.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ToggleControl {
    Pause,
    Resume,
}

/// One rendered update for the persistent status surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusFrame {
    pub text: String,
    pub remaining_ms: u64,
    pub toggle: Option<ToggleControl>,
    pub stop_enabled: bool,
}

pub fn render_status(state: &SessionState) -> StatusFrame {
    let total_seconds = state.remaining_ms / 1_000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;

    let mut text = format!(
        "{:02}:{:02} remaining \u{2022} {} apps blocked",
        minutes, seconds, state.active_rules
    );
    if state.phase == SessionPhase::Paused {
        text.push_str(" \u{2022} paused");
    }
    if state.degraded {
        text.push_str(" \u{2022} monitoring degraded");
    }

    let toggle = match state.phase {
        SessionPhase::Running => Some(ToggleControl::Pause),
        SessionPhase::Paused => Some(ToggleControl::Resume),
        _ => None,
    };

    StatusFrame {
        text,
        remaining_ms: state.remaining_ms,
        toggle,
        stop_enabled: matches!(state.phase, SessionPhase::Running | SessionPhase::Paused),
    }
}

/// Persistent user-visible indicator. Updates must be cheap; the engine
/// ignores failures beyond logging them.
pub trait StatusSink: Send + Sync {
    fn update(&self, frame: &StatusFrame) -> Result<()>;
}

/// Displays the block notice when a blocked app reaches the foreground.
/// Fire-and-forget; implementations should tolerate redundant calls.
pub trait InterventionSink: Send + Sync {
    fn show(&self, package_id: &str) -> Result<()>;
    fn hide(&self) -> Result<()>;
}

/// Status surface backed by the log. Stands in for the platform notification
/// of the desktop build.
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn update(&self, frame: &StatusFrame) -> Result<()> {
        info!("{}", frame.text);
        Ok(())
    }
}

/// Block notice backed by the log. A platform overlay plugs in behind the
/// same trait.
pub struct LogInterventionSink;

impl InterventionSink for LogInterventionSink {
    fn show(&self, package_id: &str) -> Result<()> {
        warn!("blocked app in foreground: {package_id}");
        Ok(())
    }

    fn hide(&self) -> Result<()> {
        info!("block notice dismissed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use chrono::Utc;

    fn state(remaining_ms: u64, rules: usize) -> SessionState {
        let mut state = SessionState::new();
        state.begin("s1".to_string(), 1_500_000, rules, Utc::now());
        state.remaining_ms = remaining_ms;
        state
    }

    #[test]
    fn renders_minutes_seconds_and_rule_count() {
        let frame = render_status(&state(1_500_000, 3));
        assert_eq!(frame.text, "25:00 remaining \u{2022} 3 apps blocked");
        assert_eq!(frame.toggle, Some(ToggleControl::Pause));
        assert!(frame.stop_enabled);
    }

    #[test]
    fn long_sessions_keep_counting_in_minutes() {
        let frame = render_status(&state(5_400_000, 1));
        assert!(frame.text.starts_with("90:00 remaining"));
    }

    #[test]
    fn paused_state_offers_resume() {
        let mut state = state(180_000, 2);
        state.pause();
        let frame = render_status(&state);
        assert!(frame.text.contains("\u{2022} paused"));
        assert_eq!(frame.toggle, Some(ToggleControl::Resume));
    }

    #[test]
    fn degraded_monitoring_is_visible() {
        let mut state = state(60_000, 2);
        state.degraded = true;
        assert!(render_status(&state).text.contains("monitoring degraded"));
    }

    #[test]
    fn terminal_frames_disable_controls() {
        let mut state = state(0, 2);
        state.finish();
        let frame = render_status(&state);
        assert_eq!(frame.toggle, None);
        assert!(!frame.stop_enabled);
        assert!(frame.text.starts_with("00:00 remaining"));
    }
}
