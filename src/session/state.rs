use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    Running,
    Paused,
    Stopped,
    Finished,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Stopped | SessionPhase::Finished)
    }
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::Idle
    }
}

/// Live state of the current focus session. Owned by the coordinator task;
/// everything else sees read-only snapshots.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub target_ms: u64,
    pub remaining_ms: u64,
    /// Count of active block rules in this session's snapshot.
    pub active_rules: usize,
    pub started_at: Option<DateTime<Utc>>,
    /// Set while the foreground probe has been failing for a stretch of
    /// consecutive polls.
    pub degraded: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(
        &mut self,
        session_id: String,
        target_ms: u64,
        active_rules: usize,
        started_at: DateTime<Utc>,
    ) {
        *self = Self {
            phase: SessionPhase::Running,
            session_id: Some(session_id),
            target_ms,
            remaining_ms: target_ms,
            active_rules,
            started_at: Some(started_at),
            degraded: false,
        };
    }

    /// Whether a new session may be started. Terminal phases count as
    /// startable: the finished session has been acknowledged and discarded.
    pub fn can_start(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Idle | SessionPhase::Stopped | SessionPhase::Finished
        )
    }

    pub fn active_ms(&self) -> u64 {
        self.target_ms.saturating_sub(self.remaining_ms)
    }

    /// Running -> Paused. Any other phase is a no-op.
    pub fn pause(&mut self) -> bool {
        if self.phase == SessionPhase::Running {
            self.phase = SessionPhase::Paused;
            true
        } else {
            false
        }
    }

    /// Paused -> Running. Any other phase is a no-op.
    pub fn resume(&mut self) -> bool {
        if self.phase == SessionPhase::Paused {
            self.phase = SessionPhase::Running;
            true
        } else {
            false
        }
    }

    /// Running or Paused -> Stopped.
    pub fn stop(&mut self) -> bool {
        if matches!(self.phase, SessionPhase::Running | SessionPhase::Paused) {
            self.phase = SessionPhase::Stopped;
            true
        } else {
            false
        }
    }

    /// Running -> Finished, when the countdown reaches zero.
    pub fn finish(&mut self) -> bool {
        if self.phase == SessionPhase::Running {
            self.phase = SessionPhase::Finished;
            self.remaining_ms = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> SessionState {
        let mut state = SessionState::new();
        state.begin("s1".to_string(), 60_000, 2, Utc::now());
        state
    }

    #[test]
    fn begin_enters_running_with_full_remaining() {
        let state = running();
        assert_eq!(state.phase, SessionPhase::Running);
        assert_eq!(state.remaining_ms, 60_000);
        assert_eq!(state.active_ms(), 0);
        assert!(!state.can_start());
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let mut state = running();

        assert!(state.pause());
        assert!(!state.pause());
        assert_eq!(state.phase, SessionPhase::Paused);

        assert!(state.resume());
        assert!(!state.resume());
        assert_eq!(state.phase, SessionPhase::Running);
    }

    #[test]
    fn resume_without_pause_is_a_noop() {
        let mut state = running();
        assert!(!state.resume());
        assert_eq!(state.phase, SessionPhase::Running);
    }

    #[test]
    fn stop_applies_from_running_and_paused_only() {
        let mut state = running();
        state.pause();
        assert!(state.stop());
        assert_eq!(state.phase, SessionPhase::Stopped);

        // terminal phases ignore further commands
        assert!(!state.stop());
        assert!(!state.pause());
        assert!(!state.resume());
        assert!(!state.finish());
        assert!(state.can_start());
    }

    #[test]
    fn finish_zeroes_remaining() {
        let mut state = running();
        state.remaining_ms = 1_000;
        assert!(state.finish());
        assert_eq!(state.phase, SessionPhase::Finished);
        assert_eq!(state.remaining_ms, 0);
        assert_eq!(state.active_ms(), 60_000);
    }

    #[test]
    fn finish_is_rejected_while_paused() {
        let mut state = running();
        state.pause();
        assert!(!state.finish());
        assert_eq!(state.phase, SessionPhase::Paused);
    }
}
