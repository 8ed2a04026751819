use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    db::Database,
    error::EngineError,
    models::{BlockRule, PauseRecord, SessionRecord, SessionStatus},
    monitor::{ForegroundMonitor, ForegroundProbe, MonitorConfig, MonitorEvent},
    settings::EngineSettings,
    surface::{render_status, InterventionSink, StatusSink},
};

use super::clock::{ClockEvent, SessionClock};
use super::state::{SessionPhase, SessionState};

/// External control surface. Commands arriving after a terminal phase are
/// no-ops, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Pause,
    Resume,
    Stop,
}

/// Everything the coordinator consumes, funneled through one ordered channel
/// so tick handling, sample classification, and external commands can never
/// interleave mid-update.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Clock(ClockEvent),
    Monitor(MonitorEvent),
    Command(SessionCommand),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub degraded_after: u32,
    pub heartbeat_every_ticks: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            tick_interval: Duration::from_millis(settings.tick_interval_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            probe_timeout: Duration::from_millis(settings.probe_timeout_ms),
            degraded_after: settings.degraded_after_failures,
            heartbeat_every_ticks: settings.heartbeat_every_ticks.max(1),
        }
    }
}

/// Terminal outcome of one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub target_ms: u64,
    pub active_ms: u64,
    pub paused_ms: u64,
    pub started_at: chrono::DateTime<Utc>,
    pub stopped_at: chrono::DateTime<Utc>,
}

struct ActiveSession {
    events: mpsc::Sender<EngineEvent>,
    done: watch::Receiver<Option<SessionSummary>>,
    #[allow(dead_code)]
    coordinator: JoinHandle<()>,
}

/// The top-level coordinator handle. Owns the clock and monitor for the
/// current session and serializes every state mutation through one
/// coordinator task.
#[derive(Clone)]
pub struct EnforcementController {
    db: Database,
    probe: Arc<dyn ForegroundProbe>,
    intervention: Arc<dyn InterventionSink>,
    status: Arc<dyn StatusSink>,
    config: EngineConfig,
    state: Arc<Mutex<SessionState>>,
    active: Arc<Mutex<Option<ActiveSession>>>,
}

impl EnforcementController {
    pub fn new(
        db: Database,
        probe: Arc<dyn ForegroundProbe>,
        intervention: Arc<dyn InterventionSink>,
        status: Arc<dyn StatusSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            probe,
            intervention,
            status,
            config,
            state: Arc::new(Mutex::new(SessionState::new())),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Read-only snapshot of the current session state.
    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Starts a focus session over the given block-list snapshot. An empty
    /// rule list is valid; nothing is ever classified as blocked.
    pub async fn start_session(
        &self,
        target_ms: u64,
        rules: Vec<BlockRule>,
    ) -> Result<SessionState, EngineError> {
        if target_ms == 0 {
            return Err(EngineError::InvalidDuration);
        }

        let mut active_guard = self.active.lock().await;
        {
            let state = self.state.lock().await;
            if !state.can_start() {
                return Err(EngineError::SessionAlreadyActive);
            }
        }
        // A previous coordinator may still hold the slot after its terminal
        // state was acknowledged; the phase check above proves it is done.
        active_guard.take();

        let session_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let active_rules = rules.iter().filter(|rule| rule.active).count();

        let record = SessionRecord {
            id: session_id.clone(),
            started_at,
            stopped_at: None,
            status: SessionStatus::Running,
            target_ms,
            active_ms: 0,
            paused_ms: 0,
            created_at: started_at,
            updated_at: started_at,
        };
        self.db
            .insert_session(&record)
            .await
            .map_err(EngineError::Storage)?;

        let (events_tx, events_rx) = mpsc::channel(64);
        let (done_tx, done_rx) = watch::channel(None);

        let mut clock = SessionClock::new();
        clock.start(target_ms, self.config.tick_interval, events_tx.clone())?;

        let blocked: HashSet<String> = rules
            .iter()
            .filter(|rule| rule.active)
            .map(|rule| rule.package_id.clone())
            .collect();
        let mut monitor = ForegroundMonitor::new();
        monitor.start(
            Arc::clone(&self.probe),
            blocked,
            events_tx.clone(),
            MonitorConfig {
                poll_interval: self.config.poll_interval,
                probe_timeout: self.config.probe_timeout,
                degraded_after: self.config.degraded_after,
            },
        );

        let mut session = SessionState::new();
        session.begin(session_id.clone(), target_ms, active_rules, started_at);
        *self.state.lock().await = session.clone();

        info!(
            "focus session {session_id} started: {target_ms}ms, {active_rules} active rule(s)"
        );

        let coordinator = Coordinator {
            session,
            currently_blocked: None,
            intervention_shown: false,
            clock,
            monitor,
            db: self.db.clone(),
            intervention: Arc::clone(&self.intervention),
            status: Arc::clone(&self.status),
            shared: Arc::clone(&self.state),
            heartbeat_every_ticks: self.config.heartbeat_every_ticks,
            ticks: 0,
            paused_ms: 0,
            pause_started: None,
        };
        let handle = tokio::spawn(coordinator.run(events_rx, done_tx));

        *active_guard = Some(ActiveSession {
            events: events_tx,
            done: done_rx,
            coordinator: handle,
        });

        Ok(self.snapshot().await)
    }

    pub async fn pause(&self) {
        self.send_command(SessionCommand::Pause).await;
    }

    pub async fn resume(&self) {
        self.send_command(SessionCommand::Resume).await;
    }

    /// Stops the session and waits for enforcement to fully wind down: the
    /// clock and monitor have quiesced and any active intervention has been
    /// retracted before this returns. Returns the summary, or `None` when no
    /// session was active.
    pub async fn stop(&self) -> Option<SessionSummary> {
        let mut guard = self.active.lock().await;
        let active = guard.as_mut()?;

        // Delivery can fail only when the coordinator already reached a
        // terminal state on its own; await_summary picks up its result.
        let _ = active.events.send(EngineEvent::Command(SessionCommand::Stop)).await;
        let summary = Self::await_summary(active.done.clone()).await;
        guard.take();
        summary
    }

    /// Resolves when the running session reaches a terminal state.
    pub async fn wait(&self) -> Option<SessionSummary> {
        let done = {
            let guard = self.active.lock().await;
            guard.as_ref().map(|active| active.done.clone())
        }?;
        Self::await_summary(done).await
    }

    async fn await_summary(
        mut done: watch::Receiver<Option<SessionSummary>>,
    ) -> Option<SessionSummary> {
        loop {
            if let Some(summary) = done.borrow().clone() {
                return Some(summary);
            }
            if done.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn send_command(&self, command: SessionCommand) {
        let guard = self.active.lock().await;
        if let Some(active) = guard.as_ref() {
            // A closed channel means the session already ended; commands
            // after a terminal state are no-ops.
            let _ = active.events.send(EngineEvent::Command(command)).await;
        }
    }
}

/// Single task that owns all mutable session state. The clock and monitor
/// only ever talk to it through the event channel.
struct Coordinator {
    session: SessionState,
    /// Edge-detection memory: the blocked package currently in the
    /// foreground, if any.
    currently_blocked: Option<String>,
    /// Whether the intervention for `currently_blocked` actually went on
    /// screen. Stays false for edges recorded while paused.
    intervention_shown: bool,
    clock: SessionClock,
    monitor: ForegroundMonitor,
    db: Database,
    intervention: Arc<dyn InterventionSink>,
    status: Arc<dyn StatusSink>,
    shared: Arc<Mutex<SessionState>>,
    heartbeat_every_ticks: u32,
    ticks: u32,
    paused_ms: u64,
    pause_started: Option<Instant>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<EngineEvent>,
        done_tx: watch::Sender<Option<SessionSummary>>,
    ) {
        self.push_status();

        let summary = loop {
            let Some(event) = events.recv().await else {
                // every handle dropped without a stop command; wind down as
                // if one had arrived
                break self.finalize(SessionStatus::Stopped).await;
            };

            match event {
                EngineEvent::Clock(ClockEvent::Tick { remaining_ms }) => {
                    self.on_tick(remaining_ms).await;
                }
                EngineEvent::Clock(ClockEvent::Finished) => {
                    break self.finalize(SessionStatus::Finished).await;
                }
                EngineEvent::Monitor(monitor_event) => {
                    self.on_monitor(monitor_event).await;
                }
                EngineEvent::Command(SessionCommand::Pause) => {
                    self.on_pause().await;
                }
                EngineEvent::Command(SessionCommand::Resume) => {
                    self.on_resume().await;
                }
                EngineEvent::Command(SessionCommand::Stop) => {
                    break self.finalize(SessionStatus::Stopped).await;
                }
            }

            self.mirror().await;
        };

        let _ = done_tx.send(Some(summary));
    }

    async fn on_tick(&mut self, remaining_ms: u64) {
        // A tick that was in flight when a pause landed is dropped here; the
        // clock's countdown stays authoritative and re-syncs on the next
        // delivered tick.
        if self.session.phase != SessionPhase::Running {
            return;
        }

        self.session.remaining_ms = remaining_ms;
        self.ticks = self.ticks.wrapping_add(1);
        self.push_status();

        if self.ticks % self.heartbeat_every_ticks == 0 {
            if let Some(session_id) = self.session.session_id.clone() {
                let result = self
                    .db
                    .update_session_progress(
                        &session_id,
                        self.session.active_ms(),
                        self.current_paused_ms(),
                        Utc::now(),
                    )
                    .await;
                if let Err(err) = result {
                    error!("failed to record session heartbeat: {err:#}");
                }
            }
        }
    }

    async fn on_monitor(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Sample { package_id, blocked } => {
                self.on_sample(package_id, blocked);
            }
            MonitorEvent::Degraded => {
                if !self.session.degraded {
                    self.session.degraded = true;
                    warn!("foreground monitoring degraded; enforcement is best-effort until the probe recovers");
                    self.push_status();
                }
            }
            MonitorEvent::Recovered => {
                if self.session.degraded {
                    self.session.degraded = false;
                    info!("foreground monitoring recovered");
                    self.push_status();
                }
            }
        }
    }

    fn on_sample(&mut self, package_id: String, blocked: bool) {
        if blocked {
            if self.currently_blocked.as_deref() != Some(package_id.as_str()) {
                // enter-block edge (covers hopping straight between two
                // blocked apps)
                if self.intervention_shown {
                    self.retract();
                }
                self.currently_blocked = Some(package_id.clone());
                self.intervention_shown = false;
                if self.session.phase == SessionPhase::Running {
                    self.trigger(&package_id);
                }
            } else if self.session.phase == SessionPhase::Running && !self.intervention_shown {
                // Edge recorded while paused (or the sink failed last time):
                // the first blocked sample back in Running re-evaluates it
                // instead of replaying the stale trigger.
                self.trigger(&package_id);
            }
        } else if self.currently_blocked.is_some() {
            // exit-block edge
            self.currently_blocked = None;
            if self.intervention_shown {
                self.retract();
            }
        }
    }

    async fn on_pause(&mut self) {
        if !self.session.pause() {
            return;
        }

        self.clock.pause();
        self.pause_started = Some(Instant::now());

        if let Some(session_id) = self.session.session_id.clone() {
            let pause = PauseRecord {
                id: Uuid::new_v4().to_string(),
                session_id,
                started_at: Utc::now(),
                ended_at: None,
                duration_ms: None,
            };
            if let Err(err) = self.db.insert_pause(&pause).await {
                error!("failed to record pause: {err:#}");
            }
        }

        info!("focus session paused at {}ms remaining", self.session.remaining_ms);
        self.push_status();
    }

    async fn on_resume(&mut self) {
        if !self.session.resume() {
            return;
        }

        self.clock.resume();
        if let Some(started) = self.pause_started.take() {
            self.paused_ms += started.elapsed().as_millis() as u64;
        }

        if let Some(session_id) = self.session.session_id.clone() {
            if let Err(err) = self.db.finalize_open_pauses(&session_id, Utc::now()).await {
                error!("failed to close pause record: {err:#}");
            }
        }

        info!("focus session resumed at {}ms remaining", self.session.remaining_ms);
        self.push_status();
    }

    /// Winds the session down into `status`. Quiesces the clock and monitor
    /// first so no late tick or poll can fire an effect afterwards, then
    /// retracts any active intervention, flushes the final status frame, and
    /// persists the terminal row.
    async fn finalize(&mut self, status: SessionStatus) -> SessionSummary {
        self.clock.stop().await;
        if let Err(err) = self.monitor.stop().await {
            error!("foreground monitor did not shut down cleanly: {err:#}");
        }

        let stopped_at = Utc::now();

        if let Some(started) = self.pause_started.take() {
            self.paused_ms += started.elapsed().as_millis() as u64;
        }
        if let Some(session_id) = self.session.session_id.clone() {
            if let Err(err) = self.db.finalize_open_pauses(&session_id, stopped_at).await {
                error!("failed to close pause record: {err:#}");
            }
        }

        self.currently_blocked = None;
        if self.intervention_shown {
            self.retract();
        }

        match status {
            SessionStatus::Finished => {
                self.session.finish();
            }
            _ => {
                self.session.stop();
            }
        }
        self.push_status();

        let session_id = self.session.session_id.clone().unwrap_or_default();
        let summary = SessionSummary {
            session_id: session_id.clone(),
            status,
            target_ms: self.session.target_ms,
            active_ms: self.session.active_ms(),
            paused_ms: self.paused_ms,
            started_at: self.session.started_at.unwrap_or(stopped_at),
            stopped_at,
        };

        if let Err(err) = self
            .db
            .mark_session_status(
                &session_id,
                status,
                summary.active_ms,
                summary.paused_ms,
                Some(stopped_at),
                stopped_at,
            )
            .await
        {
            error!("failed to persist session end: {err:#}");
        }

        self.mirror().await;
        info!("focus session {session_id} {}", status.as_str());

        summary
    }

    fn trigger(&mut self, package_id: &str) {
        match self.intervention.show(package_id) {
            Ok(()) => {
                info!("intervention shown for {package_id}");
                self.intervention_shown = true;
            }
            Err(err) => {
                // left unset so the next blocked sample retries
                warn!("intervention sink failed for {package_id}: {err:#}");
            }
        }
    }

    fn retract(&mut self) {
        if let Err(err) = self.intervention.hide() {
            warn!("intervention sink failed to hide: {err:#}");
        }
        self.intervention_shown = false;
    }

    fn push_status(&self) {
        let frame = render_status(&self.session);
        if let Err(err) = self.status.update(&frame) {
            warn!("status update failed: {err:#}");
        }
    }

    fn current_paused_ms(&self) -> u64 {
        match self.pause_started {
            Some(started) => self.paused_ms + started.elapsed().as_millis() as u64,
            None => self.paused_ms,
        }
    }

    async fn mirror(&self) {
        *self.shared.lock().await = self.session.clone();
    }
}
