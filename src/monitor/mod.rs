pub mod loop_worker;
pub mod probe;

pub use probe::{ForegroundProbe, ForegroundSample, RecentProcessProbe};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::controller::EngineEvent;
use loop_worker::monitor_loop;

/// What the polling loop reports to the coordinator. Every usable sample is
/// delivered; edge detection against the session's block memory happens in
/// the coordinator, never here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Sample { package_id: String, blocked: bool },
    Degraded,
    Recovered,
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    /// Consecutive probe failures before a Degraded event is raised.
    pub degraded_after: u32,
}

/// Owns the polling task for one session.
pub struct ForegroundMonitor {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl ForegroundMonitor {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(
        &mut self,
        probe: Arc<dyn ForegroundProbe>,
        blocked: HashSet<String>,
        events: mpsc::Sender<EngineEvent>,
        config: MonitorConfig,
    ) {
        debug_assert!(self.handle.is_none(), "monitor started twice");

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let handle = tokio::spawn(monitor_loop(
            probe,
            Arc::new(blocked),
            events,
            config,
            token_clone,
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
    }

    /// Cancels the polling task and waits for it to quiesce, so no further
    /// sample can arrive once this returns.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("monitor task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for ForegroundMonitor {
    fn default() -> Self {
        Self::new()
    }
}
