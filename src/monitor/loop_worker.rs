use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::probe::ForegroundProbe;
use super::{MonitorConfig, MonitorEvent};
use crate::session::controller::EngineEvent;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub(crate) async fn monitor_loop(
    probe: Arc<dyn ForegroundProbe>,
    blocked: Arc<HashSet<String>>,
    events: mpsc::Sender<EngineEvent>,
    config: MonitorConfig,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut consecutive_failures: u32 = 0;
    let mut degraded = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = perform_poll(&probe, config.poll_interval, config.probe_timeout).await;

                match outcome {
                    Ok(Some(package_id)) => {
                        consecutive_failures = 0;
                        if degraded {
                            degraded = false;
                            log_info!("foreground probe recovered");
                            if events.send(EngineEvent::Monitor(MonitorEvent::Recovered)).await.is_err() {
                                break;
                            }
                        }

                        let is_blocked = blocked.contains(&package_id);
                        let event = MonitorEvent::Sample { package_id, blocked: is_blocked };
                        if events.send(EngineEvent::Monitor(event)).await.is_err() {
                            break;
                        }
                    }
                    missed => {
                        if let Err(err) = missed {
                            log_warn!("foreground probe failed: {err:#}");
                        }
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        if !degraded && consecutive_failures >= config.degraded_after {
                            degraded = true;
                            log_warn!(
                                "foreground probe unavailable for {consecutive_failures} consecutive polls, monitoring degraded"
                            );
                            if events.send(EngineEvent::Monitor(MonitorEvent::Degraded)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("foreground monitor shutting down");
                break;
            }
        }
    }
}

/// One probe call on the blocking pool, capped by the configured timeout. A
/// timed-out call keeps running on the pool; the loop simply moves on to the
/// next poll without waiting for it.
async fn perform_poll(
    probe: &Arc<dyn ForegroundProbe>,
    window: Duration,
    timeout: Duration,
) -> anyhow::Result<Option<String>> {
    let probe = Arc::clone(probe);
    let sample_task = tokio::task::spawn_blocking(move || probe.sample(window));

    match tokio::time::timeout(timeout, sample_task).await {
        Ok(Ok(result)) => result.map(|sample| sample.map(|s| s.package_id)),
        Ok(Err(join_err)) => Err(anyhow!("probe worker failed to join: {join_err}")),
        Err(_) => Err(anyhow!("probe timed out (> {timeout:?})")),
    }
}
