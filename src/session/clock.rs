use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::controller::EngineEvent;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// One elapsed tick interval. Carries the countdown position after the
    /// decrement; the coordinator copies it into the session, never computes
    /// its own.
    Tick { remaining_ms: u64 },
    /// The countdown reached zero. Emitted exactly once, after the final
    /// tick; the clock task exits right after.
    Finished,
}

/// Countdown ticker for one session. Pausing suppresses ticks without losing
/// the countdown position; suppressed ticks are dropped, not queued, so
/// resuming never produces a catch-up burst.
pub struct SessionClock {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    pause_tx: Option<watch::Sender<bool>>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            pause_tx: None,
        }
    }

    pub fn start(
        &mut self,
        total_ms: u64,
        tick_interval: Duration,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<(), EngineError> {
        if total_ms == 0 {
            return Err(EngineError::InvalidDuration);
        }
        debug_assert!(self.handle.is_none(), "clock started twice");

        let cancel_token = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);

        let handle = tokio::spawn(clock_loop(
            total_ms,
            tick_interval,
            events,
            pause_rx,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.pause_tx = Some(pause_tx);
        Ok(())
    }

    /// Idempotent: pausing an already-paused (or stopped) clock is a no-op.
    pub fn pause(&self) {
        if let Some(tx) = &self.pause_tx {
            let _ = tx.send(true);
        }
    }

    /// Idempotent: resuming a running (or stopped) clock is a no-op.
    pub fn resume(&self) {
        if let Some(tx) = &self.pause_tx {
            let _ = tx.send(false);
        }
    }

    /// Terminates ticking permanently and waits for the clock task to
    /// quiesce. Pause/resume calls after this are no-ops.
    pub async fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.pause_tx = None;
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

async fn clock_loop(
    total_ms: u64,
    tick_interval: Duration,
    events: mpsc::Sender<EngineEvent>,
    pause_rx: watch::Receiver<bool>,
    cancel_token: CancellationToken,
) {
    let tick_ms = tick_interval.as_millis() as u64;
    let mut remaining_ms = total_ms;

    // interval_at: the first tick lands one full interval after start, not
    // immediately.
    let mut ticker = time::interval_at(time::Instant::now() + tick_interval, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if *pause_rx.borrow() {
                    continue;
                }

                remaining_ms = remaining_ms.saturating_sub(tick_ms);
                if events
                    .send(EngineEvent::Clock(ClockEvent::Tick { remaining_ms }))
                    .await
                    .is_err()
                {
                    break;
                }

                if remaining_ms == 0 {
                    let _ = events.send(EngineEvent::Clock(ClockEvent::Finished)).await;
                    break;
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::controller::EngineEvent;

    fn collect_clock_events(events: Vec<EngineEvent>) -> Vec<ClockEvent> {
        events
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::Clock(clock_event) => Some(clock_event),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let (tx, _rx) = mpsc::channel(8);
        let mut clock = SessionClock::new();
        assert!(matches!(
            clock.start(0, Duration::from_millis(10), tx),
            Err(EngineError::InvalidDuration)
        ));
    }

    #[tokio::test]
    async fn emits_one_tick_per_interval_then_finished_exactly_once() {
        let (tx, mut rx) = mpsc::channel(32);
        let mut clock = SessionClock::new();
        clock.start(50, Duration::from_millis(10), tx).unwrap();

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }

        let clock_events = collect_clock_events(received);
        assert_eq!(clock_events.len(), 6);
        for (index, event) in clock_events.iter().take(5).enumerate() {
            assert_eq!(
                *event,
                ClockEvent::Tick {
                    remaining_ms: 50 - 10 * (index as u64 + 1)
                }
            );
        }
        assert_eq!(clock_events[5], ClockEvent::Finished);

        clock.stop().await;
    }

    #[tokio::test]
    async fn pause_suppresses_ticks_without_losing_position() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut clock = SessionClock::new();
        clock.start(10_000, Duration::from_millis(10), tx).unwrap();

        // let a couple of ticks through, then pause
        let first = rx.recv().await.unwrap();
        let EngineEvent::Clock(ClockEvent::Tick { remaining_ms }) = first else {
            panic!("expected a tick");
        };
        clock.pause();
        clock.pause(); // idempotent

        // drain anything that was in flight when the pause landed
        tokio::time::sleep(Duration::from_millis(80)).await;
        let mut last_seen = remaining_ms;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::Clock(ClockEvent::Tick { remaining_ms }) = event {
                last_seen = remaining_ms;
            }
        }

        // a long paused stretch delivers nothing
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        clock.resume();
        let next = loop {
            match rx.recv().await.unwrap() {
                EngineEvent::Clock(ClockEvent::Tick { remaining_ms }) => break remaining_ms,
                _ => continue,
            }
        };
        // no catch-up burst: the first tick after resume is exactly one
        // interval below where the clock stopped
        assert_eq!(next, last_seen - 10);

        clock.stop().await;
    }

    #[tokio::test]
    async fn stop_quiesces_tick_delivery() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut clock = SessionClock::new();
        clock.start(10_000, Duration::from_millis(10), tx).unwrap();

        let _ = rx.recv().await;
        clock.stop().await;

        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
