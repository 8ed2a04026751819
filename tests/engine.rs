use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{Duration as ChronoDuration, Utc};
use tempfile::{tempdir, TempDir};
use tokio::time::sleep;

use focusfence::{
    BlockRule, Database, EnforcementController, EngineConfig, EngineError, ForegroundProbe,
    ForegroundSample, InterventionSink, SessionPhase, SessionStatus, StatusFrame, StatusSink,
};

/// One scripted poll outcome: Some(app) is a foreground sample, None is a
/// probe miss. The final step repeats once the script runs out.
type Step = Option<&'static str>;

struct ScriptedProbe {
    steps: Mutex<VecDeque<Step>>,
    hold: Mutex<Step>,
}

impl ScriptedProbe {
    fn new(steps: &[Step]) -> Self {
        Self {
            steps: Mutex::new(steps.iter().copied().collect()),
            hold: Mutex::new(None),
        }
    }
}

impl ForegroundProbe for ScriptedProbe {
    fn sample(&self, _window: Duration) -> Result<Option<ForegroundSample>> {
        let mut steps = self.steps.lock().unwrap();
        let step = match steps.pop_front() {
            Some(step) => {
                *self.hold.lock().unwrap() = step;
                step
            }
            None => *self.hold.lock().unwrap(),
        };

        Ok(step.map(|package_id| ForegroundSample {
            package_id: package_id.to_string(),
            sampled_at: Utc::now(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InterventionCall {
    Show(String),
    Hide,
}

#[derive(Default)]
struct RecordingInterventionSink {
    calls: Mutex<Vec<InterventionCall>>,
}

impl RecordingInterventionSink {
    fn calls(&self) -> Vec<InterventionCall> {
        self.calls.lock().unwrap().clone()
    }

    fn shows(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, InterventionCall::Show(_)))
            .count()
    }

    fn hides(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, InterventionCall::Hide))
            .count()
    }
}

impl InterventionSink for RecordingInterventionSink {
    fn show(&self, package_id: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(InterventionCall::Show(package_id.to_string()));
        Ok(())
    }

    fn hide(&self) -> Result<()> {
        self.calls.lock().unwrap().push(InterventionCall::Hide);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingStatusSink {
    frames: Mutex<Vec<StatusFrame>>,
}

impl RecordingStatusSink {
    fn frames(&self) -> Vec<StatusFrame> {
        self.frames.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingStatusSink {
    fn update(&self, frame: &StatusFrame) -> Result<()> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

struct FailingStatusSink;

impl StatusSink for FailingStatusSink {
    fn update(&self, _frame: &StatusFrame) -> Result<()> {
        Err(anyhow!("no status surface available"))
    }
}

fn config(tick_ms: u64, poll_ms: u64) -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_millis(tick_ms),
        poll_interval: Duration::from_millis(poll_ms),
        probe_timeout: Duration::from_millis(250),
        degraded_after: 3,
        heartbeat_every_ticks: 5,
    }
}

fn rules(packages: &[&str]) -> Vec<BlockRule> {
    packages
        .iter()
        .map(|package_id| BlockRule {
            package_id: package_id.to_string(),
            app_name: package_id.to_string(),
            active: true,
        })
        .collect()
}

struct Harness {
    controller: EnforcementController,
    db: Database,
    interventions: Arc<RecordingInterventionSink>,
    status: Arc<RecordingStatusSink>,
    _dir: TempDir,
}

fn harness(probe: ScriptedProbe, config: EngineConfig) -> Harness {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("test.sqlite3")).unwrap();
    let interventions = Arc::new(RecordingInterventionSink::default());
    let status = Arc::new(RecordingStatusSink::default());

    let controller = EnforcementController::new(
        db.clone(),
        Arc::new(probe),
        interventions.clone(),
        status.clone(),
        config,
    );

    Harness {
        controller,
        db,
        interventions,
        status,
        _dir: dir,
    }
}

#[tokio::test]
async fn undisturbed_session_finishes_after_exact_tick_count() {
    let h = harness(ScriptedProbe::new(&[Some("com.editor")]), config(25, 10));
    h.controller.start_session(250, rules(&[])).await.unwrap();

    let summary = h.controller.wait().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Finished);
    assert_eq!(summary.active_ms, 250);
    assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Finished);

    // one frame at start, one per tick, one final flush
    let remainings: Vec<u64> = h.status.frames().iter().map(|f| f.remaining_ms).collect();
    assert_eq!(remainings.len(), 12);
    assert_eq!(remainings[0], 250);
    assert!(remainings.windows(2).all(|pair| pair[1] <= pair[0]));
    assert_eq!(*remainings.last().unwrap(), 0);
}

#[tokio::test]
async fn finished_session_is_persisted_to_history() {
    let h = harness(ScriptedProbe::new(&[Some("com.editor")]), config(25, 10));
    h.controller.start_session(150, rules(&[])).await.unwrap();
    let summary = h.controller.wait().await.unwrap();

    let record = h.db.get_session(&summary.session_id).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Finished);
    assert_eq!(record.active_ms, 150);
    assert!(record.stopped_at.is_some());

    let stats = h
        .db
        .weekly_focus_stats(Utc::now() - ChronoDuration::days(1))
        .await
        .unwrap();
    assert_eq!(stats.focused_ms, 150);
    assert_eq!(stats.finished_sessions, 1);
}

#[tokio::test]
async fn enter_and_exit_edges_fire_show_and_hide_once() {
    // samples: mail, games, games, chat. Show on the 2nd, hide on the 4th
    let probe = ScriptedProbe::new(&[
        Some("com.mail"),
        Some("com.games.x"),
        Some("com.games.x"),
        Some("com.chat"),
    ]);
    let h = harness(probe, config(200, 25));
    h.controller
        .start_session(60_000, rules(&["com.games.x"]))
        .await
        .unwrap();

    sleep(Duration::from_millis(400)).await;
    assert_eq!(
        h.interventions.calls(),
        vec![
            InterventionCall::Show("com.games.x".to_string()),
            InterventionCall::Hide,
        ]
    );

    let summary = h.controller.stop().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Stopped);
    // nothing was on screen at stop time, so no extra hide
    assert_eq!(h.interventions.hides(), 1);
}

#[tokio::test]
async fn steady_state_on_a_blocked_app_never_refires() {
    let h = harness(ScriptedProbe::new(&[Some("com.games.x")]), config(200, 20));
    h.controller
        .start_session(60_000, rules(&["com.games.x"]))
        .await
        .unwrap();

    sleep(Duration::from_millis(400)).await;
    assert_eq!(h.interventions.shows(), 1);
    assert_eq!(h.interventions.hides(), 0);

    h.controller.stop().await.unwrap();
    assert_eq!(h.interventions.shows(), 1);
    assert_eq!(h.interventions.hides(), 1);
}

#[tokio::test]
async fn hopping_between_blocked_apps_retriggers_per_package() {
    let probe = ScriptedProbe::new(&[Some("com.games.x"), Some("com.games.y")]);
    let h = harness(probe, config(200, 25));
    h.controller
        .start_session(60_000, rules(&["com.games.x", "com.games.y"]))
        .await
        .unwrap();

    sleep(Duration::from_millis(300)).await;
    assert_eq!(
        h.interventions.calls(),
        vec![
            InterventionCall::Show("com.games.x".to_string()),
            InterventionCall::Hide,
            InterventionCall::Show("com.games.y".to_string()),
        ]
    );

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn empty_block_list_never_intervenes_and_still_finishes() {
    let h = harness(ScriptedProbe::new(&[Some("com.games.x")]), config(20, 10));
    h.controller.start_session(160, Vec::new()).await.unwrap();

    let summary = h.controller.wait().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Finished);
    assert!(h.interventions.calls().is_empty());
}

#[tokio::test]
async fn inactive_rules_do_not_block() {
    let h = harness(ScriptedProbe::new(&[Some("com.news")]), config(200, 20));
    let inactive = vec![BlockRule {
        package_id: "com.news".to_string(),
        app_name: "News".to_string(),
        active: false,
    }];
    h.controller.start_session(60_000, inactive).await.unwrap();

    sleep(Duration::from_millis(300)).await;
    assert!(h.interventions.calls().is_empty());

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn pause_freezes_remaining_and_commands_are_idempotent() {
    let h = harness(ScriptedProbe::new(&[Some("com.editor")]), config(40, 10));
    h.controller.start_session(4_000, rules(&[])).await.unwrap();

    sleep(Duration::from_millis(200)).await;
    h.controller.pause().await;
    sleep(Duration::from_millis(50)).await;

    let before = h.controller.snapshot().await;
    assert_eq!(before.phase, SessionPhase::Paused);

    // ten tick intervals elapse while paused; remaining must not move
    sleep(Duration::from_millis(400)).await;
    h.controller.pause().await; // second pause is a no-op
    let after = h.controller.snapshot().await;
    assert_eq!(after.phase, SessionPhase::Paused);
    assert_eq!(after.remaining_ms, before.remaining_ms);

    h.controller.resume().await;
    h.controller.resume().await; // second resume is a no-op
    sleep(Duration::from_millis(120)).await;

    let resumed = h.controller.snapshot().await;
    assert_eq!(resumed.phase, SessionPhase::Running);
    assert!(resumed.remaining_ms < before.remaining_ms);
    // a few ticks, plus at most one that was in flight around the pause
    assert!(before.remaining_ms - resumed.remaining_ms <= 40 * 5);

    let summary = h.controller.stop().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Stopped);
    assert!(summary.paused_ms >= 350);
}

#[tokio::test]
async fn enforcement_is_suspended_while_paused_and_reevaluated_on_resume() {
    // eight polls of mail, then games forever
    let probe = ScriptedProbe::new(&[
        Some("com.mail"),
        Some("com.mail"),
        Some("com.mail"),
        Some("com.mail"),
        Some("com.mail"),
        Some("com.mail"),
        Some("com.mail"),
        Some("com.mail"),
        Some("com.games.x"),
    ]);
    let h = harness(probe, config(500, 25));
    h.controller
        .start_session(120_000, rules(&["com.games.x"]))
        .await
        .unwrap();

    sleep(Duration::from_millis(50)).await;
    h.controller.pause().await;

    // the blocked app surfaces while paused: edge is tracked, nothing shown
    sleep(Duration::from_millis(300)).await;
    assert_eq!(h.interventions.shows(), 0);

    h.controller.resume().await;
    sleep(Duration::from_millis(150)).await;
    assert_eq!(h.interventions.shows(), 1);

    // still the same maximal run, so no refire
    sleep(Duration::from_millis(150)).await;
    assert_eq!(h.interventions.shows(), 1);

    h.controller.stop().await.unwrap();
    assert_eq!(h.interventions.hides(), 1);
}

#[tokio::test]
async fn stop_before_first_tick_never_finishes_and_never_intervenes() {
    let h = harness(ScriptedProbe::new(&[Some("com.editor")]), config(100, 50));
    h.controller
        .start_session(60_000, rules(&["com.games.x"]))
        .await
        .unwrap();

    let summary = h.controller.stop().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Stopped);
    assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Stopped);
    assert!(h.interventions.calls().is_empty());

    let last = h.status.frames().last().cloned().unwrap();
    assert!(!last.stop_enabled);
}

#[tokio::test]
async fn stop_retracts_an_active_intervention_before_returning() {
    let h = harness(ScriptedProbe::new(&[Some("com.games.x")]), config(500, 20));
    h.controller
        .start_session(60_000, rules(&["com.games.x"]))
        .await
        .unwrap();

    sleep(Duration::from_millis(150)).await;
    assert_eq!(h.interventions.shows(), 1);
    assert_eq!(h.interventions.hides(), 0);

    h.controller.stop().await.unwrap();
    // by the time stop resolves, the retraction has been issued
    assert_eq!(h.interventions.hides(), 1);
}

#[tokio::test]
async fn commands_after_a_terminal_state_are_noops() {
    let h = harness(ScriptedProbe::new(&[Some("com.editor")]), config(20, 10));
    h.controller.start_session(100, rules(&[])).await.unwrap();
    h.controller.wait().await.unwrap();

    h.controller.pause().await;
    h.controller.resume().await;
    assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Finished);

    // stop after a natural finish just hands back the recorded summary
    let summary = h.controller.stop().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Finished);
    assert!(h.controller.stop().await.is_none());
}

#[tokio::test]
async fn second_start_is_rejected_until_the_first_session_ends() {
    let h = harness(ScriptedProbe::new(&[Some("com.editor")]), config(100, 50));
    h.controller.start_session(60_000, rules(&[])).await.unwrap();

    let err = h.controller.start_session(60_000, rules(&[])).await;
    assert!(matches!(err, Err(EngineError::SessionAlreadyActive)));

    h.controller.stop().await.unwrap();

    // a fresh session may start once the previous one is acknowledged
    h.controller.start_session(60_000, rules(&[])).await.unwrap();
    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn zero_duration_start_is_rejected() {
    let h = harness(ScriptedProbe::new(&[Some("com.editor")]), config(100, 50));
    let err = h.controller.start_session(0, rules(&[])).await;
    assert!(matches!(err, Err(EngineError::InvalidDuration)));
    assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Idle);
}

#[tokio::test]
async fn probe_failures_degrade_status_and_recover_without_stopping() {
    // five misses trip the degraded marker (threshold 3), then recovery
    let probe = ScriptedProbe::new(&[None, None, None, None, None, Some("com.editor")]);
    let h = harness(probe, config(25, 25));
    h.controller.start_session(500, rules(&[])).await.unwrap();

    let summary = h.controller.wait().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Finished);

    let frames = h.status.frames();
    assert!(frames.iter().any(|f| f.text.contains("monitoring degraded")));
    assert!(!frames.last().unwrap().text.contains("monitoring degraded"));
}

#[tokio::test]
async fn status_sink_failure_is_nonfatal() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("test.sqlite3")).unwrap();
    let interventions = Arc::new(RecordingInterventionSink::default());

    let controller = EnforcementController::new(
        db,
        Arc::new(ScriptedProbe::new(&[Some("com.editor")])),
        interventions,
        Arc::new(FailingStatusSink),
        config(20, 10),
    );

    controller.start_session(100, rules(&[])).await.unwrap();
    let summary = controller.wait().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Finished);
}
