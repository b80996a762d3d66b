//! Behavioral tests across the scheduler, the relationship state and the
//! running engine.
//!
//! The first half drives `ProactivityScheduler` directly with a manual clock
//! and seeded randomness; the second half starts a real engine loop against
//! a mock sampler and an in-memory store.

use super::activity::ActivityRecord;
use super::initiative::{compose, ProactiveCategory, ProactiveContent, ProactiveTrigger};
use super::mode::{EffectiveMode, ModeReason, ModeState, PrimarySetting};
use super::relationship::{ProactiveOutcome, RelationshipState};
use super::scheduler::{Attempt, FireContext, ProactivityScheduler};
use super::sentiment::AffectCue;
use super::timers::{TimerPurpose, TimerSet};
use crate::config::{BehaviorConfig, ProactiveConfig};
use crate::engine::BehaviorEngine;
use crate::error::{BehaviorError, Result};
use crate::signals::{NullSampler, SignalSampler};
use crate::storage::{JsonFileStore, MemoryStore};
use crate::utils::{Clock, ManualClock, RandomSource, StdRandom};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Always returns the same value: every roll succeeds at 0.0, every band
/// yields its lower edge.
struct Fixed(f64);

impl RandomSource for Fixed {
    fn next_f64(&mut self) -> f64 {
        self.0
    }
}

// ── Scheduler simulation ───────────────────────────────────

/// Run the scheduler through `ticks` 30-second steps with randomized user
/// behavior, mode and idle time. Returns every emission time.
fn simulate(ticks: usize, seed: u64) -> Vec<DateTime<Utc>> {
    let clock = ManualClock::at_epoch();
    let mut rng = StdRandom::seeded(seed);
    let mut world = StdRandom::seeded(seed.wrapping_mul(31).wrapping_add(7));
    let mut scheduler = ProactivityScheduler::new(ProactiveConfig::default());
    let mut activity = ActivityRecord::new(clock.now());
    let mut state = RelationshipState::default();
    let mut timers = TimerSet::new();
    let mut emitted = Vec::new();

    scheduler.on_activity(clock.now(), &mut activity, &mut timers, &mut rng);

    for _ in 0..ticks {
        clock.advance(Duration::seconds(30));
        let now = clock.now();

        let event = world.next_f64();
        if event < 0.01 {
            scheduler.on_user_sent("hey", now, &mut activity, &mut state, &mut timers, &mut rng);
        } else if event < 0.03 {
            scheduler.on_activity(now, &mut activity, &mut timers, &mut rng);
        } else if event < 0.05 {
            scheduler.on_typing(now, &mut activity, &mut timers);
        }

        let mode = match world.pick_index(10) {
            0 => EffectiveMode::Focus,
            1 => EffectiveMode::Quiet,
            _ => EffectiveMode::HangOut,
        };
        let visible = world.next_f64() < 0.9;
        let idle_ms = (world.next_f64() * 20.0 * 60_000.0) as u64;

        for purpose in timers.take_due(now) {
            match purpose {
                TimerPurpose::IdleFire => {
                    let ctx = FireContext {
                        visible,
                        mode,
                        idle_ms,
                        activity: &activity,
                    };
                    let attempt =
                        scheduler.on_idle_fire(&ctx, &mut state, &[], now, &mut timers, &mut rng);
                    if let Some(message) = attempt.into_message() {
                        emitted.push(message.emitted_at);
                    }
                }
                TimerPurpose::TypingGrace => scheduler.on_typing_grace_elapsed(now, &mut activity),
                TimerPurpose::RateLimit => {
                    scheduler.on_rate_limit_elapsed(now, &mut timers, &mut rng)
                }
                TimerPurpose::Persist => {}
            }
        }

        if world.next_f64() < 0.01 {
            let ctx = FireContext {
                visible,
                mode,
                idle_ms,
                activity: &activity,
            };
            let attempt = scheduler.initiate(
                ProactiveTrigger::WindowFocus,
                &ctx,
                &mut state,
                &[],
                now,
                &mut timers,
                &mut rng,
            );
            if let Some(message) = attempt.into_message() {
                emitted.push(message.emitted_at);
            }
        }

        // Always either armed or cooling down.
        assert!(
            timers.is_pending(TimerPurpose::IdleFire) || timers.is_pending(TimerPurpose::RateLimit)
        );
        assert!(state.initiative >= 0.05 && state.initiative <= 0.95);
    }
    emitted
}

fn assert_rate_limited(emitted: &[DateTime<Utc>]) {
    let (min_gap, _) = ProactiveConfig::default().rate_limit_band();
    for pair in emitted.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= min_gap, "messages only {} min apart", gap.num_minutes());
    }
}

#[test]
fn rate_limit_holds_over_ten_thousand_ticks() {
    for seed in [1, 2, 3] {
        let emitted = simulate(10_000, seed);
        assert!(emitted.len() >= 10, "seed {} emitted only {}", seed, emitted.len());
        assert_rate_limited(&emitted);
    }
}

#[cfg(feature = "stress")]
#[test]
fn rate_limit_holds_over_a_million_ticks() {
    for seed in 0..8 {
        assert_rate_limited(&simulate(1_000_000, seed));
    }
}

#[test]
fn no_template_repeats_within_the_window() {
    let config = ProactiveConfig::default();
    let now = ManualClock::at_epoch().now();
    let mut rng = StdRandom::seeded(42);

    for content in [
        ProactiveContent::Ambient,
        ProactiveContent::Invitation,
        ProactiveContent::MemoryEcho {
            fact: "you started learning piano".into(),
        },
        ProactiveContent::Emotional {
            cue: AffectCue::Tired,
        },
        ProactiveContent::Emotional {
            cue: AffectCue::Happy,
        },
    ] {
        let mut state = RelationshipState::default();
        let mut ids = Vec::new();
        for _ in 0..100 {
            let message = compose(
                content.clone(),
                &state,
                ProactiveTrigger::IdleTimer,
                now,
                &config,
                &mut rng,
            )
            .expect("pool is never empty");
            state = state.on_proactive_outcome(
                ProactiveOutcome::Sent {
                    category: message.category,
                    template_id: message.template_id.to_string(),
                },
                now,
                &config,
            );
            ids.push(message.template_id);
        }
        for window in ids.windows(config.anti_repetition_window) {
            let distinct: HashSet<_> = window.iter().collect();
            assert_eq!(distinct.len(), window.len(), "repeat in {:?}", window);
        }
    }
}

// ── Feedback loop ──────────────────────────────────────────

struct Bench {
    clock: ManualClock,
    scheduler: ProactivityScheduler,
    activity: ActivityRecord,
    state: RelationshipState,
    timers: TimerSet,
}

impl Bench {
    fn new() -> Self {
        let clock = ManualClock::at_epoch();
        Self {
            activity: ActivityRecord::new(clock.now()),
            clock,
            scheduler: ProactivityScheduler::new(ProactiveConfig::default()),
            state: RelationshipState::default(),
            timers: TimerSet::new(),
        }
    }

    fn fire(&mut self) -> Attempt {
        let now = self.clock.now();
        let ctx = FireContext {
            visible: true,
            mode: EffectiveMode::HangOut,
            idle_ms: 4 * 60_000,
            activity: &self.activity,
        };
        self.scheduler.on_idle_fire(
            &ctx,
            &mut self.state,
            &[],
            now,
            &mut self.timers,
            &mut Fixed(0.0),
        )
    }
}

#[test]
fn reply_after_emission_raises_initiative() {
    let mut bench = Bench::new();
    bench.clock.advance(Duration::minutes(10));
    let before = bench.state.initiative;
    assert!(bench.fire().message().is_some());

    bench.clock.advance(Duration::minutes(1));
    let now = bench.clock.now();
    bench.scheduler.on_user_sent(
        "haha yes",
        now,
        &mut bench.activity,
        &mut bench.state,
        &mut bench.timers,
        &mut Fixed(0.0),
    );
    assert!(bench.state.initiative > before);
    assert!(!bench.state.pending_acknowledgment);
}

#[test]
fn silence_past_decay_window_lowers_initiative_without_sending() {
    let mut bench = Bench::new();
    bench.clock.advance(Duration::minutes(10));
    assert!(bench.fire().message().is_some());
    let before = bench.state.initiative;
    let last_sent = bench.state.last_proactive_at;

    bench.clock.advance(Duration::hours(7));
    let attempt = bench.fire();
    assert!(matches!(attempt, Attempt::IgnoredPenalty { .. }));
    assert!(bench.state.initiative < before);
    assert_eq!(bench.state.last_proactive_at, last_sent);

    // Penalized once per decay window.
    bench.clock.advance(Duration::minutes(2));
    let again = bench.fire();
    assert!(!matches!(again, Attempt::IgnoredPenalty { .. }));
}

#[test]
fn initiative_never_leaves_its_clamp() {
    let mut bench = Bench::new();
    for _ in 0..40 {
        bench.clock.advance(Duration::hours(7));
        bench.fire();
    }
    assert!(bench.state.initiative >= 0.05);

    let mut bench = Bench::new();
    for _ in 0..40 {
        bench.clock.advance(Duration::hours(2));
        bench.fire();
        let now = bench.clock.now();
        bench.scheduler.on_user_sent(
            "hi",
            now,
            &mut bench.activity,
            &mut bench.state,
            &mut bench.timers,
            &mut Fixed(0.0),
        );
    }
    assert!(bench.state.initiative <= 0.95);
}

// ── Engine ─────────────────────────────────────────────────

#[derive(Default)]
struct MockSignals {
    idle_ms: u64,
    app: Option<String>,
    failing: bool,
    unsupported: bool,
}

#[derive(Clone, Default)]
struct MockSampler {
    signals: Arc<Mutex<MockSignals>>,
}

impl MockSampler {
    fn set(&self, f: impl FnOnce(&mut MockSignals)) {
        f(&mut self.signals.lock().unwrap());
    }
}

#[async_trait]
impl SignalSampler for MockSampler {
    async fn sample_idle_duration(&self) -> Result<u64> {
        let s = self.signals.lock().unwrap();
        if s.unsupported {
            return Err(BehaviorError::Unsupported("idle duration"));
        }
        if s.failing {
            return Err(BehaviorError::sampler("mock failure"));
        }
        Ok(s.idle_ms)
    }

    async fn sample_foreground_app(&self) -> Result<Option<String>> {
        let s = self.signals.lock().unwrap();
        if s.failing {
            return Err(BehaviorError::sampler("mock failure"));
        }
        Ok(s.app.clone())
    }
}

fn test_config() -> BehaviorConfig {
    let mut config = BehaviorConfig::default();
    // Tests drive passes explicitly through `refresh`.
    config.mode.tick_interval_ms = 60_000;
    config
}

fn start(clock: &ManualClock, sampler: &MockSampler, store: &MemoryStore) -> BehaviorEngine {
    BehaviorEngine::builder(test_config())
        .sampler(sampler.clone())
        .store(store.clone())
        .clock(clock.clone())
        .rng(Fixed(0.0))
        .start()
}

/// Refresh until `pred` holds. Sampler results land asynchronously.
async fn wait_for(engine: &BehaviorEngine, pred: impl Fn(&ModeState) -> bool) -> ModeState {
    for _ in 0..200 {
        let state = engine.refresh().await;
        if pred(&state) {
            return state;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition never held, last state {:?}", engine.mode_state());
}

/// Put the engine ten minutes past the last activity with the desktop idle
/// for four minutes: past the proactive threshold, short of "system inactive".
/// The idle timer runs once against an active desktop first, so it is
/// rescheduled rather than firing on its own.
async fn idle_for_pull(engine: &BehaviorEngine, clock: &ManualClock, sampler: &MockSampler) {
    clock.advance(Duration::minutes(10));
    engine.refresh().await;
    sampler.set(|s| s.idle_ms = 4 * 60_000);
    wait_for(engine, |s| s.idle_ms == 4 * 60_000).await;
}

#[tokio::test]
async fn work_app_then_focus_lock() {
    let clock = ManualClock::at_epoch();
    let sampler = MockSampler::default();
    sampler.set(|s| s.app = Some("code".into()));
    let engine = start(&clock, &sampler, &MemoryStore::new());

    let state = wait_for(&engine, |s| s.reason == ModeReason::WorkApplication).await;
    assert_eq!(state.effective, EffectiveMode::Focus);

    let state = engine.toggle_focus_lock().await;
    assert!(state.focus_locked);
    assert_eq!(state.reason, ModeReason::FocusLock);
    engine.shutdown().await;
}

#[tokio::test]
async fn mode_updates_fire_only_on_change() {
    let clock = ManualClock::at_epoch();
    let engine = start(&clock, &MockSampler::default(), &MemoryStore::new());
    let mut updates = engine.subscribe_mode_updates();

    for _ in 0..5 {
        engine.refresh().await;
    }
    assert!(matches!(
        updates.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));

    engine.set_primary(PrimarySetting::Quiet).await;
    let update = updates.try_recv().expect("change is published");
    assert_eq!(update.effective, EffectiveMode::Quiet);
    assert_eq!(update.reason, ModeReason::PrimarySetting);

    // Setting the same value again is not a change.
    engine.set_primary(PrimarySetting::Quiet).await;
    assert!(updates.try_recv().is_err());
    engine.shutdown().await;
}

#[tokio::test]
async fn unknown_primary_name_leaves_state_unchanged() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new();
    let engine = start(&clock, &MockSampler::default(), &store);

    let before = engine.mode_state();
    let after = engine.set_primary_named("party").await;
    assert_eq!(after, before);

    let after = engine.set_primary_named("Focus").await;
    assert_eq!(after.primary, PrimarySetting::Focus);
    engine.shutdown().await;
    assert_eq!(store.primary(), Some(PrimarySetting::Focus));
}

#[tokio::test]
async fn screen_lock_overrides_until_unlocked() {
    let clock = ManualClock::at_epoch();
    let engine = start(&clock, &MockSampler::default(), &MemoryStore::new());

    engine.report_screen_locked(true);
    let state = engine.refresh().await;
    assert_eq!(state.effective, EffectiveMode::Quiet);
    assert_eq!(state.reason, ModeReason::ScreenLocked);

    let state = engine.set_primary(PrimarySetting::Focus).await;
    assert_eq!(state.effective, EffectiveMode::Focus);
    assert_eq!(state.reason, ModeReason::PrimarySetting);

    engine.set_primary(PrimarySetting::HangOut).await;
    engine.report_screen_locked(false);
    let state = engine.refresh().await;
    assert!(!state.screen_locked);
    assert_eq!(state.effective, EffectiveMode::HangOut);
    engine.shutdown().await;
}

#[tokio::test]
async fn pull_trigger_waits_for_system_idle() {
    let clock = ManualClock::at_epoch();
    let sampler = MockSampler::default();
    let engine = start(&clock, &sampler, &MemoryStore::new());

    clock.advance(Duration::minutes(10));
    engine.refresh().await;
    assert!(engine
        .maybe_initiate_proactivity(ProactiveTrigger::WindowFocus)
        .await
        .is_none());
    assert!(!engine.initiative_state().pending_acknowledgment);

    sampler.set(|s| s.idle_ms = 4 * 60_000);
    wait_for(&engine, |s| s.idle_ms == 4 * 60_000).await;
    assert!(engine
        .maybe_initiate_proactivity(ProactiveTrigger::WindowFocus)
        .await
        .is_some());
    engine.shutdown().await;
}

#[tokio::test]
async fn pull_trigger_emits_once_and_broadcasts() {
    let clock = ManualClock::at_epoch();
    let sampler = MockSampler::default();
    let engine = start(&clock, &sampler, &MemoryStore::new());
    let mut messages = engine.subscribe_proactive();

    idle_for_pull(&engine, &clock, &sampler).await;
    let message = engine
        .maybe_initiate_proactivity(ProactiveTrigger::WindowFocus)
        .await
        .expect("eligible and the roll cannot fail");
    assert_eq!(message.trigger, ProactiveTrigger::WindowFocus);
    assert_eq!(messages.try_recv().unwrap().id, message.id);

    clock.advance(Duration::minutes(5));
    assert!(engine
        .maybe_initiate_proactivity(ProactiveTrigger::SessionStart)
        .await
        .is_none());
    assert!(engine.initiative_state().cooldown_remaining_secs > 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn idle_timer_emits_through_subscribers() {
    let clock = ManualClock::at_epoch();
    let sampler = MockSampler::default();
    // Idle past the fire threshold but short of "system inactive".
    sampler.set(|s| s.idle_ms = 4 * 60_000);
    let engine = start(&clock, &sampler, &MemoryStore::new());
    let mut messages = engine.subscribe_proactive();
    wait_for(&engine, |s| s.idle_ms == 4 * 60_000).await;

    clock.advance(Duration::minutes(4));
    engine.refresh().await;
    let message = messages.try_recv().expect("idle timer emitted");
    assert_eq!(message.trigger, ProactiveTrigger::IdleTimer);
    assert!(engine.initiative_state().pending_acknowledgment);
    engine.shutdown().await;
}

#[tokio::test]
async fn hidden_window_and_quiet_mode_stay_silent() {
    let clock = ManualClock::at_epoch();
    let sampler = MockSampler::default();
    let engine = start(&clock, &sampler, &MemoryStore::new());
    idle_for_pull(&engine, &clock, &sampler).await;

    engine.set_visible(false);
    assert!(engine
        .maybe_initiate_proactivity(ProactiveTrigger::SessionStart)
        .await
        .is_none());

    engine.set_visible(true);
    engine.set_primary(PrimarySetting::Quiet).await;
    assert!(engine
        .maybe_initiate_proactivity(ProactiveTrigger::SessionStart)
        .await
        .is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn reply_is_acknowledged_and_flushed_on_shutdown() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new();
    let sampler = MockSampler::default();
    let engine = start(&clock, &sampler, &store);

    idle_for_pull(&engine, &clock, &sampler).await;
    assert!(engine
        .maybe_initiate_proactivity(ProactiveTrigger::SessionStart)
        .await
        .is_some());
    engine.report_user_sent("aww thanks, I'm so happy today");
    let state = engine.refresh().await;
    assert_eq!(state.effective, EffectiveMode::Focus);
    assert_eq!(state.reason, ModeReason::RecentActivity);

    engine.shutdown().await;
    let saved = store.relationship().expect("flushed on shutdown");
    assert!(!saved.pending_acknowledgment);
    assert!(saved.initiative > 0.5);
    assert_eq!(saved.total_user_messages, 1);
}

#[tokio::test]
async fn writes_are_debounced() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new();
    let engine = start(&clock, &MockSampler::default(), &store);

    for text in ["one", "two", "three"] {
        engine.report_user_sent(text);
    }
    engine.refresh().await;
    assert_eq!(store.relationship_writes(), 0);

    clock.advance(Duration::seconds(3));
    engine.refresh().await;
    for _ in 0..200 {
        if store.relationship_writes() > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(store.relationship_writes(), 1);
    assert_eq!(store.relationship().map(|s| s.total_user_messages), Some(3));
    engine.shutdown().await;
}

#[tokio::test]
async fn write_failures_do_not_disturb_the_session() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    let engine = start(&clock, &MockSampler::default(), &store);

    let state = engine.set_primary(PrimarySetting::Quiet).await;
    assert_eq!(state.effective, EffectiveMode::Quiet);
    engine.report_user_sent("hello");
    engine.refresh().await;
    assert_eq!(engine.initiative_state().total_user_messages, 1);
    engine.shutdown().await;
    assert!(store.relationship().is_none());
}

#[tokio::test]
async fn failed_write_is_retried_once_the_store_recovers() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    let engine = start(&clock, &MockSampler::default(), &store);

    engine.report_user_sent("hello");
    engine.refresh().await;
    for _ in 0..200 {
        if store.refused_writes() > 0 {
            break;
        }
        clock.advance(Duration::seconds(3));
        engine.refresh().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(store.refused_writes() > 0);
    assert!(store.relationship().is_none());

    // No new changes: the retry alone must land the state.
    store.set_fail_writes(false);
    for _ in 0..200 {
        if store.relationship_writes() > 0 {
            break;
        }
        clock.advance(Duration::seconds(3));
        engine.refresh().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(store.relationship().map(|s| s.total_user_messages), Some(1));
    engine.shutdown().await;
}

#[tokio::test]
async fn failed_write_is_flushed_on_shutdown() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    let engine = start(&clock, &MockSampler::default(), &store);

    engine.report_user_sent("hello");
    engine.refresh().await;
    clock.advance(Duration::seconds(3));
    engine.refresh().await;
    for _ in 0..200 {
        if store.refused_writes() > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(store.refused_writes() > 0);

    store.set_fail_writes(false);
    engine.shutdown().await;
    assert_eq!(store.relationship().map(|s| s.total_user_messages), Some(1));
}

#[tokio::test]
async fn message_burst_reads_facts_once() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new().with_facts(vec!["you play the cello".into()]);
    let engine = start(&clock, &MockSampler::default(), &store);
    assert_eq!(store.fact_reads(), 1);

    for i in 0..50 {
        engine.report_user_sent(format!("message {}", i));
    }
    engine.refresh().await;
    assert_eq!(engine.initiative_state().total_user_messages, 50);
    for _ in 0..200 {
        if store.fact_reads() > 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    engine.refresh().await;
    assert_eq!(store.fact_reads(), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn rapid_primary_changes_store_the_last_one() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new();
    let engine = start(&clock, &MockSampler::default(), &store);

    for primary in [
        PrimarySetting::Focus,
        PrimarySetting::Quiet,
        PrimarySetting::HangOut,
        PrimarySetting::Quiet,
        PrimarySetting::Focus,
    ]
    .into_iter()
    .cycle()
    .take(25)
    {
        engine.set_primary(primary).await;
    }
    engine.shutdown().await;
    assert_eq!(store.primary(), Some(PrimarySetting::Focus));
}

#[tokio::test]
async fn stored_primary_is_restored_at_start() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new().with_primary(PrimarySetting::Quiet);
    let engine = start(&clock, &MockSampler::default(), &store);

    let state = engine.mode_state();
    assert_eq!(state.primary, PrimarySetting::Quiet);
    assert_eq!(state.effective, EffectiveMode::Quiet);
    engine.shutdown().await;
}

#[tokio::test]
async fn stored_facts_come_back_as_memory_echoes() {
    let clock = ManualClock::at_epoch();
    // Enough history for the Friendly tier, no affect cue on record.
    let mut history = RelationshipState::default();
    history.total_user_messages = 60;
    let store = MemoryStore::new()
        .with_facts(vec!["you adopted a cat named Mochi".into()])
        .with_relationship(history);
    let sampler = MockSampler::default();
    let engine = start(&clock, &sampler, &store);

    idle_for_pull(&engine, &clock, &sampler).await;
    let message = engine
        .maybe_initiate_proactivity(ProactiveTrigger::SessionStart)
        .await
        .expect("eligible and the roll cannot fail");
    assert_eq!(message.category, ProactiveCategory::MemoryEcho);
    assert!(message.text.contains("a cat named Mochi"));

    engine.shutdown().await;
    let saved = store.relationship().expect("flushed on shutdown");
    assert_eq!(saved.messages_since_memory_echo, Some(0));
}

#[tokio::test]
async fn sampler_failure_keeps_last_idle_value() {
    let clock = ManualClock::at_epoch();
    let sampler = MockSampler::default();
    sampler.set(|s| s.idle_ms = 90_000);
    let engine = start(&clock, &sampler, &MemoryStore::new());
    wait_for(&engine, |s| s.idle_ms == 90_000).await;

    sampler.set(|s| s.failing = true);
    for _ in 0..5 {
        let state = engine.refresh().await;
        assert_eq!(state.idle_ms, 90_000);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn unsupported_idle_falls_back_to_activity() {
    let clock = ManualClock::at_epoch();
    let sampler = MockSampler::default();
    sampler.set(|s| s.unsupported = true);
    let engine = start(&clock, &sampler, &MemoryStore::new());
    engine.refresh().await;

    clock.advance(Duration::minutes(6));
    let state = wait_for(&engine, |s| s.reason == ModeReason::SystemInactive).await;
    assert_eq!(state.effective, EffectiveMode::Quiet);
    assert!(state.is_idle);

    engine.report_activity();
    let state = engine.refresh().await;
    assert_eq!(state.effective, EffectiveMode::HangOut);
    engine.shutdown().await;
}

#[tokio::test]
async fn corrupt_state_on_disk_starts_fresh() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("relationship_state.json"), "{{{").unwrap();
    std::fs::write(dir.path().join("primary_setting.json"), "\"loud\"").unwrap();

    let engine = BehaviorEngine::builder(test_config())
        .sampler(NullSampler)
        .store(JsonFileStore::new(dir.path()))
        .clock(ManualClock::at_epoch())
        .start();
    assert_eq!(engine.initiative_state().initiative, 0.5);
    assert_eq!(engine.mode_state().primary, PrimarySetting::HangOut);

    engine.report_user_sent("hi");
    engine.shutdown().await;
    let reloaded = JsonFileStore::new(dir.path());
    let state = crate::storage::BehaviorStore::load_relationship(&reloaded)
        .unwrap()
        .unwrap();
    assert_eq!(state.total_user_messages, 1);
}

#[tokio::test]
async fn reset_relationship_starts_over() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new();
    let engine = start(&clock, &MockSampler::default(), &store);
    engine.report_user_sent("one");
    engine.report_user_sent("two");
    engine.refresh().await;
    assert_eq!(engine.initiative_state().total_user_messages, 2);

    let snapshot = engine.reset_relationship().await;
    assert_eq!(snapshot.total_user_messages, 0);
    assert_eq!(snapshot.initiative, 0.5);
    engine.shutdown().await;
    assert_eq!(store.relationship().map(|s| s.total_user_messages), Some(0));
}

#[tokio::test]
async fn stopped_engine_answers_from_last_snapshot() {
    let clock = ManualClock::at_epoch();
    let engine = start(&clock, &MockSampler::default(), &MemoryStore::new());
    let last = engine.set_primary(PrimarySetting::Focus).await;
    engine.shutdown().await;
    tokio::task::yield_now().await;

    assert!(matches!(
        engine.try_set_primary(PrimarySetting::Quiet).await,
        Err(BehaviorError::EngineStopped)
    ));
    assert_eq!(engine.set_primary(PrimarySetting::Quiet).await, last);
    engine.report_activity();
    engine.shutdown().await;
}

#[test]
fn null_sampler_reports_an_active_desktop() {
    assert_eq!(tokio_test::block_on(NullSampler.sample_idle_duration()).unwrap(), 0);
    assert_eq!(tokio_test::block_on(NullSampler.sample_foreground_app()).unwrap(), None);
}
