//! Heartbeat: the single-owner event loop behind the behavior engine.
//!
//! Every piece of mutable engine state lives in [`EngineCore`] and is only
//! touched from [`run`]. Callers talk to it through [`Command`]s; slow OS
//! lookups and disk writes run on spawned tasks and report back through an
//! internal channel, so nothing here ever blocks the arbitration cadence.
//! Reads are served from `watch` snapshots refreshed after every step.

use crate::ai::activity::ActivityRecord;
use crate::ai::initiative::{ProactiveMessage, ProactiveTrigger};
use crate::ai::mode::{
    resolve_locked, resolve_mode, ModeResolution, ModeState, PrimarySetting, SignalSnapshot,
};
use crate::ai::relationship::RelationshipState;
use crate::ai::scheduler::{Attempt, FireContext, InitiativeSnapshot, ProactivityScheduler};
use crate::ai::timers::{TimerPurpose, TimerSet};
use crate::config::BehaviorConfig;
use crate::error::{BehaviorError, Result};
use crate::signals::{classify, FailureStreak, ForegroundCache, SignalSampler};
use crate::storage::BehaviorStore;
use crate::utils::{Clock, RandomSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Longest the loop sleeps when no timer is pending.
const MAX_WAKE: std::time::Duration = std::time::Duration::from_secs(60);

pub(crate) enum Command {
    SetPrimary(PrimarySetting, oneshot::Sender<ModeState>),
    ToggleFocusLock(oneshot::Sender<ModeState>),
    UserSent(String),
    Activity,
    Typing,
    ScreenLocked(bool),
    Visibility(bool),
    MaybeInitiate(ProactiveTrigger, oneshot::Sender<Option<ProactiveMessage>>),
    ResetRelationship(oneshot::Sender<InitiativeSnapshot>),
    Refresh(oneshot::Sender<ModeState>),
    Shutdown(oneshot::Sender<()>),
}

/// Results coming back from spawned work.
pub(crate) enum Internal {
    Idle(Result<u64>),
    Foreground(Result<Option<String>>),
    Facts(Result<Vec<String>>),
    Saved(Record, Result<()>),
}

/// Persisted records written by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Record {
    Relationship,
    Primary,
}

/// Outbound channels shared with the public handle.
pub(crate) struct Publishers {
    pub mode: watch::Sender<ModeState>,
    pub initiative: watch::Sender<InitiativeSnapshot>,
    pub mode_updates: broadcast::Sender<ModeState>,
    pub proactive: broadcast::Sender<ProactiveMessage>,
}

/// Collaborators and tunables the core is built from.
pub(crate) struct CoreParts {
    pub config: BehaviorConfig,
    pub clock: Arc<dyn Clock>,
    pub rng: Box<dyn RandomSource>,
    pub sampler: Arc<dyn SignalSampler>,
    pub store: Arc<dyn BehaviorStore>,
}

#[derive(Default)]
struct SamplerHealth {
    in_flight: bool,
    disabled: bool,
    failures: FailureStreak,
}

pub(crate) struct EngineCore {
    config: BehaviorConfig,
    clock: Arc<dyn Clock>,
    rng: Box<dyn RandomSource>,
    sampler: Arc<dyn SignalSampler>,
    store: Arc<dyn BehaviorStore>,

    // ── Mode inputs ──
    primary: PrimarySetting,
    focus_locked: bool,
    screen_locked: bool,
    visible: bool,
    idle_ms: u64,
    foreground: ForegroundCache,
    idle_health: SamplerHealth,
    foreground_health: SamplerHealth,
    current: ModeResolution,

    // ── Proactivity ──
    activity: ActivityRecord,
    relationship: RelationshipState,
    scheduler: ProactivityScheduler,
    timers: TimerSet,
    facts: Vec<String>,
    facts_health: SamplerHealth,

    // ── Persistence ──
    dirty: bool,
    primary_dirty: bool,
    persist_task: Option<JoinHandle<bool>>,
    primary_task: Option<JoinHandle<bool>>,
    write_failures: FailureStreak,

    internal_tx: mpsc::UnboundedSender<Internal>,
    publishers: Publishers,
}

impl EngineCore {
    /// Load persisted state and publish the first snapshot. Read failures
    /// fall back to defaults.
    pub(crate) fn new(
        parts: CoreParts,
        publishers: Publishers,
    ) -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let CoreParts {
            config,
            clock,
            rng,
            sampler,
            store,
        } = parts;
        let now = clock.now();

        let primary = match store.load_primary() {
            Ok(Some(primary)) => primary,
            Ok(None) => PrimarySetting::default(),
            Err(e) => {
                tracing::warn!("[Store] Primary setting unreadable ({}), using default", e);
                PrimarySetting::default()
            }
        };
        let relationship = match store.load_relationship() {
            Ok(Some(state)) => state.sanitized(&config.proactive),
            Ok(None) => RelationshipState::with_initiative(config.proactive.initiative_default),
            Err(e) => {
                tracing::warn!("[Store] Relationship state unreadable ({}), using defaults", e);
                RelationshipState::with_initiative(config.proactive.initiative_default)
            }
        };
        let facts = store.stored_facts().unwrap_or_else(|e| {
            tracing::warn!("[Store] Stored facts unreadable: {}", e);
            Vec::new()
        });

        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let mut core = Self {
            scheduler: ProactivityScheduler::new(config.proactive.clone()),
            config,
            clock,
            rng,
            sampler,
            store,
            primary,
            focus_locked: false,
            screen_locked: false,
            visible: true,
            idle_ms: 0,
            foreground: ForegroundCache::new(),
            idle_health: SamplerHealth::default(),
            foreground_health: SamplerHealth::default(),
            current: ModeState::initial(primary, false).resolution(),
            activity: ActivityRecord::new(now),
            relationship,
            timers: TimerSet::new(),
            facts,
            facts_health: SamplerHealth::default(),
            dirty: false,
            primary_dirty: false,
            persist_task: None,
            primary_task: None,
            write_failures: FailureStreak::default(),
            internal_tx,
            publishers,
        };

        let (lo, hi) = core.config.proactive.idle_fire_band();
        core.timers
            .reset(TimerPurpose::IdleFire, now + core.rng.range_duration(lo, hi));
        core.rearbitrate(now);
        tracing::info!(
            "[Arbiter] Started: primary={}, initiative={:.2}",
            core.primary.as_str(),
            core.relationship.initiative
        );
        (core, internal_rx)
    }

    // ── Snapshots ──────────────────────────────────────────

    /// Idle time used for arbitration. Without a working idle sampler the
    /// time since the last reported activity stands in for it.
    fn idle_estimate(&self, now: DateTime<Utc>) -> u64 {
        if self.idle_health.disabled {
            self.activity.since_activity(now).num_milliseconds().max(0) as u64
        } else {
            self.idle_ms
        }
    }

    fn signals(&self, now: DateTime<Utc>) -> SignalSnapshot {
        let app = self
            .foreground
            .current(now, self.config.signals.foreground_stale());
        SignalSnapshot {
            idle_duration_ms: self.idle_estimate(now),
            foreground_app_category: classify(app, &self.config.signals),
            focus_locked: self.focus_locked,
        }
    }

    fn mode_state(&self, now: DateTime<Utc>) -> ModeState {
        let idle_ms = self.idle_estimate(now);
        ModeState {
            primary: self.primary,
            effective: self.current.mode,
            reason: self.current.reason,
            idle_ms,
            is_idle: idle_ms >= self.config.mode.idle_threshold_ms(),
            focus_locked: self.focus_locked,
            screen_locked: self.screen_locked,
            last_user_send_at: self.activity.last_user_send_at,
        }
    }

    /// Re-resolve the mode and refresh the read snapshots. Subscribers hear
    /// about it only if the mode or its reason changed.
    fn rearbitrate(&mut self, now: DateTime<Utc>) -> ModeState {
        let resolution = if self.screen_locked {
            resolve_locked(self.primary)
        } else {
            resolve_mode(
                self.primary,
                &self.signals(now),
                &self.activity,
                now,
                &self.config.mode,
            )
        };
        let changed = resolution != self.current;
        self.current = resolution;

        let state = self.mode_state(now);
        self.publishers.mode.send_replace(state.clone());
        self.publishers
            .initiative
            .send_replace(self.scheduler.snapshot(&self.relationship, now));

        if changed {
            tracing::info!(
                "[Arbiter] Mode -> {} ({})",
                resolution.mode,
                resolution.reason
            );
            // No subscribers is fine.
            let _ = self.publishers.mode_updates.send(state.clone());
        }
        state
    }

    // ── Commands ───────────────────────────────────────────

    fn handle(&mut self, command: Command) {
        let now = self.clock.now();
        match command {
            Command::SetPrimary(primary, reply) => {
                if primary != self.primary {
                    tracing::info!("[Arbiter] Primary setting -> {}", primary.as_str());
                    self.primary = primary;
                    self.persist_primary(now);
                }
                let _ = reply.send(self.rearbitrate(now));
            }
            Command::ToggleFocusLock(reply) => {
                self.focus_locked = !self.focus_locked;
                tracing::info!("[Arbiter] Focus lock {}", if self.focus_locked { "on" } else { "off" });
                let _ = reply.send(self.rearbitrate(now));
            }
            Command::UserSent(text) => {
                self.scheduler.on_user_sent(
                    &text,
                    now,
                    &mut self.activity,
                    &mut self.relationship,
                    &mut self.timers,
                    self.rng.as_mut(),
                );
                self.mark_dirty(now);
                self.refresh_facts();
                self.rearbitrate(now);
            }
            Command::Activity => {
                self.scheduler.on_activity(
                    now,
                    &mut self.activity,
                    &mut self.timers,
                    self.rng.as_mut(),
                );
                self.rearbitrate(now);
            }
            Command::Typing => {
                self.scheduler
                    .on_typing(now, &mut self.activity, &mut self.timers);
            }
            Command::ScreenLocked(locked) => {
                if locked == self.screen_locked {
                    return;
                }
                self.screen_locked = locked;
                tracing::info!(
                    "[Arbiter] Screen {}",
                    if locked { "locked" } else { "unlocked" }
                );
                if !locked {
                    // Unlocking is user input.
                    self.scheduler.on_activity(
                        now,
                        &mut self.activity,
                        &mut self.timers,
                        self.rng.as_mut(),
                    );
                }
                self.rearbitrate(now);
            }
            Command::Visibility(visible) => {
                self.visible = visible;
                tracing::debug!("[Arbiter] Window visible: {}", visible);
            }
            Command::MaybeInitiate(trigger, reply) => {
                let attempt = self.attempt_pull(trigger, now);
                let _ = reply.send(attempt.into_message());
            }
            Command::ResetRelationship(reply) => {
                tracing::info!("[Scheduler] Relationship state reset");
                self.relationship =
                    RelationshipState::with_initiative(self.config.proactive.initiative_default);
                self.dirty = true;
                self.timers.cancel(TimerPurpose::Persist);
                self.timers.cancel(TimerPurpose::RateLimit);
                let (lo, hi) = self.config.proactive.idle_fire_band();
                self.timers
                    .reset(TimerPurpose::IdleFire, now + self.rng.range_duration(lo, hi));
                self.persist_relationship(now);
                self.rearbitrate(now);
                let _ = reply.send(self.scheduler.snapshot(&self.relationship, now));
            }
            Command::Refresh(reply) => {
                let state = self.tick();
                let _ = reply.send(state);
            }
            // Handled by the loop.
            Command::Shutdown(_) => {}
        }
    }

    // ── Tick & timers ──────────────────────────────────────

    fn tick(&mut self) -> ModeState {
        let now = self.clock.now();
        self.request_samples();
        self.activity.clear_expired_typing(now);
        let state = self.rearbitrate(now);
        self.fire_due_timers(now);
        state
    }

    fn fire_due_timers(&mut self, now: DateTime<Utc>) {
        for purpose in self.timers.take_due(now) {
            match purpose {
                TimerPurpose::IdleFire => {
                    let idle_ms = self.idle_estimate(now);
                    let ctx = FireContext {
                        visible: self.visible,
                        mode: self.current.mode,
                        idle_ms,
                        activity: &self.activity,
                    };
                    let attempt = self.scheduler.on_idle_fire(
                        &ctx,
                        &mut self.relationship,
                        &self.facts,
                        now,
                        &mut self.timers,
                        self.rng.as_mut(),
                    );
                    self.after_attempt(attempt, now);
                }
                TimerPurpose::TypingGrace => {
                    self.scheduler
                        .on_typing_grace_elapsed(now, &mut self.activity);
                }
                TimerPurpose::RateLimit => {
                    self.scheduler
                        .on_rate_limit_elapsed(now, &mut self.timers, self.rng.as_mut());
                }
                TimerPurpose::Persist => {
                    self.persist_relationship(now);
                    if self.primary_dirty {
                        self.persist_primary(now);
                    }
                }
            }
        }
    }

    fn attempt_pull(&mut self, trigger: ProactiveTrigger, now: DateTime<Utc>) -> Attempt {
        let idle_ms = self.idle_estimate(now);
        let ctx = FireContext {
            visible: self.visible,
            mode: self.current.mode,
            idle_ms,
            activity: &self.activity,
        };
        let attempt = self.scheduler.initiate(
            trigger,
            &ctx,
            &mut self.relationship,
            &self.facts,
            now,
            &mut self.timers,
            self.rng.as_mut(),
        );
        self.after_attempt(attempt.clone(), now);
        attempt
    }

    fn after_attempt(&mut self, attempt: Attempt, now: DateTime<Utc>) {
        match attempt {
            Attempt::Emitted(message) => {
                self.mark_dirty(now);
                let _ = self.publishers.proactive.send(message);
            }
            Attempt::IgnoredPenalty { .. } => self.mark_dirty(now),
            Attempt::Suppressed(_) | Attempt::RollFailed { .. } => {}
        }
        self.publishers
            .initiative
            .send_replace(self.scheduler.snapshot(&self.relationship, now));
    }

    /// Time until the earliest pending deadline.
    fn next_wake(&self) -> std::time::Duration {
        match self.timers.next_deadline() {
            Some((_, at)) => (at - self.clock.now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO)
                .min(MAX_WAKE),
            None => MAX_WAKE,
        }
    }

    // ── Sampling ───────────────────────────────────────────

    /// Start any sampler lookup that is not already running. Results arrive
    /// on the internal channel and are used from the next step on.
    fn request_samples(&mut self) {
        let timeout = self.config.signals.sampler_timeout();

        if !self.idle_health.disabled && !self.idle_health.in_flight {
            self.idle_health.in_flight = true;
            let sampler = Arc::clone(&self.sampler);
            let tx = self.internal_tx.clone();
            tokio::spawn(async move {
                let result = tokio::time::timeout(timeout, sampler.sample_idle_duration())
                    .await
                    .unwrap_or_else(|_| Err(BehaviorError::sampler("idle lookup timed out")));
                let _ = tx.send(Internal::Idle(result));
            });
        }

        if !self.foreground_health.disabled && !self.foreground_health.in_flight {
            self.foreground_health.in_flight = true;
            let sampler = Arc::clone(&self.sampler);
            let tx = self.internal_tx.clone();
            tokio::spawn(async move {
                let result = tokio::time::timeout(timeout, sampler.sample_foreground_app())
                    .await
                    .unwrap_or_else(|_| Err(BehaviorError::sampler("foreground lookup timed out")));
                let _ = tx.send(Internal::Foreground(result));
            });
        }
    }

    fn refresh_facts(&mut self) {
        if self.facts_health.in_flight {
            return;
        }
        self.facts_health.in_flight = true;
        let store = Arc::clone(&self.store);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || store.stored_facts())
                .await
                .unwrap_or_else(|e| Err(BehaviorError::sampler(format!("fact load panicked: {}", e))));
            let _ = tx.send(Internal::Facts(result));
        });
    }

    fn on_internal(&mut self, message: Internal) {
        let now = self.clock.now();
        match message {
            Internal::Idle(result) => {
                self.idle_health.in_flight = false;
                match result {
                    Ok(ms) => {
                        if let Some(n) = self.idle_health.failures.recover() {
                            tracing::info!("[Signals] Idle sampler recovered after {} failures", n);
                        }
                        self.idle_ms = ms;
                    }
                    Err(e) => record_failure(&mut self.idle_health, "Idle", &e),
                }
            }
            Internal::Foreground(result) => {
                self.foreground_health.in_flight = false;
                match result {
                    Ok(name) => {
                        if let Some(n) = self.foreground_health.failures.recover() {
                            tracing::info!(
                                "[Signals] Foreground sampler recovered after {} failures",
                                n
                            );
                        }
                        self.foreground.update(name, now);
                    }
                    Err(e) => record_failure(&mut self.foreground_health, "Foreground", &e),
                }
            }
            Internal::Facts(result) => {
                self.facts_health.in_flight = false;
                match result {
                    Ok(facts) => {
                        self.facts_health.failures.recover();
                        self.facts = facts;
                    }
                    Err(e) => {
                        if self.facts_health.failures.fail() {
                            tracing::warn!("[Store] Stored facts unreadable: {}", e);
                        }
                    }
                }
            }
            Internal::Saved(record, result) => self.on_saved(record, result, now),
        }
        self.rearbitrate(now);
    }

    // ── Persistence ────────────────────────────────────────

    fn mark_dirty(&mut self, now: DateTime<Utc>) {
        self.dirty = true;
        self.timers
            .arm_if_idle(TimerPurpose::Persist, now + self.config.persist_debounce());
    }

    fn persist_relationship(&mut self, now: DateTime<Utc>) {
        if !self.dirty {
            return;
        }
        // One write at a time so an older snapshot never lands last.
        if self.persist_task.as_ref().is_some_and(|t| !t.is_finished()) {
            self.timers
                .reset(TimerPurpose::Persist, now + self.config.persist_debounce());
            return;
        }
        self.dirty = false;
        let state = self.relationship.clone();
        let store = Arc::clone(&self.store);
        self.persist_task = Some(self.spawn_write(Record::Relationship, move || {
            store.persist_relationship(&state)
        }));
    }

    /// Write the current primary setting. A change made while a write is
    /// running is picked up by the next `Persist` timer.
    fn persist_primary(&mut self, now: DateTime<Utc>) {
        self.primary_dirty = true;
        if self.primary_task.as_ref().is_some_and(|t| !t.is_finished()) {
            self.timers
                .arm_if_idle(TimerPurpose::Persist, now + self.config.persist_debounce());
            return;
        }
        self.primary_dirty = false;
        let primary = self.primary;
        let store = Arc::clone(&self.store);
        self.primary_task = Some(self.spawn_write(Record::Primary, move || {
            store.persist_primary(primary)
        }));
    }

    /// Run a store write on the blocking pool. The outcome comes back as
    /// [`Internal::Saved`]; the handle resolves to whether it succeeded.
    fn spawn_write(
        &self,
        record: Record,
        write: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> JoinHandle<bool> {
        let tx = self.internal_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = write();
            let ok = result.is_ok();
            let _ = tx.send(Internal::Saved(record, result));
            ok
        })
    }

    fn on_saved(&mut self, record: Record, result: Result<()>, now: DateTime<Utc>) {
        match result {
            Ok(()) => {
                if let Some(n) = self.write_failures.recover() {
                    tracing::info!("[Store] Writes recovered after {} failures", n);
                }
            }
            Err(e) => {
                if self.write_failures.fail() {
                    tracing::warn!("[Store] Failed to persist {:?}: {} (will retry)", record, e);
                }
                match record {
                    Record::Relationship => self.dirty = true,
                    Record::Primary => self.primary_dirty = true,
                }
                self.timers
                    .arm_if_idle(TimerPurpose::Persist, now + self.config.persist_debounce());
            }
        }
    }

    /// Wait for any running write, then write whatever is still dirty.
    async fn flush(&mut self) {
        if let Some(task) = self.primary_task.take() {
            if !task.await.unwrap_or(false) {
                self.primary_dirty = true;
            }
        }
        if let Some(task) = self.persist_task.take() {
            if !task.await.unwrap_or(false) {
                self.dirty = true;
            }
        }
        if self.primary_dirty {
            self.primary_dirty = false;
            let primary = self.primary;
            let store = Arc::clone(&self.store);
            match tokio::task::spawn_blocking(move || store.persist_primary(primary)).await {
                Ok(Ok(())) => tracing::debug!("[Store] Flushed primary setting"),
                Ok(Err(e)) => tracing::warn!("[Store] Final primary flush failed: {}", e),
                Err(e) => tracing::warn!("[Store] Final primary flush task failed: {}", e),
            }
        }
        if self.dirty {
            self.dirty = false;
            let state = self.relationship.clone();
            let store = Arc::clone(&self.store);
            match tokio::task::spawn_blocking(move || store.persist_relationship(&state)).await {
                Ok(Ok(())) => tracing::debug!("[Store] Flushed relationship state"),
                Ok(Err(e)) => tracing::warn!("[Store] Final flush failed: {}", e),
                Err(e) => tracing::warn!("[Store] Final flush task failed: {}", e),
            }
        }
    }
}

fn record_failure(health: &mut SamplerHealth, label: &str, error: &BehaviorError) {
    if let BehaviorError::Unsupported(what) = error {
        health.disabled = true;
        tracing::warn!("[Signals] {} sampling unavailable ({}), disabled", label, what);
        return;
    }
    if health.failures.fail() {
        tracing::warn!(
            "[Signals] {} sampler failed: {} (keeping last known value)",
            label,
            error
        );
    }
}

/// Main loop. Spawned once by the engine; returns after shutdown or when
/// every handle has been dropped, flushing state on the way out.
pub(crate) async fn run(
    mut core: EngineCore,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut internal: mpsc::UnboundedReceiver<Internal>,
) {
    let mut ticker = tokio::time::interval(core.config.mode.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let wake = core.next_wake();
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Shutdown(done)) => {
                    core.flush().await;
                    tracing::info!("[Arbiter] Stopped");
                    let _ = done.send(());
                    return;
                }
                Some(command) => core.handle(command),
                None => {
                    core.flush().await;
                    tracing::info!("[Arbiter] All handles dropped, stopped");
                    return;
                }
            },
            Some(message) = internal.recv() => core.on_internal(message),
            _ = ticker.tick() => {
                core.tick();
            }
            _ = tokio::time::sleep(wake) => {
                let now = core.clock.now();
                core.rearbitrate(now);
                core.fire_due_timers(now);
            }
        }
    }
}
