//! Public handle to the behavior engine.
//!
//! [`BehaviorEngine`] is cheap to clone and safe to use from any task. Reads
//! return the last published snapshot without waiting on the event loop;
//! notifications are fire-and-forget and are applied in order before the
//! next arbitration pass.

use crate::ai::heartbeat::{self, Command, CoreParts, EngineCore, Publishers};
use crate::ai::initiative::{ProactiveMessage, ProactiveTrigger};
use crate::ai::mode::{ModeState, PrimarySetting};
use crate::ai::scheduler::InitiativeSnapshot;
use crate::config::BehaviorConfig;
use crate::error::{BehaviorError, Result};
use crate::signals::{SignalSampler, SystemSampler};
use crate::storage::{BehaviorStore, JsonFileStore};
use crate::utils::{Clock, RandomSource, StdRandom, SystemClock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const BROADCAST_CAPACITY: usize = 64;

pub struct EngineBuilder {
    config: BehaviorConfig,
    sampler: Option<Arc<dyn SignalSampler>>,
    store: Option<Arc<dyn BehaviorStore>>,
    clock: Option<Arc<dyn Clock>>,
    rng: Option<Box<dyn RandomSource>>,
}

impl EngineBuilder {
    pub fn new(config: BehaviorConfig) -> Self {
        Self {
            config,
            sampler: None,
            store: None,
            clock: None,
            rng: None,
        }
    }

    pub fn sampler(mut self, sampler: impl SignalSampler + 'static) -> Self {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    pub fn store(mut self, store: impl BehaviorStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn rng(mut self, rng: impl RandomSource + 'static) -> Self {
        self.rng = Some(Box::new(rng));
        self
    }

    /// Load persisted state and spawn the event loop. Must be called from
    /// inside a Tokio runtime.
    pub fn start(self) -> BehaviorEngine {
        let mut config = self.config;
        config.validate();

        let parts = CoreParts {
            config,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            rng: self
                .rng
                .unwrap_or_else(|| Box::new(StdRandom::from_entropy())),
            sampler: self
                .sampler
                .unwrap_or_else(|| Arc::new(SystemSampler::new())),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(JsonFileStore::open_default())),
        };

        let (mode_tx, mode_rx) = watch::channel(ModeState::initial(PrimarySetting::default(), false));
        let initial_initiative = crate::ai::scheduler::ProactivityScheduler::new(
            parts.config.proactive.clone(),
        )
        .snapshot(&Default::default(), parts.clock.now());
        let (initiative_tx, initiative_rx) = watch::channel(initial_initiative);
        let (mode_updates, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (proactive, _) = broadcast::channel(BROADCAST_CAPACITY);

        let publishers = Publishers {
            mode: mode_tx,
            initiative: initiative_tx,
            mode_updates: mode_updates.clone(),
            proactive: proactive.clone(),
        };
        let (core, internal_rx) = EngineCore::new(parts, publishers);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(heartbeat::run(core, commands_rx, internal_rx));

        BehaviorEngine {
            commands,
            mode: mode_rx,
            initiative: initiative_rx,
            mode_updates,
            proactive,
        }
    }
}

#[derive(Clone)]
pub struct BehaviorEngine {
    commands: mpsc::UnboundedSender<Command>,
    mode: watch::Receiver<ModeState>,
    initiative: watch::Receiver<InitiativeSnapshot>,
    mode_updates: broadcast::Sender<ModeState>,
    proactive: broadcast::Sender<ProactiveMessage>,
}

impl BehaviorEngine {
    pub fn builder(config: BehaviorConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Start with the platform sampler and the JSON store in the default
    /// data directory.
    pub fn start(config: BehaviorConfig) -> Self {
        EngineBuilder::new(config).start()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    // ── Reads ──────────────────────────────────────────────

    pub fn mode_state(&self) -> ModeState {
        self.mode.borrow().clone()
    }

    pub fn initiative_state(&self) -> InitiativeSnapshot {
        self.initiative.borrow().clone()
    }

    // ── Requests ───────────────────────────────────────────

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| BehaviorError::EngineStopped)?;
        rx.await.map_err(|_| BehaviorError::EngineStopped)
    }

    pub async fn try_set_primary(&self, primary: PrimarySetting) -> Result<ModeState> {
        self.request(|tx| Command::SetPrimary(primary, tx)).await
    }

    /// Returns the updated state, or the last known one if the engine is gone.
    pub async fn set_primary(&self, primary: PrimarySetting) -> ModeState {
        self.try_set_primary(primary)
            .await
            .unwrap_or_else(|_| self.mode_state())
    }

    /// Parse a setting name from an untyped caller. Unknown names are
    /// rejected and the current state is returned unchanged.
    pub async fn set_primary_named(&self, name: &str) -> ModeState {
        match name.parse::<PrimarySetting>() {
            Ok(primary) => self.set_primary(primary).await,
            Err(e) => {
                tracing::warn!("[Arbiter] Ignoring set_primary: {}", e);
                self.mode_state()
            }
        }
    }

    pub async fn try_toggle_focus_lock(&self) -> Result<ModeState> {
        self.request(Command::ToggleFocusLock).await
    }

    pub async fn toggle_focus_lock(&self) -> ModeState {
        self.try_toggle_focus_lock()
            .await
            .unwrap_or_else(|_| self.mode_state())
    }

    /// Pull-style attempt for session-boundary triggers. Shares every
    /// cooldown with the timer path; an emitted message is also delivered to
    /// proactive subscribers.
    pub async fn maybe_initiate_proactivity(
        &self,
        trigger: ProactiveTrigger,
    ) -> Option<ProactiveMessage> {
        self.request(|tx| Command::MaybeInitiate(trigger, tx))
            .await
            .ok()
            .flatten()
    }

    pub async fn reset_relationship(&self) -> InitiativeSnapshot {
        self.request(Command::ResetRelationship)
            .await
            .unwrap_or_else(|_| self.initiative_state())
    }

    /// Run one arbitration pass now instead of waiting for the next tick.
    pub async fn refresh(&self) -> ModeState {
        self.request(Command::Refresh)
            .await
            .unwrap_or_else(|_| self.mode_state())
    }

    /// Stop the loop after flushing persisted state. Idempotent.
    pub async fn shutdown(&self) {
        if self.request(Command::Shutdown).await.is_err() {
            tracing::debug!("[Arbiter] Shutdown requested on a stopped engine");
        }
    }

    // ── Notifications ──────────────────────────────────────

    fn notify(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("[Arbiter] Notification dropped, engine stopped");
        }
    }

    /// The user sent a chat message.
    pub fn report_user_sent(&self, text: impl Into<String>) {
        self.notify(Command::UserSent(text.into()));
    }

    pub fn report_activity(&self) {
        self.notify(Command::Activity);
    }

    pub fn report_typing(&self) {
        self.notify(Command::Typing);
    }

    pub fn report_screen_locked(&self, locked: bool) {
        self.notify(Command::ScreenLocked(locked));
    }

    pub fn set_visible(&self, visible: bool) {
        self.notify(Command::Visibility(visible));
    }

    // ── Subscriptions ──────────────────────────────────────

    /// Receives a state only when the effective mode or its reason changes.
    pub fn subscribe_mode_updates(&self) -> broadcast::Receiver<ModeState> {
        self.mode_updates.subscribe()
    }

    pub fn subscribe_proactive(&self) -> broadcast::Receiver<ProactiveMessage> {
        self.proactive.subscribe()
    }

    pub fn on_mode_update<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(ModeState) + Send + 'static,
    {
        forward(self.subscribe_mode_updates(), callback, "mode update")
    }

    pub fn on_proactive_message<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(ProactiveMessage) + Send + 'static,
    {
        forward(self.subscribe_proactive(), callback, "proactive message")
    }
}

/// Drive a callback from a broadcast receiver until the engine goes away.
fn forward<T, F>(mut rx: broadcast::Receiver<T>, callback: F, label: &'static str) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: Fn(T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(value) => callback(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("[Arbiter] {} subscriber lagged, skipped {}", label, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
