//! Command player
//!
//! Walks a [`CommandSequence`] against the target window: resolves each
//! step's element, synthesizes the input, optionally verifies that the UI
//! reacted, then waits before the next step. Loop markers are interpreted in
//! place. Pause and stop take effect at step boundaries; a step that has
//! started delivering input always finishes.

mod events;
mod preflight;

pub use events::{PlaybackOutcome, PlaybackState, PlayerEvent};
pub use preflight::{preflight, PreflightReport, StructuralIssue};

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::element::{InputAction, TargetWindow, UIElement, WindowHandle};
use crate::errors::{MacroError, Result};
use crate::model::{Command, CommandSequence, CommandType};
use crate::platforms::AutomationEngine;
use crate::resolver::{ElementResolver, ResolveMode};
use crate::session::{SessionGate, SessionRole};
use crate::settings::{ExecutionSettings, OnStepFailure, SettingsStore};

/// Repeat count meaning "until stopped". A repeat count of 0 means the same.
pub const REPEAT_UNTIL_STOPPED: u32 = u32::MAX;

const STATE_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
}

/// Per-run switches that are not part of the persisted settings
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    /// Trust recorded coordinates and skip the element search. Also turns
    /// highlighting off for the run.
    pub direct_mode: bool,
    /// Play even when pre-flight reports unclosed loops.
    pub allow_structural_warnings: bool,
}

/// Awaitable completion of a run started with [`CommandPlayer::play_sequence_async`]
#[derive(Debug)]
pub struct PlaybackHandle {
    outcome: oneshot::Receiver<PlaybackOutcome>,
}

impl PlaybackHandle {
    pub async fn wait(self) -> Result<PlaybackOutcome> {
        self.outcome
            .await
            .map_err(|_| MacroError::InvalidOperation("playback task ended without an outcome".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Stop,
}

struct RunPlan {
    name: String,
    commands: Vec<Command>,
    repeat: u32,
    invocations_per_run: usize,
    options: PlayOptions,
    target: TargetWindow,
}

struct LoopFrame {
    start: usize,
    remaining: u32,
}

enum StepResult {
    Done { changed: bool, resolve_latency: Duration },
    /// The element could not be found; recoverable per `OnStepFailure`.
    Failed(String),
    /// The platform refused to act; ends the run.
    Fatal(String),
    Interrupted,
}

struct PlayerInner {
    engine: Arc<dyn AutomationEngine>,
    resolver: ElementResolver,
    settings: SettingsStore,
    gate: SessionGate,
    events: broadcast::Sender<PlayerEvent>,
    control: watch::Sender<Control>,
    state: Mutex<PlayerState>,
    /// Set by `stop`; once true no further step events go out.
    halted: Mutex<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    target: Mutex<Option<TargetWindow>>,
}

/// Plays command sequences. Cheap to clone; clones drive the same player.
#[derive(Clone)]
pub struct CommandPlayer {
    inner: Arc<PlayerInner>,
}

impl CommandPlayer {
    pub fn new(engine: Arc<dyn AutomationEngine>, settings: SettingsStore, gate: SessionGate) -> Self {
        let (events, _) = broadcast::channel(256);
        let (control, _) = watch::channel(Control::Run);
        Self {
            inner: Arc::new(PlayerInner {
                resolver: ElementResolver::new(Arc::clone(&engine)),
                engine,
                settings,
                gate,
                events,
                control,
                state: Mutex::new(PlayerState::Idle),
                halted: Mutex::new(false),
                task: Mutex::new(None),
                target: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    /// Get a stream of player events
    pub fn event_stream(&self) -> impl Stream<Item = PlayerEvent> {
        let mut rx = self.inner.events.subscribe();
        Box::pin(async_stream::stream! {
            while let Ok(event) = rx.recv().await {
                yield event;
            }
        })
    }

    pub fn state(&self) -> PlayerState {
        *lock(&self.inner.state)
    }

    pub fn set_target_window(&self, target: TargetWindow) {
        info!(window = %target.handle, process = %target.process_name, "Playback target set");
        *lock(&self.inner.target) = Some(target);
    }

    pub fn target_window(&self) -> Option<TargetWindow> {
        lock(&self.inner.target).clone()
    }

    pub fn get_settings(&self) -> ExecutionSettings {
        self.inner.settings.get()
    }

    /// Replace the execution settings. A running playback picks them up at
    /// its next step.
    pub fn update_settings(&self, settings: ExecutionSettings) -> Result<()> {
        self.inner.settings.update(settings)
    }

    /// Play a sequence and wait for it to finish.
    pub async fn play_sequence(
        &self,
        sequence: &CommandSequence,
        repeat_count: u32,
        options: PlayOptions,
    ) -> Result<PlaybackOutcome> {
        self.play_sequence_async(sequence, repeat_count, options)
            .await?
            .wait()
            .await
    }

    /// Start playing a sequence in the background.
    ///
    /// The sequence is validated first: an empty sequence or a `LoopEnd`
    /// without an opener is refused, and unclosed loops are refused unless
    /// `options.allow_structural_warnings` is set.
    #[instrument(skip(self, sequence, options), fields(sequence = %sequence.name))]
    pub async fn play_sequence_async(
        &self,
        sequence: &CommandSequence,
        repeat_count: u32,
        options: PlayOptions,
    ) -> Result<PlaybackHandle> {
        let target = self.require_target()?;
        let report = preflight(sequence.commands()).map_err(|issue| {
            error!(%issue, "Sequence rejected");
            MacroError::Structural(issue)
        })?;
        if let Some(first) = report.warnings.first() {
            if !options.allow_structural_warnings {
                return Err(MacroError::Structural(first.clone()));
            }
            for issue in &report.warnings {
                warn!(%issue, "Playing despite structural warning");
            }
        }

        self.start(RunPlan {
            name: sequence.name.clone(),
            commands: sequence.commands().to_vec(),
            repeat: repeat_count,
            invocations_per_run: report.invocations_per_run,
            options,
            target,
        })
    }

    /// Execute only the first command of the sequence.
    pub async fn test_playback(&self, sequence: &CommandSequence) -> Result<PlaybackOutcome> {
        let first = sequence
            .get(0)
            .cloned()
            .ok_or(MacroError::Structural(StructuralIssue::EmptySequence))?;
        let target = self.require_target()?;
        info!(command = %first, "Test playback");
        let invocations_per_run = usize::from(!first.command_type().is_loop_marker());
        self.start(RunPlan {
            name: sequence.name.clone(),
            commands: vec![first],
            repeat: 1,
            invocations_per_run,
            options: PlayOptions::default(),
            target,
        })?
        .wait()
        .await
    }

    /// Suspend at the next step boundary. Ignored unless playing.
    pub fn pause(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state != PlayerState::Playing {
                debug!(state = ?*state, "Pause ignored");
                return;
            }
            *state = PlayerState::Paused;
            self.inner.control.send_replace(Control::Pause);
        }
        info!("Playback paused");
        self.inner.emit(PlayerEvent::PlaybackStateChanged(PlaybackState::Paused));
    }

    /// Continue a paused run. Ignored unless paused.
    pub fn resume(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state != PlayerState::Paused {
                debug!(state = ?*state, "Resume ignored");
                return;
            }
            *state = PlayerState::Playing;
            self.inner.control.send_replace(Control::Run);
        }
        info!("Playback resumed");
        self.inner.emit(PlayerEvent::PlaybackStateChanged(PlaybackState::Resumed));
    }

    /// Stop the run and wait for the in-flight step to settle. No
    /// `CommandExecuted` event is emitted once this returns.
    pub async fn stop(&self) {
        {
            let state = lock(&self.inner.state);
            if *state == PlayerState::Idle {
                return;
            }
            *lock(&self.inner.halted) = true;
            self.inner.control.send_replace(Control::Stop);
        }
        info!("Stopping playback");
        self.inner.emit(PlayerEvent::PlaybackStateChanged(PlaybackState::Stopped));

        let task = lock(&self.inner.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Playback task ended abnormally");
            }
        }
    }

    fn require_target(&self) -> Result<TargetWindow> {
        self.target_window()
            .ok_or_else(|| MacroError::InvalidOperation("no target window selected".to_string()))
    }

    fn start(&self, plan: RunPlan) -> Result<PlaybackHandle> {
        let token = {
            let mut state = lock(&self.inner.state);
            if *state != PlayerState::Idle {
                return Err(MacroError::InvalidOperation("playback is already running".to_string()));
            }
            let token = self.inner.gate.try_acquire(SessionRole::Player)?;
            *state = PlayerState::Playing;
            *lock(&self.inner.halted) = false;
            self.inner.control.send_replace(Control::Run);
            token
        };
        self.inner.emit(PlayerEvent::PlaybackStateChanged(PlaybackState::Started));

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            // The run gets its own task so a panic in it still releases the
            // player below.
            let runner = Arc::clone(&inner);
            let outcome = match tokio::spawn(async move { runner.run(plan).await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Playback run aborted");
                    inner.emit(PlayerEvent::PlaybackError {
                        step_number: 0,
                        message: e.to_string(),
                    });
                    PlaybackOutcome {
                        success: false,
                        commands_executed: 0,
                        total_commands: 0,
                        message: format!("Playback aborted: {e}"),
                        stopped: false,
                    }
                }
            };
            drop(token);
            *lock(&inner.state) = PlayerState::Idle;
            inner.emit(PlayerEvent::PlaybackCompleted(outcome.clone()));
            let _ = outcome_tx.send(outcome);
        });
        *lock(&self.inner.task) = Some(task);

        Ok(PlaybackHandle { outcome: outcome_rx })
    }
}

impl PlayerInner {
    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn emit_step(&self, event: PlayerEvent) {
        let halted = lock(&self.halted);
        if !*halted {
            self.emit(event);
        }
    }

    async fn run(&self, plan: RunPlan) -> PlaybackOutcome {
        let RunPlan {
            name,
            commands,
            repeat,
            invocations_per_run,
            options,
            target,
        } = plan;
        let until_stopped = repeat == 0 || repeat == REPEAT_UNTIL_STOPPED;
        let total_steps = commands.len();
        let mut control = self.control.subscribe();
        let started = Instant::now();
        info!(sequence = %name, steps = total_steps, repeat, direct = options.direct_mode, "Playback started");

        let mut executed = 0usize;
        let mut failed = 0usize;
        let mut repetition = 0u32;
        let mut stopped = false;
        let mut fatal: Option<String> = None;

        'runs: while until_stopped || repetition < repeat {
            repetition += 1;
            debug!(repetition, "Starting repetition");
            let mut loops: Vec<LoopFrame> = Vec::new();
            let mut pc = 0;

            while pc < total_steps {
                if wait_at_step_boundary(&mut control).await == Control::Stop {
                    stopped = true;
                    break 'runs;
                }

                let command = &commands[pc];
                let kind = command.command_type();
                if kind.is_loop_opener() {
                    loops.push(LoopFrame {
                        start: pc,
                        remaining: command.repeat_count(),
                    });
                    pc += 1;
                    continue;
                }
                if kind == CommandType::LoopEnd {
                    pc = next_after_loop_end(&mut loops, pc);
                    continue;
                }

                let settings = self.settings.get();
                let step_number = command.step_number();
                let (success, error, changed, latency) =
                    match self.execute_step(command, &settings, &options, &target, &mut control).await {
                        StepResult::Done { changed, resolve_latency } => (true, None, changed, resolve_latency),
                        StepResult::Interrupted => {
                            stopped = true;
                            break 'runs;
                        }
                        StepResult::Failed(message) => {
                            warn!(step_number, %message, "Step failed");
                            (false, Some(message), false, Duration::ZERO)
                        }
                        StepResult::Fatal(message) => {
                            error!(step_number, %message, "Step failed fatally");
                            failed += 1;
                            self.emit_step(PlayerEvent::CommandExecuted {
                                index: pc,
                                step_number,
                                total_steps,
                                repetition,
                                success: false,
                                error: Some(message.clone()),
                            });
                            self.emit(PlayerEvent::PlaybackError {
                                step_number,
                                message: message.clone(),
                            });
                            fatal = Some(format!("Step {step_number}: {message}"));
                            break 'runs;
                        }
                    };

                if success {
                    executed += 1;
                } else {
                    failed += 1;
                }
                self.emit_step(PlayerEvent::CommandExecuted {
                    index: pc,
                    step_number,
                    total_steps,
                    repetition,
                    success,
                    error: error.clone(),
                });

                if !success && settings.on_step_failure == OnStepFailure::Abort {
                    let message = error.unwrap_or_default();
                    self.emit(PlayerEvent::PlaybackError {
                        step_number,
                        message: message.clone(),
                    });
                    fatal = Some(format!("Aborted at step {step_number}: {message}"));
                    break 'runs;
                }

                let delay = post_step_delay(&settings, changed, latency);
                if !delay.is_zero() && !sleep_unless_stopped(delay, &mut control).await {
                    stopped = true;
                    break 'runs;
                }
                pc += 1;
            }
        }

        let planned_runs = if until_stopped { repetition } else { repeat };
        let total_commands = invocations_per_run.saturating_mul(planned_runs as usize);
        let (success, message) = if let Some(message) = fatal {
            (false, message)
        } else if stopped {
            (
                until_stopped && failed == 0,
                format!("Playback stopped after {executed} of {total_commands} commands"),
            )
        } else if failed == 0 {
            (true, format!("Executed {executed} of {total_commands} commands"))
        } else {
            (
                false,
                format!("{failed} step(s) failed; executed {executed} of {total_commands} commands"),
            )
        };

        info!(
            duration_ms = started.elapsed().as_millis(),
            success,
            executed,
            total_commands,
            repetitions = repetition,
            "Playback finished"
        );
        PlaybackOutcome {
            success,
            commands_executed: executed,
            total_commands,
            message,
            stopped,
        }
    }

    #[instrument(level = "debug", skip_all, fields(step = command.step_number(), kind = %command.command_type()))]
    async fn execute_step(
        &self,
        command: &Command,
        settings: &ExecutionSettings,
        options: &PlayOptions,
        target: &TargetWindow,
        control: &mut watch::Receiver<Control>,
    ) -> StepResult {
        if command.command_type() == CommandType::Wait {
            let duration = command.wait_duration().unwrap_or_default();
            return if sleep_unless_stopped(duration, control).await {
                StepResult::Done {
                    changed: false,
                    resolve_latency: Duration::ZERO,
                }
            } else {
                StepResult::Interrupted
            };
        }

        let window = target.handle;
        let descriptor = command.descriptor();
        let mode = if options.direct_mode {
            ResolveMode::CoordinatesOnly
        } else {
            ResolveMode::ElementSearch
        };
        let attempts = match settings.on_step_failure {
            OnStepFailure::Retry(extra) => extra.saturating_add(1),
            _ => 1,
        };

        let mut resolution = None;
        let mut last_error = None;
        for attempt in 1..=attempts {
            let resolved = tokio::select! {
                resolved = self.resolver.resolve(window, &descriptor, mode, Some(settings.max_wait_for_element())) => resolved,
                _ = stop_requested(control) => return StepResult::Interrupted,
            };
            match resolved {
                Ok(found) => {
                    resolution = Some(found);
                    break;
                }
                Err(e) if e.is_not_found() => {
                    if attempt < attempts {
                        warn!(attempt, error = %e, "Element not found, retrying step");
                    }
                    last_error = Some(e);
                }
                Err(e) => return StepResult::Fatal(e.to_string()),
            }
        }
        let Some(resolution) = resolution else {
            return StepResult::Failed(
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "element not found".to_string()),
            );
        };
        let element = &resolution.element;

        if settings.highlight_elements && !options.direct_mode {
            if let Err(e) = self.engine.highlight(element, settings.highlight_duration()) {
                warn!(error = %e, "Could not highlight element");
            }
        }

        let before = if settings.enable_state_verification {
            match self.engine.state_fingerprint(window) {
                Ok(fingerprint) => Some(fingerprint),
                Err(e) => {
                    warn!(error = %e, "Could not read UI state before acting");
                    None
                }
            }
        } else {
            None
        };

        let action = input_action(command, element);
        if let Err(e) = self.engine.synthesize(window, element, &action) {
            return StepResult::Fatal(format!("could not deliver {action}: {e}"));
        }
        debug!(%action, strategy = ?resolution.strategy, "Input delivered");

        if settings.wait_for_previous_command_completion {
            if let Err(e) = self
                .engine
                .wait_for_input_idle(window, settings.max_wait_for_state_change())
                .await
            {
                warn!(error = %e, "Target did not report input idle");
            }
        }

        let changed = match before {
            Some(before) => {
                self.wait_for_state_change(window, before, settings.max_wait_for_state_change())
                    .await
            }
            None => false,
        };

        StepResult::Done {
            changed,
            resolve_latency: resolution.elapsed,
        }
    }

    /// Poll the window's UI fingerprint until it differs from `before`.
    async fn wait_for_state_change(&self, window: WindowHandle, before: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.engine.state_fingerprint(window) {
                Ok(now) if now != before => return true,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Could not read UI state after acting");
                    return false;
                }
            }
            if Instant::now() >= deadline {
                warn!(timeout_ms = timeout.as_millis(), "No observable UI change after step");
                return false;
            }
            tokio::time::sleep(STATE_POLL_INTERVAL).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Position after a `LoopEnd`: back to the first body step while
/// iterations remain, otherwise past the marker.
fn next_after_loop_end(loops: &mut Vec<LoopFrame>, pc: usize) -> usize {
    if let Some(frame) = loops.last_mut() {
        frame.remaining = frame.remaining.saturating_sub(1);
        if frame.remaining > 0 {
            return frame.start + 1;
        }
        loops.pop();
    }
    pc + 1
}

fn input_action(command: &Command, element: &UIElement) -> InputAction {
    match command.command_type() {
        CommandType::SetText => InputAction::SetText {
            text: command.value().to_string(),
        },
        CommandType::KeyPress => InputAction::KeyPress {
            key: command.value().to_string(),
        },
        _ => {
            let at = command
                .descriptor()
                .position
                .filter(|p| element.bounds.contains(*p))
                .unwrap_or_else(|| element.center());
            InputAction::Click { at }
        }
    }
}

/// Fixed delay, or with adaptive delay: nothing after a verified UI change,
/// otherwise the fixed delay stretched by half the last resolution latency.
fn post_step_delay(settings: &ExecutionSettings, changed: bool, resolve_latency: Duration) -> Duration {
    if !settings.use_adaptive_delay {
        return settings.default_delay();
    }
    if changed {
        return Duration::ZERO;
    }
    (settings.default_delay() + resolve_latency / 2).min(settings.max_wait_for_state_change())
}

/// Suspension point between steps. Blocks while paused.
async fn wait_at_step_boundary(control: &mut watch::Receiver<Control>) -> Control {
    tokio::task::yield_now().await;
    loop {
        let current = *control.borrow_and_update();
        if current != Control::Pause {
            return current;
        }
        if control.changed().await.is_err() {
            return Control::Stop;
        }
    }
}

async fn stop_requested(control: &mut watch::Receiver<Control>) {
    loop {
        if *control.borrow_and_update() == Control::Stop {
            return;
        }
        if control.changed().await.is_err() {
            return;
        }
    }
}

/// Returns false if a stop arrived before the duration elapsed.
async fn sleep_unless_stopped(duration: Duration, control: &mut watch::Receiver<Control>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = stop_requested(control) => false,
    }
}
