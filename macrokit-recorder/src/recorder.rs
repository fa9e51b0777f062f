use chrono::{DateTime, Utc};
use macrokit::{
    AutomationEngine, Command, CommandSequence, CommandType, ElementDescriptor, MacroKit, Position, SessionGate,
    SessionRole, SessionToken, TargetWindow, UIElement, WindowHandle,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, info, instrument, warn};

use crate::events::{keys, InputEvent, InputKind, KeyboardEvent, MouseButton, RecorderEvent, RecordingState};
use crate::{RecorderError, Result};

mod task;

pub use self::task::{spawn_recorder, InputSink, RecorderExit, RecorderHandle, RecorderMessage, RecorderSnapshot};

/// Configuration for the command recorder
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Merge consecutive typing on the same control into one `SetText`
    pub auto_update_existing_commands: bool,

    /// Ask the engine for the acted-on element while recording
    pub enable_real_time_element_scanning: bool,

    /// Reuse recently resolved elements for clicks inside their bounds
    pub enable_predictive_detection: bool,

    /// Clicks at the same spot closer together than this are dropped (milliseconds)
    pub duplicate_click_threshold_ms: u64,

    /// Number of resolved elements kept for predictive detection
    pub prediction_cache_size: usize,

    /// Fill coordinate-only clicks with element data when recording stops
    pub resolve_deferred_on_stop: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            auto_update_existing_commands: true,
            enable_real_time_element_scanning: true,
            enable_predictive_detection: true,
            duplicate_click_threshold_ms: 300,
            prediction_cache_size: 16,
            resolve_deferred_on_stop: true,
        }
    }
}

/// What became of one observed input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Appended as a new command with this step number
    Recorded(usize),
    /// Merged into the command with this step number
    Updated(usize),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotRecording,
    OtherWindow,
    KeyUp,
    ModifierOnly,
    DuplicateClick,
    UnsupportedButton,
    UnnamedKey,
    EmptyText,
}

/// Turns observed input into commands.
///
/// The recorder is a plain state machine: every method runs to completion
/// on the caller's thread. [`spawn_recorder`] puts it behind a channel so
/// events from a hook thread and requests from the UI are applied in order.
pub struct CommandRecorder {
    engine: Arc<dyn AutomationEngine>,
    gate: SessionGate,
    config: RecorderConfig,
    state: RecordingState,
    target: Option<TargetWindow>,
    sequence: CommandSequence,
    token: Option<SessionToken>,
    last_click: Option<(Position, DateTime<Utc>)>,
    predictions: VecDeque<UIElement>,
    event_tx: broadcast::Sender<RecorderEvent>,
}

impl CommandRecorder {
    pub fn new(engine: Arc<dyn AutomationEngine>, gate: SessionGate, config: RecorderConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            engine,
            gate,
            config,
            state: RecordingState::Idle,
            target: None,
            sequence: CommandSequence::new(""),
            token: None,
            last_click: None,
            predictions: VecDeque::new(),
            event_tx,
        }
    }

    /// A recorder sharing the kit's engine and session gate, so it can never
    /// run while a player from the same kit holds the sequence.
    pub fn from_kit(kit: &MacroKit, config: RecorderConfig) -> Self {
        Self::new(kit.engine(), kit.gate().clone(), config)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.event_tx.subscribe()
    }

    /// Get a stream of events
    pub fn event_stream(&self) -> impl Stream<Item = RecorderEvent> {
        let mut rx = self.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            while let Ok(event) = rx.recv().await {
                yield event;
            }
        })
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<RecorderEvent> {
        self.event_tx.clone()
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn target(&self) -> Option<&TargetWindow> {
        self.target.as_ref()
    }

    /// The sequence recorded so far.
    pub fn sequence(&self) -> &CommandSequence {
        &self.sequence
    }

    #[instrument(skip(self, target), fields(window = %target.handle))]
    pub fn start_recording(&mut self, name: &str, target: TargetWindow) -> Result<()> {
        if self.state != RecordingState::Idle {
            return Err(RecorderError::InvalidOperation(format!(
                "recording already in progress ({:?})",
                self.state
            )));
        }
        let token = self.gate.try_acquire(SessionRole::Recorder)?;

        let mut sequence = CommandSequence::new(name);
        sequence.target_process_name = target.process_name.clone();
        sequence.target_window_title = target.title.clone();
        self.sequence = sequence;
        self.target = Some(target);
        self.token = Some(token);
        self.last_click = None;
        self.predictions.clear();

        info!(name, "Recording started");
        self.set_state(RecordingState::Recording);
        Ok(())
    }

    pub fn pause_recording(&mut self) {
        if self.state != RecordingState::Recording {
            debug!(state = ?self.state, "Pause ignored");
            return;
        }
        info!(steps = self.sequence.len(), "Recording paused");
        self.set_state(RecordingState::Paused);
    }

    pub fn resume_recording(&mut self) {
        if self.state != RecordingState::Paused {
            debug!(state = ?self.state, "Resume ignored");
            return;
        }
        self.last_click = None;
        info!("Recording resumed");
        self.set_state(RecordingState::Recording);
    }

    /// Finish recording and hand back the sequence. Stopping an idle
    /// recorder does nothing and returns `None`.
    #[instrument(skip(self))]
    pub fn stop_recording(&mut self) -> Option<CommandSequence> {
        if self.state == RecordingState::Idle {
            return None;
        }
        let start = Instant::now();
        if self.config.resolve_deferred_on_stop {
            self.resolve_deferred();
        }
        let mut sequence = std::mem::replace(&mut self.sequence, CommandSequence::new(""));
        sequence.touch();
        self.token = None;
        self.target = None;
        self.last_click = None;

        info!(
            name = %sequence.name,
            steps = sequence.len(),
            duration_ms = start.elapsed().as_millis(),
            "Recording stopped"
        );
        self.set_state(RecordingState::Idle);
        Some(sequence)
    }

    /// Append a `Wait` step. Only takes effect while recording; returns the
    /// new step number.
    pub fn add_wait_command(&mut self, ms: u64) -> Result<Option<usize>> {
        let command = Command::wait(ms)?;
        if self.state != RecordingState::Recording {
            info!(ms, state = ?self.state, "Wait not added, recorder is not recording");
            return Ok(None);
        }
        Ok(Some(self.append(command)))
    }

    /// Apply one observed input event.
    pub fn handle_input(&mut self, event: InputEvent) -> Capture {
        if self.state != RecordingState::Recording {
            return Capture::Ignored(IgnoreReason::NotRecording);
        }
        let Some(window) = self.target.as_ref().map(|t| t.handle) else {
            return Capture::Ignored(IgnoreReason::NotRecording);
        };
        if event.window != window {
            return Capture::Ignored(IgnoreReason::OtherWindow);
        }
        match event.kind {
            InputKind::Mouse(mouse) => {
                if mouse.button != MouseButton::Left {
                    return Capture::Ignored(IgnoreReason::UnsupportedButton);
                }
                self.record_click(window, mouse.position, event.timestamp)
            }
            InputKind::Keyboard(key) => self.record_key(window, &key),
            InputKind::TextEntry(entry) => {
                if entry.text.is_empty() {
                    return Capture::Ignored(IgnoreReason::EmptyText);
                }
                self.record_text(window, &entry.text)
            }
        }
    }

    fn record_click(&mut self, window: WindowHandle, position: Position, at: DateTime<Utc>) -> Capture {
        if let Some((last, last_at)) = self.last_click {
            let gap = (at - last_at).num_milliseconds();
            if last.distance_sq(&position) <= 4 && (0..=self.config.duplicate_click_threshold_ms as i64).contains(&gap) {
                debug!(x = position.x, y = position.y, gap_ms = gap, "Duplicate click dropped");
                return Capture::Ignored(IgnoreReason::DuplicateClick);
            }
        }
        self.last_click = Some((position, at));

        let (descriptor, degraded) = self.capture_click(window, position);
        let step = self.append(Command::click(descriptor));
        if let Some(message) = degraded {
            self.degraded(step, message);
        }
        Capture::Recorded(step)
    }

    fn record_key(&mut self, window: WindowHandle, key: &KeyboardEvent) -> Capture {
        if !key.is_key_down {
            return Capture::Ignored(IgnoreReason::KeyUp);
        }
        if key.is_modifier_only() {
            return Capture::Ignored(IgnoreReason::ModifierOnly);
        }
        if key.key_code == keys::BACKSPACE && !key.is_chord() {
            if let Some(step) = self.erase_last_char() {
                return Capture::Updated(step);
            }
        } else if let Some(c) = key.printable() {
            return self.record_text(window, &c.to_string());
        }

        let Some(name) = key.chord_name() else {
            return Capture::Ignored(IgnoreReason::UnnamedKey);
        };
        let (descriptor, _) = self.capture_focus(window, false);
        match Command::key_press(descriptor, name) {
            Ok(command) => Capture::Recorded(self.append(command)),
            Err(e) => {
                warn!(error = %e, "Key press not recorded");
                Capture::Ignored(IgnoreReason::UnnamedKey)
            }
        }
    }

    fn record_text(&mut self, window: WindowHandle, text: &str) -> Capture {
        let (descriptor, degraded) = self.capture_focus(window, true);

        if self.config.auto_update_existing_commands {
            let candidate = Command::set_text(descriptor.clone(), "");
            if let Some(last) = self.sequence.last_mut() {
                let continues = last.command_type() == CommandType::SetText
                    && (last.same_target(&candidate) || last.descriptor() == descriptor);
                if continues && last.append_text(text) {
                    let updated = last.clone();
                    let step = updated.step_number();
                    debug!(step, "Typing merged into previous command");
                    self.emit(RecorderEvent::CommandUpdated(updated));
                    return Capture::Updated(step);
                }
            }
        }

        let step = self.append(Command::set_text(descriptor, text));
        if let Some(message) = degraded {
            self.degraded(step, message);
        }
        Capture::Recorded(step)
    }

    /// Backspace right after typing edits the text instead of becoming a
    /// key press.
    fn erase_last_char(&mut self) -> Option<usize> {
        if !self.config.auto_update_existing_commands {
            return None;
        }
        let last = self.sequence.last_mut()?;
        if last.command_type() != CommandType::SetText || last.value().is_empty() {
            return None;
        }
        last.pop_char();
        let updated = last.clone();
        let step = updated.step_number();
        self.emit(RecorderEvent::CommandUpdated(updated));
        Some(step)
    }

    /// Descriptor of the element under a click, plus the error message when
    /// capture had to fall back to coordinates.
    fn capture_click(&mut self, window: WindowHandle, position: Position) -> (ElementDescriptor, Option<String>) {
        if self.config.enable_predictive_detection {
            if let Some(element) = self.predict(position) {
                debug!(x = position.x, y = position.y, "Element taken from prediction cache");
                return (element.descriptor(Some(position)), None);
            }
        }
        if !self.config.enable_real_time_element_scanning {
            return (ElementDescriptor::at(position), None);
        }

        let start = Instant::now();
        match self.engine.element_at(window, position) {
            Ok(element) => {
                debug!(
                    id = ?element.id(),
                    duration_ms = start.elapsed().as_millis(),
                    "Clicked element resolved"
                );
                let descriptor = element.descriptor(Some(position));
                self.remember(element);
                (descriptor, None)
            }
            Err(e) => {
                warn!(x = position.x, y = position.y, error = %e, "Click captured with coordinates only");
                (ElementDescriptor::at(position), Some(e.to_string()))
            }
        }
    }

    /// Descriptor of the focused element. When `for_text` is set and the
    /// focus cannot be read, typing is pinned to the last click position.
    fn capture_focus(&mut self, window: WindowHandle, for_text: bool) -> (ElementDescriptor, Option<String>) {
        if !self.config.enable_real_time_element_scanning {
            return (ElementDescriptor::default(), None);
        }
        match self.engine.focused_element(window) {
            Ok(element) => {
                let descriptor = element.descriptor(None);
                self.remember(element);
                (descriptor, None)
            }
            Err(e) if for_text => {
                warn!(error = %e, "Focused element unavailable for typing");
                let fallback = self
                    .last_click
                    .map(|(position, _)| ElementDescriptor::at(position))
                    .unwrap_or_default();
                (fallback, Some(e.to_string()))
            }
            Err(e) => {
                debug!(error = %e, "Key press recorded against the focused element");
                (ElementDescriptor::default(), None)
            }
        }
    }

    /// Smallest cached element containing the point.
    fn predict(&mut self, position: Position) -> Option<UIElement> {
        let index = self
            .predictions
            .iter()
            .enumerate()
            .filter(|(_, e)| e.bounds.contains(position))
            .min_by_key(|(_, e)| e.bounds.width as i64 * e.bounds.height as i64)
            .map(|(i, _)| i)?;
        let element = self.predictions.remove(index)?;
        self.predictions.push_front(element.clone());
        Some(element)
    }

    fn remember(&mut self, element: UIElement) {
        if !self.config.enable_predictive_detection || self.config.prediction_cache_size == 0 {
            return;
        }
        self.predictions.retain(|cached| cached != &element);
        self.predictions.push_front(element);
        self.predictions.truncate(self.config.prediction_cache_size);
    }

    /// Best-effort element lookup for clicks captured with coordinates only.
    fn resolve_deferred(&mut self) {
        let Some(window) = self.target.as_ref().map(|t| t.handle) else {
            return;
        };
        let mut resolved = 0usize;
        for index in 0..self.sequence.len() {
            let Some(command) = self.sequence.get_mut(index) else {
                continue;
            };
            let descriptor = command.descriptor();
            if command.command_type() != CommandType::Click || !descriptor.is_coordinate_only() {
                continue;
            }
            let Some(position) = descriptor.position else {
                continue;
            };
            match self.engine.element_at(window, position) {
                Ok(element) => {
                    command.set_descriptor(element.descriptor(Some(position)));
                    resolved += 1;
                }
                Err(e) => debug!(step = command.step_number(), error = %e, "Deferred lookup failed"),
            }
        }
        if resolved > 0 {
            info!(resolved, "Deferred element lookups applied");
        }
    }

    fn append(&mut self, command: Command) -> usize {
        let step = self.sequence.push(command);
        if let Some(recorded) = self.sequence.last() {
            debug!(step, kind = ?recorded.command_type(), "Command recorded");
            self.emit(RecorderEvent::CommandRecorded(recorded.clone()));
        }
        step
    }

    fn degraded(&self, step_number: usize, message: String) {
        self.emit(RecorderEvent::CaptureDegraded { step_number, message });
    }

    fn set_state(&mut self, state: RecordingState) {
        self.state = state;
        self.emit(RecorderEvent::state(state));
    }

    fn emit(&self, event: RecorderEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}
