//! In-memory engine
//!
//! Models windows and their controls without touching a real desktop. Every
//! synthesized action is logged, state-changing input bumps the window's UI
//! fingerprint, and failures can be injected per element. Used for dry runs
//! and for exercising the recorder and player.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::AutomationEngine;
use crate::{AutomationError, InputAction, Position, Rect, TargetWindow, UIElement, WindowHandle};

/// Description of a control to place in a headless window
#[derive(Debug, Clone)]
pub struct ElementSpec {
    pub automation_id: Option<String>,
    pub class_name: String,
    pub name: Option<String>,
    pub role: String,
    pub bounds: Rect,
}

impl ElementSpec {
    pub fn new(class_name: impl Into<String>, bounds: Rect) -> Self {
        let class_name = class_name.into();
        Self {
            automation_id: None,
            role: class_name.to_lowercase(),
            class_name,
            name: None,
            bounds,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.automation_id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One input delivered through [`HeadlessEngine::synthesize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAction {
    pub window: WindowHandle,
    pub object_id: usize,
    pub automation_id: Option<String>,
    pub action: InputAction,
}

#[derive(Debug)]
struct HeadlessElement {
    element: UIElement,
    /// Lookups by id still to fail before the element "appears"
    hidden_lookups: u32,
}

impl HeadlessElement {
    fn visible(&self) -> bool {
        self.hidden_lookups == 0
    }
}

#[derive(Debug)]
struct HeadlessWindow {
    elements: Vec<HeadlessElement>,
    focused: Option<usize>,
    fingerprint: u64,
    frozen: bool,
}

#[derive(Debug, Default)]
struct HeadlessState {
    windows: HashMap<WindowHandle, HeadlessWindow>,
    next_object_id: usize,
    actions: Vec<SynthesizedAction>,
    highlights: Vec<usize>,
    failing_synthesis: HashSet<String>,
    input_idle_delay: Duration,
    input_idle_waits: usize,
}

#[derive(Debug, Default)]
pub struct HeadlessEngine {
    state: Mutex<HeadlessState>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HeadlessState>, AutomationError> {
        self.state
            .lock()
            .map_err(|e| AutomationError::Internal(format!("headless engine state poisoned: {e}")))
    }

    pub fn add_window(&self, target: TargetWindow) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        state.windows.insert(
            target.handle,
            HeadlessWindow {
                elements: Vec::new(),
                focused: None,
                fingerprint: 0,
                frozen: false,
            },
        );
        Ok(())
    }

    pub fn add_element(&self, window: WindowHandle, spec: ElementSpec) -> Result<UIElement, AutomationError> {
        let mut state = self.lock()?;
        state.next_object_id += 1;
        let object_id = state.next_object_id;
        let element = UIElement {
            object_id,
            automation_id: spec.automation_id,
            class_name: Some(spec.class_name),
            name: spec.name,
            role: spec.role,
            bounds: spec.bounds,
            value: None,
            is_enabled: true,
        };
        let target = window_mut(&mut state, window)?;
        target.elements.push(HeadlessElement {
            element: element.clone(),
            hidden_lookups: 0,
        });
        Ok(element)
    }

    /// Make an element invisible until `lookups` id lookups have missed it.
    pub fn hide_for_lookups(&self, window: WindowHandle, id: &str, lookups: u32) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        let target = window_mut(&mut state, window)?;
        let entry = target
            .elements
            .iter_mut()
            .find(|e| e.element.id() == Some(id))
            .ok_or_else(|| AutomationError::ElementNotFound(id.to_string()))?;
        entry.hidden_lookups = lookups;
        Ok(())
    }

    pub fn remove_element(&self, window: WindowHandle, id: &str) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        let target = window_mut(&mut state, window)?;
        target.elements.retain(|e| e.element.id() != Some(id));
        Ok(())
    }

    /// Reject every synthesized input aimed at the element with this id.
    pub fn fail_synthesis_for(&self, id: &str) -> Result<(), AutomationError> {
        self.lock()?.failing_synthesis.insert(id.to_string());
        Ok(())
    }

    /// Give keyboard focus to the element with this id.
    pub fn focus(&self, window: WindowHandle, id: &str) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        let target = window_mut(&mut state, window)?;
        let object_id = target
            .elements
            .iter()
            .find(|e| e.element.id() == Some(id))
            .map(|e| e.element.object_id)
            .ok_or_else(|| AutomationError::ElementNotFound(id.to_string()))?;
        target.focused = Some(object_id);
        Ok(())
    }

    /// A frozen window accepts input without any observable UI change.
    pub fn freeze(&self, window: WindowHandle, frozen: bool) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        window_mut(&mut state, window)?.frozen = frozen;
        Ok(())
    }

    /// How long the simulated application stays busy after each input.
    pub fn set_input_idle_delay(&self, delay: Duration) -> Result<(), AutomationError> {
        self.lock()?.input_idle_delay = delay;
        Ok(())
    }

    /// Number of `wait_for_input_idle` calls so far.
    pub fn input_idle_waits(&self) -> usize {
        self.lock().map(|s| s.input_idle_waits).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<SynthesizedAction> {
        self.lock().map(|s| s.actions.clone()).unwrap_or_default()
    }

    pub fn highlights(&self) -> Vec<usize> {
        self.lock().map(|s| s.highlights.clone()).unwrap_or_default()
    }

    /// Current value of a text control.
    pub fn value_of(&self, window: WindowHandle, id: &str) -> Option<String> {
        let state = self.lock().ok()?;
        let value = state
            .windows
            .get(&window)?
            .elements
            .iter()
            .find(|e| e.element.id() == Some(id))
            .and_then(|e| e.element.value.clone());
        value
    }
}

fn window_mut(state: &mut HeadlessState, window: WindowHandle) -> Result<&mut HeadlessWindow, AutomationError> {
    state
        .windows
        .get_mut(&window)
        .ok_or_else(|| AutomationError::PlatformError(format!("no such window {window}")))
}

fn window_ref(state: &HeadlessState, window: WindowHandle) -> Result<&HeadlessWindow, AutomationError> {
    state
        .windows
        .get(&window)
        .ok_or_else(|| AutomationError::PlatformError(format!("no such window {window}")))
}

#[async_trait::async_trait]
impl AutomationEngine for HeadlessEngine {
    fn find_by_id(&self, window: WindowHandle, id: &str) -> Result<UIElement, AutomationError> {
        let mut state = self.lock()?;
        let target = window_mut(&mut state, window)?;
        let entry = target
            .elements
            .iter_mut()
            .find(|e| e.element.id() == Some(id))
            .ok_or_else(|| AutomationError::ElementNotFound(format!("no element with id '{id}'")))?;
        if !entry.visible() {
            entry.hidden_lookups -= 1;
            return Err(AutomationError::ElementNotFound(format!("element '{id}' is not on screen yet")));
        }
        Ok(entry.element.clone())
    }

    fn find_by_class(&self, window: WindowHandle, class_name: &str) -> Result<Vec<UIElement>, AutomationError> {
        let state = self.lock()?;
        let target = window_ref(&state, window)?;
        Ok(target
            .elements
            .iter()
            .filter(|e| e.visible() && e.element.class_name.as_deref() == Some(class_name))
            .map(|e| e.element.clone())
            .collect())
    }

    fn element_at(&self, window: WindowHandle, position: Position) -> Result<UIElement, AutomationError> {
        let state = self.lock()?;
        let target = window_ref(&state, window)?;
        target
            .elements
            .iter()
            .rev()
            .find(|e| e.visible() && e.element.bounds.contains(position))
            .map(|e| e.element.clone())
            .ok_or_else(|| {
                AutomationError::ElementNotFound(format!("nothing at ({}, {})", position.x, position.y))
            })
    }

    fn focused_element(&self, window: WindowHandle) -> Result<UIElement, AutomationError> {
        let state = self.lock()?;
        let target = window_ref(&state, window)?;
        target
            .focused
            .and_then(|focused| target.elements.iter().find(|e| e.element.object_id == focused))
            .map(|e| e.element.clone())
            .ok_or_else(|| AutomationError::ElementNotFound("no focused element".to_string()))
    }

    fn synthesize(&self, window: WindowHandle, element: &UIElement, action: &InputAction) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        if let Some(id) = element.id() {
            if state.failing_synthesis.contains(id) {
                return Err(AutomationError::PlatformError(format!("input to '{id}' was rejected")));
            }
        }
        let target = window_mut(&mut state, window)?;
        let entry = target
            .elements
            .iter_mut()
            .find(|e| e.element.object_id == element.object_id)
            .ok_or_else(|| AutomationError::PlatformError("element no longer exists".to_string()))?;

        if let InputAction::SetText { text } = action {
            entry.element.value = Some(text.clone());
        }
        target.focused = Some(element.object_id);
        if !target.frozen {
            target.fingerprint += 1;
        }
        debug!(object_id = element.object_id, %action, "Headless input delivered");

        state.actions.push(SynthesizedAction {
            window,
            object_id: element.object_id,
            automation_id: element.automation_id.clone(),
            action: action.clone(),
        });
        Ok(())
    }

    fn highlight(&self, element: &UIElement, _duration: Duration) -> Result<(), AutomationError> {
        self.lock()?.highlights.push(element.object_id);
        Ok(())
    }

    fn state_fingerprint(&self, window: WindowHandle) -> Result<u64, AutomationError> {
        let state = self.lock()?;
        Ok(window_ref(&state, window)?.fingerprint)
    }

    async fn wait_for_input_idle(&self, window: WindowHandle, timeout: Duration) -> Result<(), AutomationError> {
        let delay = {
            let mut state = self.lock()?;
            window_ref(&state, window)?;
            state.input_idle_waits += 1;
            state.input_idle_delay
        };
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(AutomationError::Timeout(format!("window {window} still busy after {timeout:?}")));
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }
}
