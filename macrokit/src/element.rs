use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle of the target window, supplied by the window picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The window the engine records against or plays into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetWindow {
    pub handle: WindowHandle,
    pub process_name: String,
    pub title: String,
}

impl TargetWindow {
    pub fn new(handle: WindowHandle, process_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            handle,
            process_name: process_name.into(),
            title: title.into(),
        }
    }
}

/// Represents a position on the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance, good enough for ranking candidates.
    pub fn distance_sq(&self, other: &Position) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dy = self.y as i64 - other.y as i64;
        dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
    }
}

/// Represents a rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, point: Position) -> bool {
        let (px, py) = (point.x as i64, point.y as i64);
        let (x, y) = (self.x as i64, self.y as i64);
        px >= x && py >= y && px < x + self.width as i64 && py < y + self.height as i64
    }

    pub fn center(&self) -> Position {
        Position {
            x: self.x.saturating_add(self.width / 2),
            y: self.y.saturating_add(self.height / 2),
        }
    }
}

/// How a recorded command identifies the control it acted on.
///
/// Every field is optional: legacy or untagged controls may only have a
/// last-known position, keyboard-only commands may have nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub element_id: Option<String>,
    pub class_name: Option<String>,
    pub element_name: Option<String>,
    pub position: Option<Position>,
}

impl ElementDescriptor {
    pub fn at(position: Position) -> Self {
        Self {
            position: Some(position),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.element_id.is_none()
            && self.class_name.is_none()
            && self.element_name.is_none()
            && self.position.is_none()
    }

    /// True when only the coordinates are known.
    pub fn is_coordinate_only(&self) -> bool {
        self.position.is_some()
            && self.element_id.is_none()
            && self.class_name.is_none()
            && self.element_name.is_none()
    }
}

/// A live UI element as reported by an automation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIElement {
    /// Engine-assigned identity, stable for the lifetime of the control.
    pub object_id: usize,
    pub automation_id: Option<String>,
    pub class_name: Option<String>,
    pub name: Option<String>,
    pub role: String,
    pub bounds: Rect,
    pub value: Option<String>,
    pub is_enabled: bool,
}

impl UIElement {
    /// Get the element's ID
    pub fn id(&self) -> Option<&str> {
        self.automation_id.as_deref()
    }

    pub fn center(&self) -> Position {
        self.bounds.center()
    }

    /// Describe this element the way a recorded command stores it. The
    /// position is the point that was acted on when known, the element
    /// centre otherwise.
    pub fn descriptor(&self, acted_at: Option<Position>) -> ElementDescriptor {
        ElementDescriptor {
            element_id: self.automation_id.clone().filter(|id| !id.is_empty()),
            class_name: self.class_name.clone().filter(|c| !c.is_empty()),
            element_name: self.name.clone().filter(|n| !n.is_empty()),
            position: Some(acted_at.unwrap_or_else(|| self.center())),
        }
    }
}

impl PartialEq for UIElement {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id
    }
}

impl Eq for UIElement {}

impl std::hash::Hash for UIElement {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.object_id.hash(state);
    }
}

/// Input the player asks an engine to synthesize against an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputAction {
    Click { at: Position },
    SetText { text: String },
    KeyPress { key: String },
}

impl fmt::Display for InputAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputAction::Click { at } => write!(f, "click at ({}, {})", at.x, at.y),
            InputAction::SetText { text } => write!(f, "set text ({} chars)", text.chars().count()),
            InputAction::KeyPress { key } => write!(f, "press {key}"),
        }
    }
}
