use chrono::{DateTime, Utc};
use macrokit::{Command, Position, WindowHandle};
use serde::{Deserialize, Serialize};

/// Virtual key codes delivered by the input hook
pub mod keys {
    pub const BACKSPACE: u32 = 0x08;
    pub const TAB: u32 = 0x09;
    pub const ENTER: u32 = 0x0D;
    pub const SHIFT: u32 = 0x10;
    pub const CONTROL: u32 = 0x11;
    pub const ALT: u32 = 0x12;
    pub const PAUSE: u32 = 0x13;
    pub const CAPSLOCK: u32 = 0x14;
    pub const ESCAPE: u32 = 0x1B;
    pub const SPACE: u32 = 0x20;
    pub const PAGEUP: u32 = 0x21;
    pub const PAGEDOWN: u32 = 0x22;
    pub const END: u32 = 0x23;
    pub const HOME: u32 = 0x24;
    pub const LEFT: u32 = 0x25;
    pub const UP: u32 = 0x26;
    pub const RIGHT: u32 = 0x27;
    pub const DOWN: u32 = 0x28;
    pub const INSERT: u32 = 0x2D;
    pub const DELETE: u32 = 0x2E;
    pub const LWIN: u32 = 0x5B;
    pub const RWIN: u32 = 0x5C;
    pub const F1: u32 = 0x70;
    pub const F24: u32 = 0x87;
    pub const LSHIFT: u32 = 0xA0;
    pub const RSHIFT: u32 = 0xA1;
    pub const LCONTROL: u32 = 0xA2;
    pub const RCONTROL: u32 = 0xA3;
    pub const LMENU: u32 = 0xA4;
    pub const RMENU: u32 = 0xA5;

    pub fn is_modifier(key_code: u32) -> bool {
        matches!(
            key_code,
            SHIFT | CONTROL | ALT | CAPSLOCK | LWIN | RWIN | LSHIFT | RSHIFT | LCONTROL | RCONTROL | LMENU | RMENU
        )
    }

    pub fn is_function_key(key_code: u32) -> bool {
        (F1..=F24).contains(&key_code)
    }

    /// Name of a key as stored in a `KeyPress` command.
    pub fn key_name(key_code: u32) -> Option<String> {
        let name = match key_code {
            BACKSPACE => "Backspace",
            TAB => "Tab",
            ENTER => "Enter",
            PAUSE => "Pause",
            ESCAPE => "Escape",
            SPACE => "Space",
            PAGEUP => "PageUp",
            PAGEDOWN => "PageDown",
            END => "End",
            HOME => "Home",
            LEFT => "Left",
            UP => "Up",
            RIGHT => "Right",
            DOWN => "Down",
            INSERT => "Insert",
            DELETE => "Delete",
            code if is_function_key(code) => return Some(format!("F{}", code - F1 + 1)),
            code @ (0x30..=0x39 | 0x41..=0x5A) => return char::from_u32(code).map(String::from),
            _ => return None,
        };
        Some(name.to_string())
    }
}

/// Represents the type of mouse button
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// A mouse button press observed by the hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseEvent {
    pub button: MouseButton,

    /// Screen position of the press
    pub position: Position,
}

/// Represents a keyboard event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardEvent {
    /// The key code
    pub key_code: u32,

    /// Whether the key was pressed or released
    pub is_key_down: bool,

    pub ctrl_pressed: bool,
    pub alt_pressed: bool,
    pub shift_pressed: bool,
    pub win_pressed: bool,

    /// Character representation of the key (if printable)
    pub character: Option<char>,
}

impl KeyboardEvent {
    /// A key-down with no modifiers held.
    pub fn down(key_code: u32) -> Self {
        Self {
            key_code,
            is_key_down: true,
            ctrl_pressed: false,
            alt_pressed: false,
            shift_pressed: false,
            win_pressed: false,
            character: None,
        }
    }

    /// A key-down producing a printable character.
    pub fn typed(character: char) -> Self {
        let key_code = character.to_ascii_uppercase() as u32;
        Self {
            character: Some(character),
            shift_pressed: character.is_ascii_uppercase(),
            ..Self::down(key_code)
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl_pressed = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt_pressed = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift_pressed = true;
        self
    }

    pub fn released(mut self) -> Self {
        self.is_key_down = false;
        self
    }

    pub fn is_modifier_only(&self) -> bool {
        keys::is_modifier(self.key_code)
    }

    /// Ctrl, Alt or Win turn a key into a shortcut rather than text.
    pub fn is_chord(&self) -> bool {
        self.ctrl_pressed || self.alt_pressed || self.win_pressed
    }

    /// The character this key types into a text field, if any.
    pub fn printable(&self) -> Option<char> {
        if self.is_chord() {
            return None;
        }
        self.character.filter(|c| !c.is_control())
    }

    /// Shortcut notation such as `Ctrl+Shift+S`. `None` for keys without a
    /// recordable name.
    pub fn chord_name(&self) -> Option<String> {
        let key = keys::key_name(self.key_code)?;
        let mut parts = Vec::new();
        if self.ctrl_pressed {
            parts.push("Ctrl");
        }
        if self.alt_pressed {
            parts.push("Alt");
        }
        if self.shift_pressed {
            parts.push("Shift");
        }
        if self.win_pressed {
            parts.push("Win");
        }
        parts.push(key.as_str());
        Some(parts.join("+"))
    }
}

/// Text committed in one piece, e.g. by an IME or a paste the hook reports
/// as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEntryEvent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputKind {
    Mouse(MouseEvent),
    Keyboard(KeyboardEvent),
    TextEntry(TextEntryEvent),
}

/// A raw input event as delivered by the input hook, tagged with the window
/// that owned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub window: WindowHandle,
    pub timestamp: DateTime<Utc>,
    pub kind: InputKind,
}

impl InputEvent {
    pub fn new(window: WindowHandle, kind: InputKind) -> Self {
        Self {
            window,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn click(window: WindowHandle, position: Position) -> Self {
        Self::new(
            window,
            InputKind::Mouse(MouseEvent {
                button: MouseButton::Left,
                position,
            }),
        )
    }

    pub fn key(window: WindowHandle, event: KeyboardEvent) -> Self {
        Self::new(window, InputKind::Keyboard(event))
    }

    pub fn text(window: WindowHandle, text: impl Into<String>) -> Self {
        Self::new(window, InputKind::TextEntry(TextEntryEvent { text: text.into() }))
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
}

/// Events the recorder publishes to its listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RecorderEvent {
    RecordingStateChanged { is_recording: bool, is_paused: bool },

    /// A new command was appended
    CommandRecorded(Command),

    /// The last command absorbed more input
    CommandUpdated(Command),

    /// Element capture failed and the command was kept with coordinates only
    CaptureDegraded { step_number: usize, message: String },
}

impl RecorderEvent {
    pub(crate) fn state(state: RecordingState) -> Self {
        RecorderEvent::RecordingStateChanged {
            is_recording: state != RecordingState::Idle,
            is_paused: state == RecordingState::Paused,
        }
    }
}
