//! Command recorder for macrokit
//!
//! This crate turns input events observed in a target window (clicks, key
//! presses, committed text) into a [`macrokit::CommandSequence`]. Element
//! data for each command comes from the same [`macrokit::AutomationEngine`]
//! the player uses, so a recorded sequence can be replayed by locating
//! controls again rather than by coordinates alone.

pub mod error;
pub mod events;
pub mod recorder;

pub use error::*;
pub use events::*;
pub use recorder::*;

#[cfg(test)]
mod tests {
    use super::*;
    use macrokit::{Position, WindowHandle};

    #[test]
    fn test_key_names() {
        assert_eq!(keys::key_name(keys::ENTER).as_deref(), Some("Enter"));
        assert_eq!(keys::key_name(keys::F1).as_deref(), Some("F1"));
        assert_eq!(keys::key_name(keys::F24).as_deref(), Some("F24"));
        assert_eq!(keys::key_name(0x41).as_deref(), Some("A"));
        assert_eq!(keys::key_name(0x07), None);
        assert!(keys::is_modifier(keys::RCONTROL));
        assert!(!keys::is_modifier(keys::TAB));
    }

    #[test]
    fn test_keyboard_event_creation() {
        let kb_event = KeyboardEvent::typed('a');
        assert_eq!(kb_event.key_code, 0x41);
        assert!(kb_event.is_key_down);
        assert_eq!(kb_event.printable(), Some('a'));

        let chord = kb_event.with_ctrl();
        assert!(chord.is_chord());
        assert_eq!(chord.printable(), None);
        assert_eq!(chord.chord_name().as_deref(), Some("Ctrl+A"));

        let alt_f4 = KeyboardEvent::down(keys::F1 + 3).with_alt();
        assert_eq!(alt_f4.chord_name().as_deref(), Some("Alt+F4"));
    }

    #[test]
    fn test_control_characters_are_not_printable() {
        let mut enter = KeyboardEvent::down(keys::ENTER);
        enter.character = Some('\r');
        assert_eq!(enter.printable(), None);
        assert_eq!(enter.chord_name().as_deref(), Some("Enter"));
    }

    #[test]
    fn test_state_event_flags() {
        assert_eq!(
            RecorderEvent::state(RecordingState::Paused),
            RecorderEvent::RecordingStateChanged {
                is_recording: true,
                is_paused: true
            }
        );
        assert_eq!(
            RecorderEvent::state(RecordingState::Idle),
            RecorderEvent::RecordingStateChanged {
                is_recording: false,
                is_paused: false
            }
        );
    }

    #[test]
    fn test_input_event_serialization() {
        let event = InputEvent::click(WindowHandle(0x10), Position::new(3, 4));
        let json = serde_json::to_string(&event).unwrap();
        let back: InputEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();
        assert!(config.auto_update_existing_commands);
        assert!(config.enable_real_time_element_scanning);
        assert!(config.enable_predictive_detection);
        assert!(config.prediction_cache_size > 0);
    }
}
