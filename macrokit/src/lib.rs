//! Recording and playback of UI macros
//!
//! Commands captured from a target window are kept as an ordered
//! [`CommandSequence`]. The [`CommandPlayer`] replays a sequence against the
//! live window, locating every control again through an
//! [`AutomationEngine`] rather than trusting recorded coordinates.

use std::sync::Arc;

pub mod element;
pub mod errors;
pub mod model;
pub mod platforms;
pub mod player;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod storage;
#[cfg(test)]
mod tests;
pub mod unified;
pub mod utils;

pub use element::{ElementDescriptor, InputAction, Position, Rect, TargetWindow, UIElement, WindowHandle};
pub use errors::{AutomationError, MacroError, Result};
pub use model::{Command, CommandSequence, CommandType, LoopReport};
pub use platforms::{AutomationEngine, HeadlessEngine};
pub use player::{
    CommandPlayer, PlayOptions, PlaybackHandle, PlaybackOutcome, PlaybackState, PlayerEvent, PlayerState,
    StructuralIssue, REPEAT_UNTIL_STOPPED,
};
pub use resolver::{ElementResolver, ResolveMode, ResolveStrategy};
pub use session::{SessionGate, SessionRole, SessionToken};
pub use settings::{ExecutionSettings, OnStepFailure, SettingsStore};
pub use storage::SequenceDocument;
pub use unified::{ItemKind, ItemStatus, UnifiedItem, UnifiedSequence};

/// The main entry point: one engine, one settings store and one session
/// gate, shared by every player and recorder created from it.
#[derive(Clone)]
pub struct MacroKit {
    engine: Arc<dyn AutomationEngine>,
    settings: SettingsStore,
    gate: SessionGate,
}

impl MacroKit {
    pub fn new(engine: Arc<dyn AutomationEngine>, settings: ExecutionSettings) -> Result<Self> {
        Ok(Self {
            engine,
            settings: SettingsStore::new(settings)?,
            gate: SessionGate::new(),
        })
    }

    pub fn engine(&self) -> Arc<dyn AutomationEngine> {
        Arc::clone(&self.engine)
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    pub fn player(&self) -> CommandPlayer {
        CommandPlayer::new(self.engine(), self.settings.clone(), self.gate.clone())
    }
}
