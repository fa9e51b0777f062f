use serde::{Deserialize, Serialize};

/// Lifecycle transitions reported while a run is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Started,
    Paused,
    Resumed,
    Stopped,
}

/// Final report of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackOutcome {
    pub success: bool,
    /// Step invocations that completed successfully. Loop markers are not counted.
    pub commands_executed: usize,
    /// Step invocations the run planned. For an open-ended run this covers
    /// the repetitions that were started.
    pub total_commands: usize,
    pub message: String,
    pub stopped: bool,
}

/// Events broadcast by the player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerEvent {
    /// One step invocation finished, successfully or not.
    CommandExecuted {
        /// 0-based position in the sequence
        index: usize,
        step_number: usize,
        total_steps: usize,
        /// 1-based outer repetition
        repetition: u32,
        success: bool,
        error: Option<String>,
    },
    PlaybackStateChanged(PlaybackState),
    PlaybackCompleted(PlaybackOutcome),
    /// A failure that ended the run, with the 1-based step it happened at.
    PlaybackError { step_number: usize, message: String },
}
