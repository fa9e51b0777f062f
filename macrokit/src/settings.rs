use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

use crate::errors::{MacroError, Result};

const MAX_DELAY_MS: u64 = 60 * 60 * 1000;

/// What the player does when a step cannot find its element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnStepFailure {
    /// Report the failed step and move on to the next one.
    #[default]
    Continue,
    /// End the run at the first failed step.
    Abort,
    /// Re-run the step up to `n` more times, then continue.
    Retry(u32),
}

/// Timing and verification policy for playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExecutionSettings {
    /// Pause after every executed step
    pub default_delay_ms: u64,

    /// How long to keep retrying element resolution before the step fails
    pub max_wait_for_element_ms: u64,

    /// How long to wait for an observable UI change after acting
    pub max_wait_for_state_change_ms: u64,

    /// Wait for the target application to go input-idle before the next step
    pub wait_for_previous_command_completion: bool,

    /// Scale the post-step delay from observed UI responsiveness
    pub use_adaptive_delay: bool,

    /// Watch for a UI change after every acting step
    pub enable_state_verification: bool,

    /// Flash the resolved element before acting
    pub highlight_elements: bool,

    pub highlight_duration_ms: u64,

    pub on_step_failure: OnStepFailure,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_delay_ms: 100,
            max_wait_for_element_ms: 5000,
            max_wait_for_state_change_ms: 2000,
            wait_for_previous_command_completion: true,
            use_adaptive_delay: false,
            enable_state_verification: false,
            highlight_elements: false,
            highlight_duration_ms: 300,
            on_step_failure: OnStepFailure::Continue,
        }
    }
}

impl ExecutionSettings {
    /// Settings tuned for speed: no verification, no highlight, short waits.
    pub fn fast() -> Self {
        Self {
            default_delay_ms: 0,
            max_wait_for_element_ms: 1000,
            max_wait_for_state_change_ms: 500,
            wait_for_previous_command_completion: false,
            ..Self::default()
        }
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn max_wait_for_element(&self) -> Duration {
        Duration::from_millis(self.max_wait_for_element_ms)
    }

    pub fn max_wait_for_state_change(&self) -> Duration {
        Duration::from_millis(self.max_wait_for_state_change_ms)
    }

    pub fn highlight_duration(&self) -> Duration {
        Duration::from_millis(self.highlight_duration_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| MacroError::InvalidOperation(format!("invalid execution settings: {reason}"));
        if self.max_wait_for_element_ms == 0 {
            return Err(invalid("MaxWaitForElementMs must be greater than zero"));
        }
        if self.max_wait_for_state_change_ms == 0 {
            return Err(invalid("MaxWaitForStateChangeMs must be greater than zero"));
        }
        if self.on_step_failure == OnStepFailure::Retry(0) {
            return Err(invalid("Retry policy needs at least one attempt"));
        }
        for (name, value) in [
            ("DefaultDelayMs", self.default_delay_ms),
            ("MaxWaitForElementMs", self.max_wait_for_element_ms),
            ("MaxWaitForStateChangeMs", self.max_wait_for_state_change_ms),
            ("HighlightDurationMs", self.highlight_duration_ms),
        ] {
            if value > MAX_DELAY_MS {
                return Err(invalid(&format!("{name} of {value} ms exceeds one hour")));
            }
        }
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let settings: ExecutionSettings = serde_json::from_str(&json)?;
        settings.validate()?;
        info!(path = %path.as_ref().display(), "Execution settings loaded");
        Ok(settings)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Shared, validated settings. The player takes a snapshot at the start of
/// every step, so an update is visible from the next step on.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    inner: Arc<RwLock<ExecutionSettings>>,
}

impl SettingsStore {
    pub fn new(settings: ExecutionSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(settings)),
        })
    }

    pub fn get(&self) -> ExecutionSettings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: ExecutionSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self
            .inner
            .write()
            .map_err(|e| MacroError::InvalidOperation(format!("settings lock poisoned: {e}")))?;
        *guard = settings;
        info!("Execution settings updated");
        Ok(())
    }
}
