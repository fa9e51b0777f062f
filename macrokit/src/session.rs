//! Exclusive ownership of the command sequence
//!
//! The recorder and the player never hold the sequence at the same time, and
//! there is never more than one of either. Both acquire a [`SessionToken`]
//! from a shared [`SessionGate`] before they start; the token releases the
//! gate when dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::errors::{MacroError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRole {
    Recorder,
    Player,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Recorder => f.write_str("recorder"),
            SessionRole::Player => f.write_str("player"),
        }
    }
}

/// Hands out at most one [`SessionToken`] at a time.
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    holder: Arc<Mutex<Option<SessionRole>>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, role: SessionRole) -> Result<SessionToken> {
        let mut holder = self
            .holder
            .lock()
            .map_err(|e| MacroError::InvalidOperation(format!("session gate poisoned: {e}")))?;
        if let Some(current) = *holder {
            return Err(MacroError::Busy { holder: current });
        }
        *holder = Some(role);
        debug!(%role, "Session acquired");
        Ok(SessionToken {
            role,
            holder: Arc::clone(&self.holder),
        })
    }

    /// The role currently holding the sequence, if any.
    pub fn holder(&self) -> Option<SessionRole> {
        match self.holder.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Proof of exclusive ownership; releases the gate on drop.
#[derive(Debug)]
pub struct SessionToken {
    role: SessionRole,
    holder: Arc<Mutex<Option<SessionRole>>>,
}

impl SessionToken {
    pub fn role(&self) -> SessionRole {
        self.role
    }
}

impl Drop for SessionToken {
    fn drop(&mut self) {
        let mut holder = match self.holder.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *holder == Some(self.role) {
            *holder = None;
            debug!(role = %self.role, "Session released");
        }
    }
}
