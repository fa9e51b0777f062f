use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use crate::element::{ElementDescriptor, UIElement, WindowHandle};
use crate::errors::AutomationError;
use crate::platforms::AutomationEngine;
use crate::utils::text_match_score;

// Default timeout if none is specified on the resolver itself
const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_millis(800);

/// Whether the resolver searches the element tree or trusts coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResolveMode {
    #[default]
    ElementSearch,
    /// "Play without element search": only the last-known position is used.
    CoordinatesOnly,
}

/// Which rule located the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveStrategy {
    ById,
    ByClass,
    ByCoordinates,
    /// Descriptor was empty; the window's focused element was used.
    Focused,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub element: UIElement,
    pub strategy: ResolveStrategy,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Finds the live element a recorded command should act on.
///
/// Resolution order is exact id, then class narrowed by the nearest text
/// match, then the last-known coordinates. Id matching survives resizes and
/// layout shifts; coordinates are the last resort for untagged controls.
#[derive(Clone)]
pub struct ElementResolver {
    engine: Arc<dyn AutomationEngine>,
    timeout: Duration,
}

impl ElementResolver {
    pub fn new(engine: Arc<dyn AutomationEngine>) -> Self {
        Self {
            engine,
            timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Set a default timeout used when `resolve` is called without one.
    pub fn set_default_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One pass over the resolution order, without waiting.
    pub fn resolve_once(
        &self,
        window: WindowHandle,
        descriptor: &ElementDescriptor,
        mode: ResolveMode,
    ) -> Result<(UIElement, ResolveStrategy), AutomationError> {
        if descriptor.is_empty() {
            return self
                .engine
                .focused_element(window)
                .map(|element| (element, ResolveStrategy::Focused));
        }

        if mode == ResolveMode::ElementSearch {
            if let Some(id) = descriptor.element_id.as_deref() {
                match self.engine.find_by_id(window, id) {
                    Ok(element) => return Ok((element, ResolveStrategy::ById)),
                    Err(e) if e.is_not_found() => debug!(id, "No element with this id, trying class"),
                    Err(e) => return Err(e),
                }
            }

            if let Some(class_name) = descriptor.class_name.as_deref() {
                let candidates = self.engine.find_by_class(window, class_name)?;
                if let Some(element) = pick_candidate(descriptor, candidates) {
                    return Ok((element, ResolveStrategy::ByClass));
                }
                debug!(class_name, "No unambiguous class match, trying coordinates");
            }
        }

        if let Some(position) = descriptor.position {
            match self.engine.element_at(window, position) {
                Ok(element) => return Ok((element, ResolveStrategy::ByCoordinates)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Err(AutomationError::ElementNotFound(describe(descriptor)))
    }

    /// Resolve with retry and exponential backoff until the timeout elapses.
    /// If no timeout is provided, uses the resolver's default timeout.
    #[instrument(level = "debug", skip(self, descriptor, timeout))]
    pub async fn resolve(
        &self,
        window: WindowHandle,
        descriptor: &ElementDescriptor,
        mode: ResolveMode,
        timeout: Option<Duration>,
    ) -> Result<Resolution, AutomationError> {
        let effective_timeout = timeout.unwrap_or(self.timeout);
        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.resolve_once(window, descriptor, mode) {
                Ok((element, strategy)) => {
                    let elapsed = start.elapsed();
                    debug!(?strategy, attempts, elapsed_ms = elapsed.as_millis(), "Element resolved");
                    return Ok(Resolution {
                        element,
                        strategy,
                        attempts,
                        elapsed,
                    });
                }
                Err(e) if e.is_not_found() => {
                    let elapsed = start.elapsed();
                    if elapsed >= effective_timeout {
                        return Err(AutomationError::Timeout(format!(
                            "Timed out after {:?} waiting for element {}",
                            effective_timeout,
                            describe(descriptor)
                        )));
                    }
                    let remaining = effective_timeout - elapsed;
                    tokio::time::sleep(backoff.min(remaining)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                // Propagate other errors immediately
                Err(e) => return Err(e),
            }
        }
    }
}

/// Pick among same-class candidates. A candidate is accepted when its text
/// matches the recorded name, when it is the only one of its class, or when
/// it covers the last-known position. Ties go to the one nearest that position.
fn pick_candidate(descriptor: &ElementDescriptor, candidates: Vec<UIElement>) -> Option<UIElement> {
    let only_one = candidates.len() == 1;
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let text_score = match (&descriptor.element_name, &candidate.name) {
                (Some(recorded), Some(name)) => text_match_score(recorded, name),
                _ => 2,
            };
            let covers_position = descriptor
                .position
                .map(|p| candidate.bounds.contains(p))
                .unwrap_or(false);
            if text_score < 2 || only_one || covers_position {
                let distance = descriptor
                    .position
                    .map(|p| p.distance_sq(&candidate.center()))
                    .unwrap_or(0);
                Some((text_score, distance, candidate))
            } else {
                None
            }
        })
        .min_by_key(|(score, distance, _)| (*score, *distance))
        .map(|(_, _, candidate)| candidate)
}

fn describe(descriptor: &ElementDescriptor) -> String {
    let mut parts = Vec::new();
    if let Some(id) = &descriptor.element_id {
        parts.push(format!("id '{id}'"));
    }
    if let Some(class_name) = &descriptor.class_name {
        parts.push(format!("class '{class_name}'"));
    }
    if let Some(name) = &descriptor.element_name {
        parts.push(format!("name '{name}'"));
    }
    if let Some(p) = descriptor.position {
        parts.push(format!("at ({}, {})", p.x, p.y));
    }
    if parts.is_empty() {
        "with no descriptor".to_string()
    } else {
        parts.join(", ")
    }
}
