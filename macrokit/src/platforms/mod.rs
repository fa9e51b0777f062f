use crate::{AutomationError, InputAction, Position, UIElement, WindowHandle};
use std::time::Duration;

pub mod headless;

pub use headless::HeadlessEngine;

/// The common trait every engine backing the recorder and the player must
/// implement. Implementations wrap the platform's UI inspection and input
/// synthesis primitives.
#[async_trait::async_trait]
pub trait AutomationEngine: Send + Sync {
    /// Find the element with the given automation id inside the window
    fn find_by_id(&self, window: WindowHandle, id: &str) -> Result<UIElement, AutomationError>;

    /// Find every element of a control class inside the window
    fn find_by_class(
        &self,
        window: WindowHandle,
        class_name: &str,
    ) -> Result<Vec<UIElement>, AutomationError>;

    /// Get the topmost element under a screen position
    fn element_at(&self, window: WindowHandle, position: Position) -> Result<UIElement, AutomationError>;

    /// Get the element holding keyboard focus in the window
    fn focused_element(&self, window: WindowHandle) -> Result<UIElement, AutomationError>;

    /// Deliver synthesized input to an element
    fn synthesize(
        &self,
        window: WindowHandle,
        element: &UIElement,
        action: &InputAction,
    ) -> Result<(), AutomationError>;

    /// Visually flash an element
    fn highlight(&self, element: &UIElement, duration: Duration) -> Result<(), AutomationError>;

    /// A value that changes whenever the window's observable UI state changes
    fn state_fingerprint(&self, window: WindowHandle) -> Result<u64, AutomationError>;

    /// Wait until the window's application has processed pending input.
    /// Engines without such a signal return immediately.
    async fn wait_for_input_idle(
        &self,
        window: WindowHandle,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        let _ = (window, timeout);
        Ok(())
    }
}
