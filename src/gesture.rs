//! Pointer gesture context handed to every interaction handler.

/// Modifier and concurrency state of the gesture being handled.
///
/// Holding the interaction modifier turns a pointer gesture into a navigation gesture
/// (click-to-focus, drill-down); without it, the same gesture rearranges the diagram (drag).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GestureContext {
    /// Whether the interaction modifier (shift) is held
    pub modifier: bool,
    /// Whether another drag gesture is already in progress
    pub active: bool,
}

impl GestureContext {
    /// A plain gesture: rearranges, nothing else in flight.
    pub fn rearrange() -> Self {
        Self::default()
    }

    /// A gesture with the interaction modifier held.
    pub fn navigate() -> Self {
        Self {
            modifier: true,
            active: false,
        }
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Drag gestures proceed only without the modifier.
    pub fn allows_rearrange(&self) -> bool {
        !self.modifier
    }

    /// Click gestures proceed only with the modifier.
    pub fn allows_navigate(&self) -> bool {
        self.modifier
    }
}
