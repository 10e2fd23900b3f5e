//! Explicit logging context for GPU components.
//!
//! Components receive a [`Diagnostics`] at construction and log through it, so
//! every message carries the component that produced it and the subscriber is
//! chosen by whoever builds the renderer.

use ash::prelude::VkResult;
use tracing::Span;

/// Logging context handed to GPU components.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    span: Span,
}

impl Diagnostics {
    /// Create a root context for a named component.
    pub fn new(component: &'static str) -> Self {
        Self {
            span: tracing::info_span!("sprig", component),
        }
    }

    /// Create a context for a sub-component, nested under this one.
    pub fn child(&self, component: &'static str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "sprig", component),
        }
    }

    /// Context that discards its span, for tests and tools.
    pub fn disabled() -> Self {
        Self { span: Span::none() }
    }

    /// The span all records of this component are attached to.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `f` with this component's span entered.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        self.span.in_scope(f)
    }

    /// Log a non-success device status and continue.
    ///
    /// Use for calls whose failure is not immediately consumed by a dependent
    /// operation. Returns the value on success.
    pub fn check<T>(&self, what: &str, result: VkResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(status) => {
                self.in_scope(|| tracing::warn!(?status, "{what} failed"));
                None
            }
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new("gpu")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn check_passes_values_through() {
        let diag = Diagnostics::disabled();
        assert_eq!(diag.check("noop", Ok(7)), Some(7));
    }

    #[test]
    fn check_swallows_errors() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        tracing::subscriber::with_default(subscriber, || {
            let diag = Diagnostics::new("test").child("queue");
            let result: VkResult<()> = Err(vk::Result::ERROR_DEVICE_LOST);
            assert_eq!(diag.check("queue_wait_idle", result), None);
        });
    }
}
