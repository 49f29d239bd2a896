use super::error::RendererError;

use anyhow::Result;
use log::*;

/// Tracks whether the renderer still owns its device. Every entry point
/// checks it first; teardown flips it exactly once.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Lifecycle {
    destroyed: bool,
}

impl Lifecycle {
    pub fn ensure_alive(&self, operation: &'static str) -> Result<()> {
        if self.destroyed {
            debug!("Rejected `{}` after teardown.", operation);
            Err(RendererError::Destroyed.into())
        } else {
            Ok(())
        }
    }

    /// Returns `true` only for the call that should run teardown.
    pub fn shut_down(&mut self) -> bool {
        if self.destroyed {
            warn!("Renderer already destroyed.");
            return false;
        }
        self.destroyed = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_destroyed_error(result: Result<()>) -> bool {
        matches!(
            result.unwrap_err().downcast_ref::<RendererError>(),
            Some(RendererError::Destroyed)
        )
    }

    #[test]
    fn new_renderer_accepts_every_operation() {
        let lifecycle = Lifecycle::default();
        for operation in ["render", "load_model", "load_texture", "update_model_transform"] {
            assert!(lifecycle.ensure_alive(operation).is_ok());
        }
    }

    #[test]
    fn operations_after_teardown_are_rejected() {
        let mut lifecycle = Lifecycle::default();
        assert!(lifecycle.shut_down());

        for operation in ["render", "load_model", "load_texture", "update_model_transform"] {
            assert!(is_destroyed_error(lifecycle.ensure_alive(operation)));
        }
    }

    #[test]
    fn second_teardown_changes_nothing() {
        let mut lifecycle = Lifecycle::default();
        assert!(lifecycle.shut_down());
        let after_first = lifecycle;

        assert!(!lifecycle.shut_down());
        assert_eq!(lifecycle, after_first);
        assert!(is_destroyed_error(lifecycle.ensure_alive("render")));
    }
}
