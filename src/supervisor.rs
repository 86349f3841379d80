//! Service supervisor integration.
//!
//! On Podman, restarts of a container can be owned by an init-system unit
//! rather than by the engine. The reconciler reaches that unit through
//! [`ServiceSupervisor`]; drift of the unit file itself counts as drift of
//! the container.

use async_trait::async_trait;

/// Init-system unit wrapping one container.
///
/// Every operation reports success as a boolean; the caller decides whether
/// a failure is fatal or has a fallback.
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    /// Returns true if the unit file on disk differs from the one that
    /// would be generated now.
    async fn check_unit_changed(&self, name: &str) -> bool;

    /// Writes the unit file. Returns true if it changed.
    async fn create_unit(&self, name: &str) -> bool;

    /// Removes the unit file. Returns true if one was removed.
    async fn remove_unit(&self, name: &str) -> bool;

    async fn start(&self, name: &str) -> bool;

    async fn stop(&self, name: &str) -> bool;

    async fn restart(&self, name: &str) -> bool;
}

/// Supervisor for engines that manage restarts themselves.
///
/// Never reports unit drift; lifecycle calls succeed without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSupervisor;

#[async_trait]
impl ServiceSupervisor for NoopSupervisor {
    async fn check_unit_changed(&self, _name: &str) -> bool {
        false
    }

    async fn create_unit(&self, _name: &str) -> bool {
        false
    }

    async fn remove_unit(&self, _name: &str) -> bool {
        false
    }

    async fn start(&self, _name: &str) -> bool {
        true
    }

    async fn stop(&self, _name: &str) -> bool {
        true
    }

    async fn restart(&self, _name: &str) -> bool {
        true
    }
}
