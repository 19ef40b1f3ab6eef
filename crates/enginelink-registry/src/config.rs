//! Registry configuration.

use enginelink_core::DefectPolicy;

/// Configuration for a [`HandleRegistry`](crate::HandleRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// What to do when an ownership defect is detected.
    pub on_defect: DefectPolicy,
    /// Slots reserved up front.
    pub initial_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            on_defect: DefectPolicy::default(),
            initial_capacity: 256,
        }
    }
}

impl RegistryConfig {
    pub fn with_on_defect(mut self, policy: DefectPolicy) -> Self {
        self.on_defect = policy;
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}
