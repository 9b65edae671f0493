//! BFT-3P configuration.

use std::time::Duration;

/// Per-node BFT-3P parameters.
#[derive(Debug, Clone)]
pub struct BftConfig {
    /// How long a backup waits without protocol activity before voting to
    /// depose the primary.
    pub view_change_timeout: Duration,
    /// Byzantine test mode: tamper pre-prepare digests, equivocate
    /// prepares, withhold commits. Never enable outside tests.
    pub byzantine: bool,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            view_change_timeout: Duration::from_secs(5),
            byzantine: false,
        }
    }
}

impl BftConfig {
    /// A config with byzantine mode switched on.
    pub fn byzantine_mode() -> Self {
        Self {
            byzantine: true,
            ..Self::default()
        }
    }
}
