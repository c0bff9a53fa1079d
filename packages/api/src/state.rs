// ABOUTME: Application state shared across all API handlers

use mentis_runtime::{Hub, SandboxManager, SpaceRegistry};
use std::sync::Arc;

/// Shared handler state: the manager owns sandboxes, the registry owns
/// spaces, the hub owns subscriptions.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SandboxManager>,
    pub spaces: Arc<SpaceRegistry>,
    pub hub: Arc<Hub>,
}

impl AppState {
    pub fn new(manager: Arc<SandboxManager>, spaces: Arc<SpaceRegistry>, hub: Arc<Hub>) -> Self {
        Self {
            manager,
            spaces,
            hub,
        }
    }
}
