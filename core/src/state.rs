use crate::api::ApiClient;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Top-level areas of the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    #[default]
    Chat,
    History,
    Videos,
    Billing,
}

/// Client-wide view state: connectivity and the section being shown.
///
/// Created once at startup and handed to whoever needs it.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<InnerState>>,
}

struct InnerState {
    connected: bool,
    section: Section,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(InnerState {
                connected: true,
                section: Section::default(),
            })),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().connected
    }

    pub fn set_connection_status(&self, connected: bool) {
        let mut inner = self.inner.write();
        if inner.connected != connected {
            tracing::info!(connected, "connection status changed");
        }
        inner.connected = connected;
    }

    pub fn current_section(&self) -> Section {
        self.inner.read().section
    }

    pub fn show_section(&self, section: Section) {
        self.inner.write().section = section;
    }

    /// Ask the service for its health and record the answer.
    pub async fn refresh_connection(&self, api: &ApiClient) -> bool {
        let healthy = api.check_health().await;
        self.set_connection_status(healthy);
        healthy
    }
}
