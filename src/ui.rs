//! User-facing presentation of session events

use crate::state::StateChange;
use async_trait::async_trait;
use tracing::{info, warn};

/// Boundary to whatever presents session state to the user.
#[async_trait]
pub trait UiEvents: Send + Sync {
    /// Present a resolved state transition.
    fn state_changed(&self, change: &StateChange);

    /// Load the default resource once the tunnel is up. Runs on its own
    /// task, off the notification-delivery context.
    async fn load_homepage(&self);
}

/// Console presentation: one line per state change, and an HTTP fetch of the
/// configured homepage standing in for the post-connection page load.
pub struct ConsoleUi {
    homepage: String,
    http: reqwest::Client,
}

impl ConsoleUi {
    pub fn new(homepage: impl Into<String>) -> Self {
        Self {
            homepage: homepage.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl UiEvents for ConsoleUi {
    fn state_changed(&self, change: &StateChange) {
        match change.error {
            Some(code) => println!("VPN {}: {} ({})", change.profile_name, change.state, code),
            None => println!("VPN {}: {}", change.profile_name, change.state),
        }
    }

    async fn load_homepage(&self) {
        info!("tunnel is up, loading {}", self.homepage);
        match self.http.get(&self.homepage).send().await {
            Ok(response) => info!("homepage responded: HTTP {}", response.status()),
            Err(e) => warn!("homepage load failed: {e}"),
        }
    }
}
