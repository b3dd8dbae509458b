//! State-change notification intake and fan-out
//!
//! The remote service pushes state-change notifications; the session
//! controller synthesizes its own when it has to assume an outcome. Both
//! feed the same intake here, exactly as they share one broadcast channel on
//! the service side. Valid changes are presented to the UI and republished
//! to subscribers; a transition to connected also triggers the homepage
//! load.

use crate::state::{ErrorCode, StateChange, VpnState};
use crate::ui::UiEvents;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error};

/// Wire form of a state-change notification, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStateChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

impl RawStateChange {
    /// Well-formed notification, as synthesized by the session controller.
    pub fn new(profile_name: &str, state: VpnState, error: Option<ErrorCode>) -> Self {
        Self {
            profile_name: Some(profile_name.to_string()),
            state: Some(state.as_str().to_string()),
            error_code: error.map(ErrorCode::code),
        }
    }
}

/// Receiver half of the validated state-change fan-out.
pub struct Subscription {
    changes: broadcast::Receiver<StateChange>,
}

impl Subscription {
    /// Next validated state change. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<StateChange> {
        loop {
            match self.changes.recv().await {
                Ok(change) => return Some(change),
                // Skipped messages are acceptable: state is a mirror, and a
                // fresh change supersedes whatever was missed.
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("subscription lagged, skipped {missed} changes");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Tear the subscription down. Consumes the value, so a second
    /// unregistration cannot be expressed.
    pub fn unsubscribe(self) {
        debug!("state-change subscription closed");
    }
}

/// Validates raw notifications and fans the surviving ones out.
pub struct EventBus {
    intake_rx: mpsc::UnboundedReceiver<RawStateChange>,
    publish: broadcast::Sender<StateChange>,
    ui: Arc<dyn UiEvents>,
}

impl EventBus {
    /// Returns the bus and the intake handle for notification producers (the
    /// remote push stream and the session controller). The bus runs until
    /// every producer handle is gone.
    pub fn new(ui: Arc<dyn UiEvents>) -> (Self, mpsc::UnboundedSender<RawStateChange>) {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (publish, _) = broadcast::channel(16);
        (
            Self {
                intake_rx,
                publish,
                ui,
            },
            intake_tx,
        )
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            changes: self.publish.subscribe(),
        }
    }

    /// Consume the intake until every sender is gone.
    pub async fn run(mut self) {
        while let Some(raw) = self.intake_rx.recv().await {
            self.deliver(raw);
        }
        debug!("state-change intake drained");
    }

    fn deliver(&self, raw: RawStateChange) {
        // A notification that names no profile is not addressed to anyone.
        let Some(profile_name) = raw.profile_name else {
            return;
        };

        let Some(state) = raw.state.as_deref().and_then(|s| s.parse::<VpnState>().ok()) else {
            error!("dropping state change for {profile_name:?} with missing or unknown state");
            return;
        };

        let change = StateChange {
            profile_name,
            state,
            error: raw.error_code.and_then(ErrorCode::from_code),
        };

        self.ui.state_changed(&change);

        if change.state == VpnState::Connected {
            let ui = Arc::clone(&self.ui);
            tokio::spawn(async move {
                ui.load_homepage().await;
            });
        }

        // No subscribers is fine; the UI presentation above already happened.
        let _ = self.publish.send(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingUi {
        toasts: Mutex<Vec<StateChange>>,
        homepage_loads: AtomicUsize,
    }

    #[async_trait]
    impl UiEvents for RecordingUi {
        fn state_changed(&self, change: &StateChange) {
            self.toasts.lock().unwrap().push(change.clone());
        }

        async fn load_homepage(&self) {
            self.homepage_loads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bus() -> (EventBus, mpsc::UnboundedSender<RawStateChange>, Arc<RecordingUi>) {
        let ui = Arc::new(RecordingUi::default());
        let (bus, intake) = EventBus::new(Arc::clone(&ui) as Arc<dyn UiEvents>);
        (bus, intake, ui)
    }

    /// Let spawned side-effect tasks run on the current-thread runtime.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn raw(profile: Option<&str>, state: Option<&str>, code: Option<i32>) -> RawStateChange {
        RawStateChange {
            profile_name: profile.map(str::to_string),
            state: state.map(str::to_string),
            error_code: code,
        }
    }

    #[tokio::test]
    async fn test_notification_without_profile_name_has_no_effect() {
        let (bus, _intake, ui) = bus();
        let mut sub = bus.subscribe();

        bus.deliver(raw(None, Some("connected"), None));
        settle().await;

        assert!(ui.toasts.lock().unwrap().is_empty());
        assert_eq!(ui.homepage_loads.load(Ordering::SeqCst), 0);
        assert!(matches!(
            sub.changes.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_notification_with_unknown_state_is_dropped() {
        let (bus, _intake, ui) = bus();

        bus.deliver(raw(Some("work"), Some("warming-up"), None));
        bus.deliver(raw(Some("work"), None, None));
        settle().await;

        assert!(ui.toasts.lock().unwrap().is_empty());
        assert_eq!(ui.homepage_loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_notification_is_presented_and_republished() {
        let (bus, _intake, ui) = bus();
        let mut sub = bus.subscribe();

        bus.deliver(raw(Some("work"), Some("idle"), Some(101)));

        let change = sub.next().await.unwrap();
        assert_eq!(change.profile_name, "work");
        assert_eq!(change.state, VpnState::Idle);
        assert_eq!(change.error, Some(ErrorCode::ConnectionFailed));

        let toasts = ui.toasts.lock().unwrap();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0], change);
    }

    #[tokio::test]
    async fn test_unknown_error_code_is_stripped() {
        let (bus, _intake, _ui) = bus();
        let mut sub = bus.subscribe();

        bus.deliver(raw(Some("work"), Some("connecting"), Some(999)));

        let change = sub.next().await.unwrap();
        assert_eq!(change.state, VpnState::Connecting);
        assert_eq!(change.error, None);
    }

    #[tokio::test]
    async fn test_connected_loads_homepage_once_per_notification() {
        let (bus, _intake, ui) = bus();

        bus.deliver(raw(Some("work"), Some("connected"), None));
        bus.deliver(raw(Some("work"), Some("connected"), None));
        settle().await;

        assert_eq!(ui.homepage_loads.load(Ordering::SeqCst), 2);
        assert_eq!(ui.toasts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_consumes_intake_until_senders_drop() {
        let (bus, sender, ui) = bus();
        let mut sub = bus.subscribe();
        let worker = tokio::spawn(bus.run());

        sender
            .send(RawStateChange::new("work", VpnState::Disconnecting, None))
            .unwrap();
        let change = sub.next().await.unwrap();
        assert_eq!(change.state, VpnState::Disconnecting);
        assert_eq!(ui.toasts.lock().unwrap().len(), 1);

        drop(sender);
        worker.await.unwrap();
    }
}
