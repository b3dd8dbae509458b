//! Session orchestration against the remote VPN service
//!
//! Sequences connect / disconnect / status-check through the gateway. Each
//! operation obtains its own binding, invokes one remote call, and releases
//! the binding; nothing is held open across calls, and no operation is
//! retried. Outcomes the controller has to assume (rather than learn from
//! the service) are broadcast as synthesized state changes through the same
//! notification intake the service feeds.
//!
//! Operations may overlap: calling connect and then disconnect immediately
//! can race at the service, which serializes or rejects overlapping session
//! work itself. Reconciliation via [`VpnController::check_status`] recovers
//! the truth afterwards.

use crate::events::RawStateChange;
use crate::gateway::{BindEvent, ServiceGateway};
use crate::profile::{Credentials, VpnProfile};
use crate::state::{ErrorCode, VpnState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, warn};

/// How long a status check waits for its binding to come up.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_millis(1000);

/// Drives one profile's session against the service.
#[derive(Clone)]
pub struct VpnController {
    profile: Arc<VpnProfile>,
    gateway: Arc<dyn ServiceGateway>,
    broadcasts: mpsc::UnboundedSender<RawStateChange>,
    status_timeout: Duration,
}

impl VpnController {
    pub fn new(
        profile: VpnProfile,
        gateway: Arc<dyn ServiceGateway>,
        broadcasts: mpsc::UnboundedSender<RawStateChange>,
        status_timeout: Duration,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            gateway,
            broadcasts,
            status_timeout,
        }
    }

    pub fn profile(&self) -> &VpnProfile {
        &self.profile
    }

    fn broadcast(&self, state: VpnState, error: Option<ErrorCode>) {
        let _ = self
            .broadcasts
            .send(RawStateChange::new(&self.profile.name, state, error));
    }

    /// Request a tunnel for the profile.
    ///
    /// Returns as soon as the bind request is queued; the remote call runs on
    /// a spawned task once the binding is ready. A rejected bind request, a
    /// binding lost before the call, or a faulted call each produce exactly
    /// one idle/connection-failed broadcast. The service accepting the
    /// request says nothing about the tunnel coming up; completion arrives
    /// on the notification stream.
    pub fn connect(&self, credentials: Credentials) {
        let Some(mut binding) = self.gateway.request_binding() else {
            self.broadcast(VpnState::Idle, Some(ErrorCode::ConnectionFailed));
            return;
        };

        let this = self.clone();
        tokio::spawn(async move {
            match binding.event().await {
                BindEvent::Ready(control) => {
                    let result = control
                        .connect(&this.profile, &credentials.username, &credentials.password)
                        .await;
                    match result {
                        Ok(true) => debug!("connect request accepted"),
                        Ok(false) => warn!("connect request not accepted"),
                        Err(e) => {
                            error!("remote connect failed: {e}");
                            this.broadcast(VpnState::Idle, Some(ErrorCode::ConnectionFailed));
                        }
                    }
                    binding.release();
                }
                BindEvent::Lost => {
                    this.broadcast(VpnState::Idle, Some(ErrorCode::ConnectionFailed));
                    binding.release();
                }
            }
        });
    }

    /// Tear the tunnel down.
    ///
    /// Returns immediately. Failure to reach the service (rejected bind,
    /// lost binding, or a faulted remote call) is never broadcast directly;
    /// it falls back to [`VpnController::check_status`] and defers to
    /// whatever that discovers.
    pub fn disconnect(&self) {
        let Some(mut binding) = self.gateway.request_binding() else {
            let this = self.clone();
            tokio::spawn(async move { this.check_status().await });
            return;
        };

        let this = self.clone();
        tokio::spawn(async move {
            match binding.event().await {
                BindEvent::Ready(control) => {
                    let result = control.disconnect().await;
                    binding.release();
                    match result {
                        Ok(()) => debug!("disconnect requested"),
                        Err(e) => {
                            error!("remote disconnect failed: {e}");
                            this.check_status().await;
                        }
                    }
                }
                BindEvent::Lost => {
                    binding.release();
                    this.check_status().await;
                }
            }
        });
    }

    /// Ask the service to re-broadcast the profile's current state.
    ///
    /// The only operation that blocks its caller, and only up to the
    /// configured window. The wait is satisfied when the binding becomes
    /// ready, not when the refreshed state has actually arrived on the
    /// notification stream, so a normal return means "the status request
    /// was placed", at best. When the state cannot be requested at all
    /// (rejected bind, lost binding, faulted call, or an expired wait), idle
    /// is broadcast as the conservative answer: if we cannot find out,
    /// assume disconnected.
    pub async fn check_status(&self) {
        let Some(mut binding) = self.gateway.request_binding() else {
            self.broadcast(VpnState::Idle, None);
            return;
        };

        match time::timeout(self.status_timeout, binding.event()).await {
            Ok(BindEvent::Ready(control)) => {
                if let Err(e) = control.check_status(&self.profile).await {
                    error!("remote status check failed: {e}");
                    self.broadcast(VpnState::Idle, None);
                }
                binding.release();
            }
            Ok(BindEvent::Lost) => {
                self.broadcast(VpnState::Idle, None);
                binding.release();
            }
            Err(_) => {
                debug!(
                    "status check timed out after {:?}, assuming disconnected",
                    self.status_timeout
                );
                self.broadcast(VpnState::Idle, None);
                binding.release();
            }
        }
    }
}
