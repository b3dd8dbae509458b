//! Binding lifecycle for the out-of-process VPN service
//!
//! The service has no synchronous call surface. Reaching it means requesting
//! a binding, waiting for the binding to become ready, and invoking
//! operations on the capability it yields. Per bind request exactly one of
//! ready/lost is delivered; after that the capability stays usable until the
//! binding is released or the service drops it.
//!
//! The concrete transport is a local TCP connection speaking one JSON object
//! per line. Each binding is its own connection; a dedicated connection
//! carries the pushed state-change stream (see [`pump_events`]).

use crate::events::RawStateChange;
use crate::profile::VpnProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufStream};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Fault raised by an operation on a bound capability.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("service I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid service message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("service rejected request: {0}")]
    Rejected(String),

    #[error("service closed the connection")]
    Closed,
}

/// Operation surface exposed by the service once a binding is ready.
#[async_trait]
pub trait VpnControl: Send + Sync {
    /// Ask the service to establish the tunnel. A `true` return means the
    /// request was accepted for processing, not that the tunnel is up;
    /// completion arrives later on the state-change stream.
    async fn connect(
        &self,
        profile: &VpnProfile,
        username: &str,
        password: &str,
    ) -> Result<bool, RemoteError>;

    /// Ask the service to tear the tunnel down.
    async fn disconnect(&self) -> Result<(), RemoteError>;

    /// Ask the service to re-broadcast the current state for `profile`. The
    /// result arrives on the state-change stream, not as a return value.
    async fn check_status(&self, profile: &VpnProfile) -> Result<(), RemoteError>;
}

/// Lifecycle event for one bind request. At most one is delivered.
pub enum BindEvent {
    /// The binding is live; the capability is usable until release.
    Ready(Arc<dyn VpnControl>),
    /// The binding went away before (or instead of) becoming ready.
    Lost,
}

/// One in-flight bind request.
///
/// Valid from request until [`Binding::release`]; never reused across
/// operations. Dropping the handle releases it, so a binding cannot outlive
/// the operation that requested it.
pub struct Binding {
    events: mpsc::UnboundedReceiver<BindEvent>,
    released: Arc<AtomicBool>,
}

impl Binding {
    /// Wrap a lifecycle-event channel. Gateway implementations create the
    /// channel pair and deliver exactly one [`BindEvent`] on it.
    pub fn new(events: mpsc::UnboundedReceiver<BindEvent>) -> Self {
        Self {
            events,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that flips once this binding has been released. Gateway
    /// implementations may poll it to abandon late deliveries.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    /// Wait for the lifecycle event. A released or abandoned binding reads
    /// as [`BindEvent::Lost`].
    pub async fn event(&mut self) -> BindEvent {
        self.events.recv().await.unwrap_or(BindEvent::Lost)
    }

    /// Release the binding. Idempotent; safe to call at any point of the
    /// lifecycle, including before the lifecycle event has been delivered.
    pub fn release(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            debug!("binding released");
        }
        self.events.close();
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.release();
    }
}

/// Entry point for obtaining bindings to the service.
pub trait ServiceGateway: Send + Sync {
    /// Attempt to queue a bind request.
    ///
    /// `None` is the synchronous failure: the request could not even be
    /// queued. Otherwise exactly one of ready/lost arrives later on the
    /// returned binding.
    fn request_binding(&self) -> Option<Binding>;
}

// Wire protocol: one JSON object per line in each direction.

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Connect {
        profile: &'a VpnProfile,
        username: &'a str,
        password: &'a str,
    },
    Disconnect,
    CheckStatus {
        profile: &'a VpnProfile,
    },
    Subscribe,
}

#[derive(Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    accepted: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Capability backed by one service connection.
struct RemoteControl {
    stream: Mutex<BufStream<TcpStream>>,
}

impl RemoteControl {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(BufStream::new(stream)),
        }
    }

    async fn call(&self, request: Request<'_>) -> Result<Response, RemoteError> {
        let mut stream = self.stream.lock().await;

        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        stream.write_all(&line).await?;
        stream.flush().await?;

        let mut reply = String::new();
        let n = stream.read_line(&mut reply).await?;
        if n == 0 {
            return Err(RemoteError::Closed);
        }

        let response: Response = serde_json::from_str(reply.trim())?;
        if !response.ok {
            return Err(RemoteError::Rejected(
                response.error.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl VpnControl for RemoteControl {
    async fn connect(
        &self,
        profile: &VpnProfile,
        username: &str,
        password: &str,
    ) -> Result<bool, RemoteError> {
        let response = self
            .call(Request::Connect {
                profile,
                username,
                password,
            })
            .await?;
        Ok(response.accepted)
    }

    async fn disconnect(&self) -> Result<(), RemoteError> {
        self.call(Request::Disconnect).await?;
        Ok(())
    }

    async fn check_status(&self, profile: &VpnProfile) -> Result<(), RemoteError> {
        self.call(Request::CheckStatus { profile }).await?;
        Ok(())
    }
}

/// Gateway to a service listening on a local TCP address.
pub struct TcpGateway {
    address: String,
}

impl TcpGateway {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl ServiceGateway for TcpGateway {
    fn request_binding(&self) -> Option<Binding> {
        // Address must be a concrete socket address; anything else cannot be
        // queued and is rejected synchronously.
        let address: std::net::SocketAddr = match self.address.parse() {
            Ok(address) => address,
            Err(_) => {
                warn!("cannot bind VPN service: invalid address {:?}", self.address);
                return None;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let binding = Binding::new(rx);
        let released = binding.released_flag();

        tokio::spawn(async move {
            match TcpStream::connect(address).await {
                Ok(stream) if !released.load(Ordering::SeqCst) => {
                    debug!("service connection ready");
                    let _ = tx.send(BindEvent::Ready(Arc::new(RemoteControl::new(stream))));
                }
                Ok(_) => {
                    debug!("binding released before the service connection completed");
                }
                Err(e) => {
                    debug!("service connection failed: {e}");
                    let _ = tx.send(BindEvent::Lost);
                }
            }
        });

        Some(binding)
    }
}

/// Subscribe to the service's pushed state-change stream and forward each
/// message into `events`. Returns once the stream ends or the receiving side
/// goes away. Malformed JSON lines are skipped; field-level validation is the
/// receiver's job.
pub async fn pump_events(
    address: &str,
    events: mpsc::UnboundedSender<RawStateChange>,
) -> Result<(), RemoteError> {
    let stream = TcpStream::connect(address).await?;
    let (read_half, mut write_half) = stream.into_split();

    let mut request = serde_json::to_vec(&Request::Subscribe)?;
    request.push(b'\n');
    write_half.write_all(&request).await?;
    write_half.flush().await?;

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<RawStateChange>(&line) {
            Ok(raw) => {
                if events.send(raw).is_err() {
                    break;
                }
            }
            Err(e) => warn!("skipping undecodable state change: {e}"),
        }
    }
    debug!("state-change stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::TunnelProtocol;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn profile() -> VpnProfile {
        VpnProfile::new("work", "vpn.example.com", TunnelProtocol::Pptp)
    }

    /// One accepted connection answering every request with `reply`.
    async fn spawn_service(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                write_half.write_all(reply.as_bytes()).await.unwrap();
                write_half.write_all(b"\n").await.unwrap();
            }
        });
        address
    }

    #[tokio::test]
    async fn test_capability_calls_over_loopback() {
        let address = spawn_service(r#"{"ok":true,"accepted":true}"#).await;
        let gateway = TcpGateway::new(address);

        let mut binding = gateway.request_binding().expect("bind request queued");
        let BindEvent::Ready(control) = binding.event().await else {
            panic!("expected ready");
        };

        assert!(control.connect(&profile(), "alice", "secret").await.unwrap());
        control.check_status(&profile()).await.unwrap();
        control.disconnect().await.unwrap();

        binding.release();
        assert!(binding.released_flag().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_rejected_response_maps_to_remote_error() {
        let address = spawn_service(r#"{"ok":false,"error":"busy"}"#).await;
        let gateway = TcpGateway::new(address);

        let mut binding = gateway.request_binding().unwrap();
        let BindEvent::Ready(control) = binding.event().await else {
            panic!("expected ready");
        };

        match control.disconnect().await {
            Err(RemoteError::Rejected(reason)) => assert_eq!(reason, "busy"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bind_lost_when_service_absent() {
        // Grab a free port, then close the listener so connects are refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let gateway = TcpGateway::new(address);
        let mut binding = gateway.request_binding().unwrap();
        assert!(matches!(binding.event().await, BindEvent::Lost));
    }

    #[test]
    fn test_invalid_address_is_rejected_synchronously() {
        let gateway = TcpGateway::new("not-an-address");
        assert!(gateway.request_binding().is_none());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut binding = Binding::new(rx);
        let released = binding.released_flag();

        binding.release();
        binding.release();
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_abandoned_binding_reads_as_lost() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut binding = Binding::new(rx);
        drop(tx);
        assert!(matches!(binding.event().await, BindEvent::Lost));
    }

    #[tokio::test]
    async fn test_pump_events_forwards_decodable_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            // Wait for the subscribe request before pushing.
            let first = lines.next_line().await.unwrap().unwrap();
            assert!(first.contains("subscribe"));

            write_half
                .write_all(b"{\"profile_name\":\"work\",\"state\":\"connected\"}\n")
                .await
                .unwrap();
            write_half.write_all(b"not json\n").await.unwrap();
            write_half
                .write_all(b"{\"state\":\"idle\",\"error_code\":101}\n")
                .await
                .unwrap();
            // Connection closes when write_half drops; pump sees EOF.
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        pump_events(&address, tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.profile_name.as_deref(), Some("work"));
        assert_eq!(first.state.as_deref(), Some("connected"));

        // The garbage line is skipped, not forwarded.
        let second = rx.recv().await.unwrap();
        assert_eq!(second.profile_name, None);
        assert_eq!(second.error_code, Some(101));

        assert!(rx.recv().await.is_none());
    }
}
