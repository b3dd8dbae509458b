//! vpnconnect - Client-side session control for an out-of-process VPN service
//!
//! The VPN service itself (tunnel establishment, crypto, routing) runs in a
//! separate process and is reached only through an asynchronous binding
//! handshake; there is no synchronous call surface. This crate is the client
//! half: it binds to the service, issues connect / disconnect / status-check
//! requests, and mirrors the state changes the service broadcasts.
//!
//! # Architecture
//!
//! - `profile`: VPN endpoint description and transient credentials
//! - `state`: mirrored connection state and failure codes
//! - `gateway`: binding lifecycle and the capability surface of the service
//! - `controller`: connect / disconnect / status-check sequencing
//! - `events`: state-change notification intake, validation, and fan-out
//! - `ui`: user-facing presentation, homepage load once connected
//! - `config`: configuration file handling (TOML)

pub mod config;
pub mod controller;
pub mod events;
pub mod gateway;
pub mod profile;
pub mod state;
pub mod ui;

pub use config::Config;
pub use controller::VpnController;
pub use events::EventBus;
pub use profile::{Credentials, VpnProfile};
pub use state::VpnState;
