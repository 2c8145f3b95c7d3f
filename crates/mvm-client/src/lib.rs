// mvm-client: MudVault Mesh client core.
//
// Connects an embedding MUD to the mesh gateway over WebSocket, speaks the
// JSON envelope protocol, and drives the player-facing command surface.
// The host implements `host::HostAdapter`; everything else lives here.
//
// Modules are public so integration tests can drive the internals with
// synthetic transports.

pub mod channels;
pub mod client;
pub mod commands;
pub mod config;
pub mod correlate;
pub mod directory;
pub mod error;
pub mod history;
pub mod host;
pub mod rate;
pub mod router;
pub mod session;
pub mod state;
pub mod ws;

pub use client::{Core, MeshClient};
pub use config::{MeshConfig, load_config_from_path, load_config_from_str};
pub use error::MeshError;
pub use host::{Capability, DeliveryStyle, FingerInfo, HostAdapter, LocalUser, LogLevel};
pub use state::LinkState;
