// WebSocket client plumbing: upgrade handshake and frame codec.

pub mod frame;
pub mod handshake;
