// mvm-test-utils: A mock mesh gateway for integration testing.
//
// Runs a real WebSocket server (tokio-tungstenite) speaking the envelope
// protocol, so the hand-rolled client codec is exercised against an
// independent RFC 6455 implementation.

mod mock_gateway;

pub use mock_gateway::MockGateway;
