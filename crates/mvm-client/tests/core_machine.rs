//! State machine tests driving `Core` directly with a duplex transport and
//! explicit instants: auth promotion, heartbeat liveness, the reconnect
//! attempt cap, and request/response correlation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{StubHost, test_config};
use mvm_client::commands::Command;
use mvm_client::ws::frame::{self, OpCode};
use mvm_client::{Core, LinkState};
use mvm_protocol::builders::{self, EnvelopeBuilder, WhoEntry};
use mvm_protocol::{Address, Envelope, MessageKind};
use tokio::io::DuplexStream;
use tokio::time::Instant;

const SEC: Duration = Duration::from_secs(1);

/// Read one text frame off the gateway side of the duplex pipe.
async fn read_envelope(gateway_side: &mut DuplexStream) -> Envelope {
    let frame = frame::read_frame(gateway_side, 8192).await.unwrap();
    assert_eq!(frame.opcode, OpCode::Text);
    Envelope::parse(std::str::from_utf8(&frame.payload).unwrap()).unwrap()
}

fn auth_success() -> Envelope {
    let wire = EnvelopeBuilder::new(
        MessageKind::Auth,
        Address::mud("Gateway"),
        Address::mud("Alpha"),
    )
    .payload_str("status", "success")
    .build();
    Envelope::parse(&wire).unwrap()
}

/// A core taken through transport attach and auth, plus the gateway end of
/// its pipe and the instant it authenticated at.
async fn authed_core(host: Arc<StubHost>) -> (Core, DuplexStream, Instant) {
    let (core_side, mut gateway_side) = tokio::io::duplex(16384);
    let (mut core, _state_rx) = Core::new(test_config("Alpha", "127.0.0.1", 1), host);
    let t0 = Instant::now();
    core.attach_transport(core_side);
    core.start_auth(t0).await;

    let auth = read_envelope(&mut gateway_side).await;
    assert_eq!(auth.kind, MessageKind::Auth);
    assert_eq!(core.state(), LinkState::Authenticating);

    let outbound = core.dispatch(&auth_success(), t0);
    assert!(outbound.is_empty());
    assert_eq!(core.state(), LinkState::Authenticated);
    (core, gateway_side, t0)
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auth_success_promotes_and_resets_failures() {
    let host = StubHost::new(vec![]);
    let (core, _gateway, _t0) = authed_core(host).await;
    assert_eq!(core.failed_attempts(), 0);
}

#[tokio::test]
async fn auth_error_envelope_is_a_failed_attempt() {
    let host = StubHost::new(vec![]);
    let (core_side, _gateway_side) = tokio::io::duplex(16384);
    let (mut core, _state_rx) = Core::new(test_config("Alpha", "127.0.0.1", 1), host);
    let t0 = Instant::now();
    core.attach_transport(core_side);
    core.start_auth(t0).await;

    let wire = builders::error(
        "Gateway",
        Address::mud("Alpha"),
        "auth-failed",
        "invalid token",
    )
    .build();
    core.dispatch(&Envelope::parse(&wire).unwrap(), t0);
    assert_eq!(core.state(), LinkState::Disconnected);
    assert_eq!(core.failed_attempts(), 1);
}

#[tokio::test]
async fn auth_timeout_tears_down() {
    let host = StubHost::new(vec![]);
    let (core_side, _gateway_side) = tokio::io::duplex(16384);
    let (mut core, _state_rx) = Core::new(test_config("Alpha", "127.0.0.1", 1), host);
    let t0 = Instant::now();
    core.attach_transport(core_side);
    core.start_auth(t0).await;

    core.on_tick(t0 + 29 * SEC).await;
    assert_eq!(core.state(), LinkState::Authenticating);
    core.on_tick(t0 + 30 * SEC).await;
    assert_eq!(core.state(), LinkState::Disconnected);
    assert_eq!(core.failed_attempts(), 1);
}

// ---------------------------------------------------------------------------
// Heartbeat and liveness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_goes_out_after_one_interval_and_silence_kills_the_link() {
    let host = StubHost::new(vec![]);
    let (mut core, mut gateway_side, t0) = authed_core(host).await;

    // Nothing due before the interval elapses.
    core.on_tick(t0 + 59 * SEC).await;

    core.on_tick(t0 + 60 * SEC).await;
    let ping = read_envelope(&mut gateway_side).await;
    assert_eq!(ping.kind, MessageKind::Ping);
    assert_eq!(ping.from.mud, "Alpha");
    assert!(ping.payload_int("timestamp").is_some());

    // No pong: the link survives until two intervals after the ping.
    core.on_tick(t0 + 179 * SEC).await;
    assert_eq!(core.state(), LinkState::Authenticated);
    core.on_tick(t0 + 180 * SEC).await;
    assert_eq!(core.state(), LinkState::Disconnected);
    // Liveness failure is not a failed connection attempt.
    assert_eq!(core.failed_attempts(), 0);
}

#[tokio::test]
async fn pong_envelope_keeps_the_link_alive() {
    let host = StubHost::new(vec![]);
    let (mut core, mut gateway_side, t0) = authed_core(host).await;

    core.on_tick(t0 + 60 * SEC).await;
    let _ping = read_envelope(&mut gateway_side).await;

    let pong = EnvelopeBuilder::new(
        MessageKind::Pong,
        Address::mud("Gateway"),
        Address::mud("Alpha"),
    )
    .payload_int("timestamp", 1)
    .build();
    core.dispatch(&Envelope::parse(&pong).unwrap(), t0 + 61 * SEC);

    core.on_tick(t0 + 180 * SEC).await;
    assert_eq!(core.state(), LinkState::Authenticated);
}

#[tokio::test]
async fn inbound_ping_envelope_is_answered_with_matching_pong() {
    let host = StubHost::new(vec![]);
    let (mut core, _gateway_side, t0) = authed_core(host).await;

    let ping = EnvelopeBuilder::new(
        MessageKind::Ping,
        Address::mud("Gateway"),
        Address::mud("Alpha"),
    )
    .payload_int("timestamp", 1_700_000_123)
    .build();
    let outbound = core.dispatch(&Envelope::parse(&ping).unwrap(), t0);
    assert_eq!(outbound.len(), 1);
    let pong = Envelope::parse(&outbound[0]).unwrap();
    assert_eq!(pong.kind, MessageKind::Pong);
    assert_eq!(pong.from.mud, "Alpha");
    assert_eq!(pong.payload_int("timestamp"), Some(1_700_000_123));
}

// ---------------------------------------------------------------------------
// Reconnect attempts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn attempts_stop_at_the_cap_until_operator_reset() {
    // A port with nothing listening: connects fail immediately.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let host = StubHost::new(vec![StubHost::user("Admin", 60)]);
    let mut cfg = test_config("Alpha", "127.0.0.1", port);
    cfg.timing.reconnect_delay = Duration::ZERO;
    cfg.timing.max_reconnects = 2;
    let (mut core, _state_rx) = Core::new(cfg, host.clone());

    for _ in 0..5 {
        core.on_tick(Instant::now()).await;
    }
    assert_eq!(core.failed_attempts(), 2, "attempts must stop at the cap");
    assert_eq!(core.state(), LinkState::Disconnected);

    // Operator reset re-arms the counter and attempts resume.
    core.handle_command(
        Command::Reconnect {
            from: "Admin".to_owned(),
        },
        Instant::now(),
    );
    assert_eq!(core.failed_attempts(), 0);
    core.on_tick(Instant::now()).await;
    assert_eq!(core.failed_attempts(), 1);

    host.wait_for_delivery("Admin", "Forcing mesh reconnection", Duration::from_secs(1))
        .await
        .expect("reconnect never acknowledged");
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn who_response_routes_to_the_requesting_player() {
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let (mut core, _gateway_side, t0) = authed_core(host.clone()).await;

    let outbound = core.handle_command(
        Command::Who {
            from: "Bob".to_owned(),
            mud: "Beta".to_owned(),
        },
        t0,
    );
    assert_eq!(outbound.len(), 1);
    let request = Envelope::parse(&outbound[0]).unwrap();
    assert_eq!(request.kind, MessageKind::Who);
    assert_eq!(request.to.mud, "Beta");

    let response = builders::who_response(
        "Beta",
        "Alpha",
        &request.id,
        &[WhoEntry {
            name: "Alice".to_owned(),
            display_name: "Alice the Swift".to_owned(),
            level: Some(12),
            idle_seconds: 30,
            location: "The Docks".to_owned(),
        }],
    )
    .build();
    core.dispatch(&Envelope::parse(&response).unwrap(), t0 + SEC);

    let lines: Vec<String> = host
        .deliveries_for("Bob")
        .into_iter()
        .map(|(text, _)| text)
        .collect();
    assert!(lines.contains(&"Players on Beta:".to_owned()));
    assert!(
        lines.contains(&"  Alice the Swift [12] (idle 30s) - The Docks".to_owned()),
        "unexpected who rendering: {lines:?}"
    );
    assert!(lines.contains(&"(1 players)".to_owned()));

    // The same response again is unmatched and silently dropped.
    let before = host.deliveries().len();
    core.dispatch(&Envelope::parse(&response).unwrap(), t0 + 2 * SEC);
    assert_eq!(host.deliveries().len(), before);
}

#[tokio::test]
async fn late_responses_are_dropped_after_the_correlation_ttl() {
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let (mut core, _gateway_side, t0) = authed_core(host.clone()).await;

    let outbound = core.handle_command(
        Command::Who {
            from: "Bob".to_owned(),
            mud: "Beta".to_owned(),
        },
        t0,
    );
    let request = Envelope::parse(&outbound[0]).unwrap();
    let response = builders::who_response("Beta", "Alpha", &request.id, &[]).build();

    let before = host.deliveries().len();
    core.dispatch(&Envelope::parse(&response).unwrap(), t0 + 40 * SEC);
    assert_eq!(
        host.deliveries().len(),
        before,
        "a response 40s later must not render"
    );
}

#[tokio::test]
async fn inbound_who_request_lists_online_players() {
    let host = StubHost::new(vec![StubHost::user("Bob", 10), StubHost::user("Carol", 3)]);
    let (mut core, _gateway_side, t0) = authed_core(host).await;

    let request = EnvelopeBuilder::new(
        MessageKind::Who,
        Address::mud("Beta"),
        Address::mud("Alpha"),
    )
    .id("req-42")
    .build();
    let outbound = core.dispatch(&Envelope::parse(&request).unwrap(), t0);
    assert_eq!(outbound.len(), 1);

    let response = Envelope::parse(&outbound[0]).unwrap();
    assert_eq!(response.kind, MessageKind::Who);
    assert_eq!(response.id, "req-42", "response must echo the request id");
    assert_eq!(response.to.mud, "Beta");
    let users =
        mvm_protocol::json::array_items(response.payload_raw("users").unwrap()).unwrap();
    assert_eq!(users.len(), 2);
}

#[tokio::test]
async fn inbound_finger_request_shares_the_permitted_profile() {
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let (mut core, _gateway_side, t0) = authed_core(host).await;

    let request = EnvelopeBuilder::new(
        MessageKind::Finger,
        Address::mud("Beta"),
        Address::user("Alpha", "Bob"),
    )
    .id("req-9")
    .payload_str("user", "Bob")
    .build();
    let outbound = core.dispatch(&Envelope::parse(&request).unwrap(), t0);
    assert_eq!(outbound.len(), 1);

    let response = Envelope::parse(&outbound[0]).unwrap();
    assert_eq!(response.kind, MessageKind::Finger);
    assert_eq!(response.id, "req-9");
    assert_eq!(response.payload_str("displayName").as_deref(), Some("Bob"));
    assert_eq!(
        response.payload_str("email").as_deref(),
        Some("bob@alpha.example")
    );
    assert_eq!(response.payload_int("level"), Some(10));
}

#[tokio::test]
async fn locate_replies_only_for_online_players() {
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let (mut core, _gateway_side, t0) = authed_core(host).await;

    let request = |user: &str| {
        let wire = EnvelopeBuilder::new(
            MessageKind::Locate,
            Address::mud("Beta"),
            Address::mud("*"),
        )
        .payload_str("user", user)
        .build();
        Envelope::parse(&wire).unwrap()
    };

    let outbound = core.dispatch(&request("Bob"), t0);
    assert_eq!(outbound.len(), 1);
    let response = Envelope::parse(&outbound[0]).unwrap();
    assert_eq!(response.kind, MessageKind::Locate);
    assert_eq!(response.payload_str("mud").as_deref(), Some("Alpha"));

    assert!(core.dispatch(&request("Ghost"), t0).is_empty());
}

// ---------------------------------------------------------------------------
// Render-only commands and directory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_render_offline_shows_attempt_counter() {
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let (mut core, _state_rx) = Core::new(test_config("Alpha", "127.0.0.1", 1), host.clone());

    core.handle_command(
        Command::Stats {
            from: "Bob".to_owned(),
        },
        Instant::now(),
    );
    let lines: Vec<String> = host
        .deliveries_for("Bob")
        .into_iter()
        .map(|(text, _)| text)
        .collect();
    assert!(lines.contains(&"  State: Disconnected".to_owned()));
    assert!(lines.contains(&"  Reconnect attempts: 0/10".to_owned()));
    assert!(lines.contains(&"  MUD name: Alpha".to_owned()));
    assert!(lines.contains(&"  Protocol version: 1.0".to_owned()));
}

#[tokio::test]
async fn traffic_populates_the_peer_mud_list() {
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let (mut core, _gateway_side, t0) = authed_core(host.clone()).await;

    let presence = builders::presence("Beta", "Dan", "online", "Town").build();
    core.dispatch(&Envelope::parse(&presence).unwrap(), t0);

    core.handle_command(
        Command::ListMuds {
            from: "Bob".to_owned(),
        },
        t0 + SEC,
    );
    assert!(
        host.deliveries_for("Bob")
            .iter()
            .any(|(text, _)| text.trim() == "Beta"),
        "peer MUD missing from list"
    );
}

#[tokio::test]
async fn own_tell_fanned_back_is_neither_delivered_nor_bounced() {
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let (mut core, _gateway_side, t0) = authed_core(host.clone()).await;
    let before = host.deliveries().len();

    let fanback = builders::tell("Alpha", "Bob", "Beta", "Alice", "hi").build();
    let outbound = core.dispatch(&Envelope::parse(&fanback).unwrap(), t0);

    assert!(outbound.is_empty(), "no error bounce for our own traffic");
    assert_eq!(host.deliveries().len(), before, "no redelivery to the sender");
}

#[tokio::test]
async fn emotes_broadcast_to_every_local_player() {
    let host = StubHost::new(vec![StubHost::user("Bob", 10), StubHost::user("Carol", 10)]);
    let (mut core, _gateway_side, t0) = authed_core(host.clone()).await;

    let emote = builders::emote("Beta", "Dan", "Alpha", "waves cheerfully").build();
    core.dispatch(&Envelope::parse(&emote).unwrap(), t0);

    for player in ["Bob", "Carol"] {
        assert!(
            host.deliveries_for(player)
                .iter()
                .any(|(text, _)| text == "Dan@Beta waves cheerfully"),
            "{player} missed the emote"
        );
    }
}

#[tokio::test]
async fn permission_gates_reject_below_level_and_denied_capability() {
    let host = StubHost::new(vec![StubHost::user("Newbie", 1), StubHost::user("Bob", 10)]);
    host.deny("Bob", mvm_client::Capability::UseTell);
    let (mut core, _gateway_side, t0) = authed_core(host.clone()).await;

    // Finger requires level 5 by default.
    let outbound = core.handle_command(
        Command::Finger {
            from: "Newbie".to_owned(),
            target: "Alice@Beta".to_owned(),
        },
        t0,
    );
    assert!(outbound.is_empty());
    host.wait_for_delivery("Newbie", "permission", Duration::from_secs(1))
        .await
        .expect("level gate did not trip");

    // Capability veto from the host.
    let outbound = core.handle_command(
        Command::Tell {
            from: "Bob".to_owned(),
            target: "Alice@Beta".to_owned(),
            message: "hi".to_owned(),
        },
        t0,
    );
    assert!(outbound.is_empty());
    host.wait_for_delivery("Bob", "permission", Duration::from_secs(1))
        .await
        .expect("capability gate did not trip");
}
