//! Channel membership and fan-out: join/leave envelopes, member-set
//! delivery, and suppression of the gateway's echo of our own traffic.

mod common;

use std::time::Duration;

use common::{StubHost, test_config};
use mvm_client::host::DeliveryStyle;
use mvm_client::{LinkState, MeshClient};
use mvm_protocol::{Envelope, MessageKind, builders};
use mvm_test_utils::MockGateway;

const WAIT: Duration = Duration::from_secs(5);

async fn connected(
    gateway: &MockGateway,
    host: std::sync::Arc<StubHost>,
) -> MeshClient {
    let client = MeshClient::spawn(
        test_config("Alpha", &gateway.host(), gateway.port()),
        host,
    );
    assert!(client.wait_for_state(LinkState::Authenticated, WAIT).await);
    client
}

#[tokio::test]
async fn join_and_leave_emit_channel_actions_in_order() {
    let gateway = MockGateway::start().await.unwrap();
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let client = connected(&gateway, host.clone()).await;

    client.join("Bob", "gossip").unwrap();
    host.wait_for_delivery("Bob", "joined channel 'gossip'", WAIT)
        .await
        .expect("join never confirmed");

    client.leave("Bob", "gossip").unwrap();
    host.wait_for_delivery("Bob", "left channel 'gossip'", WAIT)
        .await
        .expect("leave never confirmed");

    gateway
        .wait_for(
            |env| {
                env.kind == MessageKind::Channel
                    && env.payload_str("action").as_deref() == Some("leave")
            },
            WAIT,
        )
        .await
        .expect("leave envelope never sent");

    let actions: Vec<String> = gateway
        .received()
        .iter()
        .filter_map(|t| Envelope::parse(t).ok())
        .filter(|e| e.kind == MessageKind::Channel)
        .filter_map(|e| e.payload_str("action"))
        .collect();
    assert_eq!(actions, vec!["join", "leave"]);

    client.shutdown().await;
}

#[tokio::test]
async fn channel_messages_fan_out_to_local_members() {
    let gateway = MockGateway::start().await.unwrap();
    let host = StubHost::new(vec![
        StubHost::user("Bob", 10),
        StubHost::user("Carol", 10),
        StubHost::user("Eve", 10),
    ]);
    let client = connected(&gateway, host.clone()).await;

    client.join("Bob", "gossip").unwrap();
    client.join("Carol", "gossip").unwrap();
    host.wait_for_delivery("Carol", "joined channel", WAIT)
        .await
        .unwrap();

    gateway.push(
        &builders::channel_message("Beta", "Dan", "gossip", "any dragons about?").build(),
    );

    for member in ["Bob", "Carol"] {
        let (text, style) = host
            .wait_for_delivery(member, "dragons", WAIT)
            .await
            .unwrap_or_else(|| panic!("{member} never got the channel line"));
        assert_eq!(text, "[gossip] Dan@Beta: any dragons about?");
        assert_eq!(style, DeliveryStyle::Channel);
    }
    // Eve never joined.
    assert!(host.deliveries_for("Eve").iter().all(|(t, _)| !t.contains("dragons")));

    client.shutdown().await;
}

#[tokio::test]
async fn own_messages_fanned_back_are_not_redelivered() {
    let gateway = MockGateway::start().await.unwrap();
    let host = StubHost::new(vec![StubHost::user("Bob", 10), StubHost::user("Carol", 10)]);
    let client = connected(&gateway, host.clone()).await;

    client.join("Bob", "gossip").unwrap();
    client.join("Carol", "gossip").unwrap();
    client.channel_message("Bob", "gossip", "hear me out").unwrap();

    // Bob sees exactly one copy: the local echo at send time.
    let (echo, _) = host
        .wait_for_delivery("Bob", "hear me out", WAIT)
        .await
        .expect("no local echo");
    assert_eq!(echo, "[gossip] Bob: hear me out");

    // The gateway fans the message back to this MUD.
    let sent = gateway
        .wait_for(
            |env| {
                env.kind == MessageKind::Channel
                    && env.payload_str("message").is_some()
            },
            WAIT,
        )
        .await
        .expect("channel message never sent");
    gateway.push(&sent);

    // Carol gets the fan-back copy; Bob does not get a second line.
    host.wait_for_delivery("Carol", "hear me out", WAIT)
        .await
        .expect("other member missed the fan-back");
    let bobs: Vec<_> = host
        .deliveries_for("Bob")
        .into_iter()
        .filter(|(t, _)| t.contains("hear me out"))
        .collect();
    assert_eq!(bobs.len(), 1, "originator must be echoed exactly once");

    client.shutdown().await;
}

#[tokio::test]
async fn sending_requires_membership() {
    let gateway = MockGateway::start().await.unwrap();
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let client = connected(&gateway, host.clone()).await;

    client.channel_message("Bob", "gossip", "am I on?").unwrap();
    let (line, style) = host
        .wait_for_delivery("Bob", "not on channel", WAIT)
        .await
        .expect("membership check did not trip");
    assert_eq!(line, "You are not on channel 'gossip'. Use 'join gossip' first.");
    assert_eq!(style, DeliveryStyle::Error);

    // Nothing but the auth envelope went out.
    let channels = gateway
        .received()
        .iter()
        .filter(|t| Envelope::parse(t).is_ok_and(|e| e.kind == MessageKind::Channel))
        .count();
    assert_eq!(channels, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn join_and_leave_actions_render_to_members() {
    let gateway = MockGateway::start().await.unwrap();
    let host = StubHost::new(vec![StubHost::user("Bob", 10)]);
    let client = connected(&gateway, host.clone()).await;

    client.join("Bob", "gossip").unwrap();
    host.wait_for_delivery("Bob", "joined channel", WAIT).await.unwrap();

    gateway.push(
        &builders::channel_action("Beta", "Dan", "gossip", builders::ChannelAction::Join).build(),
    );
    let (line, _) = host
        .wait_for_delivery("Bob", "has joined", WAIT)
        .await
        .expect("join notice never delivered");
    assert_eq!(line, "[gossip] Dan@Beta has joined the channel.");

    gateway.push(
        &builders::channel_action("Beta", "Dan", "gossip", builders::ChannelAction::Leave).build(),
    );
    let (line, _) = host
        .wait_for_delivery("Bob", "has left", WAIT)
        .await
        .expect("leave notice never delivered");
    assert_eq!(line, "[gossip] Dan@Beta has left the channel.");

    client.shutdown().await;
}
