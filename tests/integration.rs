//! Integration tests: a full `Hub` driven against the simulated backend.

use embassy_sync::pubsub::WaitResult;
use serde_json::json;

use swervelink::ble::simulated::{SimulatedBackend, SimulatedPeer};
use swervelink::config::{ACK_TOKEN, STATUS_REPORT_EVENT, WRITE_STDOUT_EVENT};
use swervelink::hub::HubSubscriber;
use swervelink::protocol::stdin_frame;
use swervelink::{
    subscribe, AxisUpdate, ChassisVelocity, ConnectStep, Error, Hub, HubEvent, LinkEvents,
    Message, SendOptions, SendOutcome, VelocityStream,
};

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

struct Rig {
    hub: Hub<SimulatedBackend>,
    peer: SimulatedPeer,
    events: LinkEvents,
}

impl Rig {
    fn new() -> Self {
        let (backend, peer) = SimulatedBackend::new();
        let hub = Hub::new("Swerve Hub", backend);
        let events = hub.link_events();
        Self { hub, peer, events }
    }

    async fn connected() -> Self {
        let mut rig = Self::new();
        rig.hub.connect().await.expect("connect");
        rig
    }

    /// Deliver every pending link event to the hub.
    async fn pump(&mut self) {
        while let Some(event) = self.events.try_next() {
            self.hub.handle_link_event(event).await.expect("link event");
        }
    }

    async fn ack(&mut self) {
        assert!(self.peer.stdout(std::str::from_utf8(ACK_TOKEN).unwrap()));
        self.pump().await;
    }

    async fn stdout(&mut self, text: &str) {
        assert!(self.peer.stdout(text));
        self.pump().await;
    }

    async fn status(&mut self, flags: u8) {
        assert!(self.peer.status(flags));
        self.pump().await;
    }
}

fn drain(sub: &mut HubSubscriber<'_>) -> Vec<HubEvent> {
    let mut seen = Vec::new();
    while let Some(result) = sub.try_next_message() {
        if let WaitResult::Message(event) = result {
            seen.push(event);
        }
    }
    seen
}

fn line(text: &str) -> Vec<u8> {
    stdin_frame(text)
}

// ═══════════════════════════════════════════════════════════════════════════
// Flow control
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn guaranteed_sends_are_single_flight() {
    let mut rig = Rig::connected().await;

    let first = rig.hub.send_message("drive", &[1.0], SendOptions::guaranteed()).await;
    let second = rig.hub.send_message("drive", &[2.0], SendOptions::guaranteed()).await;
    assert_eq!(first.unwrap(), SendOutcome::Sent);
    assert_eq!(second.unwrap(), SendOutcome::Queued);
    assert_eq!(rig.peer.writes(), vec![line("drive,1")]);

    rig.ack().await;
    assert_eq!(rig.peer.writes(), vec![line("drive,1"), line("drive,2")]);
    assert!(!rig.hub.is_ready());

    rig.ack().await;
    assert_eq!(rig.peer.writes().len(), 2);
    assert!(rig.hub.is_ready());
}

#[tokio::test]
async fn queued_commands_keep_submission_order() {
    let mut rig = Rig::connected().await;
    for n in 0..5u8 {
        rig.hub
            .send_message("", &[f64::from(n)], SendOptions::guaranteed())
            .await
            .unwrap();
    }
    for _ in 0..5 {
        rig.ack().await;
    }

    let expected: Vec<Vec<u8>> = (0..5u8).map(|n| line(&n.to_string())).collect();
    assert_eq!(rig.peer.writes(), expected);
    assert!(rig.hub.is_ready());
}

#[tokio::test]
async fn best_effort_dropped_while_not_ready() {
    let mut rig = Rig::connected().await;
    rig.hub.send_code("print(1)", SendOptions::guaranteed()).await.unwrap();

    let outcome = rig
        .hub
        .send_message("", &[0.0, 100.0, 0.0], SendOptions::best_effort())
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::Dropped);
    assert_eq!(rig.peer.writes().len(), 1);
    assert_eq!(rig.hub.queued_len(), 0);
}

#[tokio::test]
async fn joystick_stream_sends_only_when_ready() {
    let mut rig = Rig::connected().await;
    let velocity = ChassisVelocity::from(AxisUpdate::new(0.0, 100.0, 0.0, 0.0));

    for _ in 0..3 {
        rig.hub
            .send_message("", &velocity.args(), SendOptions::best_effort())
            .await
            .unwrap();
    }
    rig.ack().await;
    rig.hub
        .send_message("", &velocity.args(), SendOptions::best_effort())
        .await
        .unwrap();

    assert_eq!(rig.peer.writes(), vec![line("0,100,0"), line("0,100,0")]);
}

#[tokio::test]
async fn stop_dropped_while_busy_is_retried() {
    let mut rig = Rig::connected().await;
    let mut stream = VelocityStream::new();
    let moving = ChassisVelocity::from(AxisUpdate::new(0.0, 100.0, 0.0, 0.0));
    let stop = ChassisVelocity::default();

    assert_eq!(stream.tick(&mut rig.hub, moving).await.unwrap(), Some(SendOutcome::Sent));
    // The stick returns to centre before the hub acknowledges.
    assert_eq!(stream.tick(&mut rig.hub, stop).await.unwrap(), Some(SendOutcome::Dropped));
    assert_eq!(stream.tick(&mut rig.hub, stop).await.unwrap(), Some(SendOutcome::Dropped));

    rig.ack().await;
    assert_eq!(stream.tick(&mut rig.hub, stop).await.unwrap(), Some(SendOutcome::Sent));
    rig.ack().await;
    assert_eq!(stream.tick(&mut rig.hub, stop).await.unwrap(), None);

    assert_eq!(rig.peer.writes(), vec![line("0,100,0"), line("0,0,0")]);
}

#[tokio::test]
async fn failed_write_propagates_and_keeps_pipeline_busy() {
    let mut rig = Rig::connected().await;
    rig.peer.fail_writes(true);

    let result = rig.hub.send_message("drive", &[1.0], SendOptions::guaranteed()).await;
    assert!(matches!(result, Err(Error::WriteFailed(_))));
    assert!(!rig.hub.is_ready());

    rig.peer.fail_writes(false);
    rig.hub.reset_flow_control();
    assert!(rig.hub.is_ready());
    assert_eq!(
        rig.hub.send_message("drive", &[1.0], SendOptions::guaranteed()).await.unwrap(),
        SendOutcome::Sent
    );
}

#[tokio::test]
async fn control_commands_bypass_the_gate() {
    let mut rig = Rig::connected().await;
    rig.hub.send_message("a", &[], SendOptions::guaranteed()).await.unwrap();
    rig.hub.send_message("b", &[], SendOptions::guaranteed()).await.unwrap();

    rig.hub.stop_user_program().await.unwrap();
    assert!(rig.hub.is_ready());
    assert_eq!(rig.hub.queued_len(), 0);

    rig.hub.start_user_program().await.unwrap();
    assert_eq!(rig.peer.writes(), vec![line("a"), vec![0x00], vec![0x01]]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Status & messages
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn status_changes_published_once() {
    let mut rig = Rig::connected().await;
    let bus = rig.hub.event_bus();
    let mut sub = subscribe(&bus).unwrap();

    rig.status(0x40).await;
    rig.status(0x40).await;
    rig.status(0x7F).await;
    assert!(rig.hub.is_user_program_running());
    rig.status(0x00).await;
    assert!(!rig.hub.is_user_program_running());

    assert_eq!(
        drain(&mut sub),
        vec![
            HubEvent::ProgramRunningChanged(true),
            HubEvent::ProgramRunningChanged(false)
        ]
    );
}

#[tokio::test]
async fn split_envelope_is_reassembled() {
    let mut rig = Rig::connected().await;
    let bus = rig.hub.event_bus();
    let mut sub = subscribe(&bus).unwrap();

    rig.stdout(r#"{"type":"telemetry","pay"#).await;
    assert!(drain(&mut sub).is_empty());
    rig.stdout(r#"load":{"speed":42}}{"type":"debug","payload":{}}"#).await;

    assert_eq!(
        drain(&mut sub),
        vec![
            HubEvent::MessageReceived(Message::new("telemetry", json!({"speed": 42}))),
            HubEvent::MessageReceived(Message::build("debug")),
        ]
    );
    assert_eq!(rig.hub.messages().len(), 2);
}

#[tokio::test]
async fn ack_never_reaches_subscribers() {
    let mut rig = Rig::connected().await;
    let bus = rig.hub.event_bus();
    let mut sub = subscribe(&bus).unwrap();

    rig.stdout(r#"{"type":"a","#).await;
    rig.ack().await;
    rig.stdout(r#""payload":1}"#).await;

    assert_eq!(
        drain(&mut sub),
        vec![HubEvent::MessageReceived(Message::new("a", json!(1)))]
    );
}

#[tokio::test]
async fn start_discards_stale_partial_output() {
    let mut rig = Rig::connected().await;
    rig.stdout(r#"{"type":"stale","payload":"#).await;
    assert!(rig.hub.json_stream().buffered_len() > 0);

    rig.hub.start_user_program().await.unwrap();
    assert_eq!(rig.hub.json_stream().buffered_len(), 0);

    let bus = rig.hub.event_bus();
    let mut sub = subscribe(&bus).unwrap();
    rig.stdout(r#"{"type":"fresh","payload":{}}"#).await;
    assert_eq!(
        drain(&mut sub),
        vec![HubEvent::MessageReceived(Message::build("fresh"))]
    );
}

#[tokio::test]
async fn waiter_resolves_on_matching_type() {
    let mut rig = Rig::connected().await;
    let waiter = rig.hub.wait_for_message("pong");

    rig.stdout(r#"{"type":"ping","payload":{}}"#).await;
    assert!(waiter.try_take().is_none());

    rig.stdout(r#"{"type":"pong","payload":{"t":3}}"#).await;
    assert_eq!(waiter.wait().await, Message::new("pong", json!({"t": 3})));
}

#[tokio::test]
async fn raw_notification_bytes_are_decoded_per_tag() {
    let mut rig = Rig::connected().await;
    let bus = rig.hub.event_bus();
    let mut sub = subscribe(&bus).unwrap();

    // Unknown tag and empty notifications are ignored.
    assert!(rig.peer.notify(&[0x09, 0x01]));
    assert!(rig.peer.notify(&[]));
    assert!(rig.peer.notify(&[STATUS_REPORT_EVENT, 0x40]));
    let mut stdout = vec![WRITE_STDOUT_EVENT];
    stdout.extend_from_slice(br#"{"type":"x","payload":null}"#);
    assert!(rig.peer.notify(&stdout));
    rig.pump().await;

    assert_eq!(
        drain(&mut sub),
        vec![
            HubEvent::ProgramRunningChanged(true),
            HubEvent::MessageReceived(Message::new("x", serde_json::Value::Null)),
        ]
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Connection lifecycle
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn transport_unavailable() {
    let mut rig = Rig::new();
    rig.peer.set_unavailable(true);

    assert!(matches!(rig.hub.connect().await, Err(Error::TransportUnavailable)));
    assert!(!rig.hub.is_connected());
    assert!(!rig.hub.is_connecting());
}

#[tokio::test]
async fn gatt_rejection_rolls_back() {
    let mut rig = Rig::new();
    let bus = rig.hub.event_bus();
    let mut sub = subscribe(&bus).unwrap();
    rig.peer.fail_at(Some(ConnectStep::ConnectGatt));

    assert!(matches!(
        rig.hub.connect().await,
        Err(Error::ConnectFailed {
            step: ConnectStep::ConnectGatt,
            ..
        })
    ));
    assert!(!rig.hub.is_connecting());
    assert!(!rig.hub.is_connected());
    assert!(matches!(
        rig.hub.send_code("x", SendOptions::guaranteed()).await,
        Err(Error::NotConnected)
    ));

    // Whatever the failed attempt left in the channel is stale.
    rig.pump().await;
    assert!(drain(&mut sub).is_empty());

    rig.peer.fail_at(None);
    rig.hub.connect().await.unwrap();
    assert!(rig.hub.is_connected());
}

#[tokio::test]
async fn peer_disconnect_resets_state() {
    let mut rig = Rig::connected().await;
    rig.status(0x40).await;
    rig.hub.send_message("a", &[], SendOptions::guaranteed()).await.unwrap();
    rig.hub.send_message("b", &[], SendOptions::guaranteed()).await.unwrap();

    let bus = rig.hub.event_bus();
    let mut sub = subscribe(&bus).unwrap();

    assert!(rig.peer.drop_link());
    rig.pump().await;

    assert!(!rig.hub.is_connected());
    assert!(!rig.hub.is_user_program_running());
    assert!(rig.hub.is_ready());
    assert_eq!(rig.hub.queued_len(), 0);
    assert_eq!(rig.peer.releases(), 1);
    assert_eq!(
        drain(&mut sub),
        vec![HubEvent::ProgramRunningChanged(false), HubEvent::Disconnected]
    );
}

#[tokio::test]
async fn write_after_disconnect_is_not_connected() {
    let mut rig = Rig::connected().await;
    rig.hub.disconnect().await;

    assert!(matches!(
        rig.hub.send_message("", &[1.0], SendOptions::best_effort()).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(rig.hub.start_user_program().await, Err(Error::NotConnected)));
    assert!(rig.peer.writes().is_empty());
}

#[tokio::test]
async fn disconnect_twice_is_harmless() {
    let mut rig = Rig::connected().await;
    let bus = rig.hub.event_bus();
    let mut sub = subscribe(&bus).unwrap();

    rig.hub.disconnect().await;
    rig.hub.disconnect().await;
    rig.pump().await;

    assert_eq!(drain(&mut sub), vec![HubEvent::Disconnected]);
}

#[tokio::test]
async fn stale_ack_after_reconnect_is_ignored() {
    let mut rig = Rig::connected().await;
    rig.hub.send_message("a", &[], SendOptions::guaranteed()).await.unwrap();
    rig.hub.send_message("b", &[], SendOptions::guaranteed()).await.unwrap();

    // An ack queued on the old link, handled only after reconnecting.
    assert!(rig.peer.stdout("ack"));
    rig.hub.disconnect().await;
    rig.hub.connect().await.unwrap();
    rig.peer.take_writes();
    rig.pump().await;

    assert!(rig.peer.writes().is_empty());
    assert!(rig.hub.is_ready());
}

#[tokio::test]
async fn two_hubs_are_independent() {
    let mut steer = Rig::connected().await;
    let mut drive = Rig::connected().await;

    steer.hub.send_code("a", SendOptions::guaranteed()).await.unwrap();
    drive.stdout(r#"{"type":"d","pay"#).await;

    assert!(!steer.hub.is_ready());
    assert!(drive.hub.is_ready());
    assert_eq!(steer.hub.json_stream().buffered_len(), 0);
    assert!(drive.hub.json_stream().buffered_len() > 0);
}
