//! Session behavior against the scripted in-memory transport.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::StreamExt;
use serde_json::json;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use webgather_core::{GatherError, GatherSettings, ProtocolEvent, TransportError};
use webgather_session::{PROTOCOL_TIMEOUT_BUFFER, ProtocolSession, SessionState, TargetInfo};
use webgather_transport::{MemoryTransportBuilder, MemoryTransportController};

fn attach() -> (ProtocolSession, MemoryTransportController) {
    let (transport, controller) = MemoryTransportBuilder::new().id("conn-7").build();
    let session = ProtocolSession::new(Arc::new(transport), &GatherSettings::default());
    (session, controller)
}

#[tokio::test(start_paused = true)]
async fn response_before_timeout_wins() {
    let (session, controller) = attach();
    controller.delay(
        "Page.navigate",
        Duration::from_millis(29_000),
        json!({"frameId": "F1", "loaderId": "L1"}),
    );

    let result = assert_ok!(
        session
            .send_command("Page.navigate", json!({"url": "https://example.com"}))
            .await
    );
    assert_eq!(result["frameId"], "F1");
    assert_eq!(session.id(), "conn-7");
}

#[tokio::test(start_paused = true)]
async fn override_applies_to_exactly_one_command() {
    let (session, controller) = attach();
    controller.hang("Tracing.end");

    session.set_next_command_timeout(Duration::from_millis(5_000));
    let start = Instant::now();
    let err = assert_err!(session.send_command("Tracing.end", json!({})).await);
    assert_eq!(
        err,
        GatherError::ProtocolTimeout {
            method: "Tracing.end".to_string()
        }
    );
    assert_eq!(start.elapsed(), Duration::from_millis(5_000));

    let start = Instant::now();
    assert_err!(session.send_command("Tracing.end", json!({})).await);
    assert_eq!(start.elapsed(), Duration::from_millis(30_000));

    let sent = controller.sent();
    assert_eq!(sent[0].timeout, Duration::from_millis(5_000) + PROTOCOL_TIMEOUT_BUFFER);
    assert_eq!(sent[1].timeout, Duration::from_millis(30_000) + PROTOCOL_TIMEOUT_BUFFER);
}

#[tokio::test(start_paused = true)]
async fn commands_after_crash_fail_without_waiting() {
    let (session, controller) = attach();
    controller.hang("Runtime.evaluate");
    controller.crash();

    let start = Instant::now();
    let err = assert_err!(session.send_command("Runtime.evaluate", json!({})).await);
    assert_eq!(err, GatherError::TargetCrashed);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(controller.sent().is_empty());
    assert_eq!(session.state(), SessionState::Crashed);
}

#[tokio::test(start_paused = true)]
async fn in_flight_timer_reports_crash_cause() {
    let (session, controller) = attach();
    controller.hang("Tracing.end");

    let (result, ()) = tokio::join!(session.send_command("Tracing.end", json!({})), async {
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        controller.crash();
    });

    assert_eq!(assert_err!(result), GatherError::TargetCrashed);
}

#[tokio::test]
async fn detach_never_masks_crash() {
    let (session, controller) = attach();
    controller.crash();
    controller.detach();
    assert_eq!(session.terminal_error(), Some(GatherError::TargetCrashed));

    let (session, controller) = attach();
    assert_eq!(session.state(), SessionState::Healthy);
    controller.detach();
    controller.crash();
    assert_eq!(session.terminal_error(), Some(GatherError::TargetDetached));
}

#[tokio::test]
async fn crash_signal_fires_with_cause() {
    let (session, controller) = attach();
    let signal = session.crash_signal();
    controller.crash();
    assert_eq!(signal.fired().await, GatherError::TargetCrashed);
}

#[tokio::test]
async fn events_are_relayed_unmodified() {
    let (session, controller) = attach();
    let seen = Arc::new(Mutex::new(Vec::<ProtocolEvent>::new()));
    let sink = Arc::clone(&seen);
    let id = session.on(
        "Runtime.consoleAPICalled",
        Arc::new(move |ev: &ProtocolEvent| sink.lock().unwrap().push(ev.clone())),
    );
    let mut stream = session.events();
    let next_load = session.once("Page.loadEventFired");

    let payload = json!({"type": "log", "args": [{"type": "string", "value": "hi"}]});
    controller.emit_event("Runtime.consoleAPICalled", payload.clone());
    controller.emit_event("Page.loadEventFired", json!({"timestamp": 10.5}));
    assert!(session.off(id));
    controller.emit_event("Runtime.consoleAPICalled", json!({}));

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].params, payload);
    assert_eq!(next_load.await.unwrap().params["timestamp"], 10.5);
    assert_eq!(stream.next().await.unwrap().method, "Runtime.consoleAPICalled");
}

#[tokio::test]
async fn protocol_errors_and_typed_results() {
    let (session, controller) = attach();
    controller.fail(
        "Foo.bar",
        TransportError::Remote {
            code: -32601,
            message: "'Foo.bar' wasn't found".to_string(),
        },
    );
    controller.respond(
        "Target.getTargetInfo",
        json!({"targetId": "T1", "type": "page", "title": "t", "url": "https://example.com/"}),
    );

    let err = assert_err!(session.send_command("Foo.bar", json!({})).await);
    assert!(matches!(err, GatherError::Protocol { ref method, .. } if method == "Foo.bar"));

    let info: TargetInfo = assert_ok!(
        session
            .send_command_as("Target.getTargetInfo", json!({}))
            .await
    );
    assert_eq!(info.target_id, "T1");
    session.set_target_info(info.clone());
    assert_eq!(session.target_info(), Some(info));

    session.send_command_and_ignore("Foo.bar", json!({})).await;

    let err = assert_err!(session.send_command("", json!({})).await);
    assert!(matches!(err, GatherError::InvalidCommand(_)));
}

#[tokio::test]
async fn dispose_releases_transport_once() {
    let (session, controller) = attach();
    assert_eq!(controller.subscriber_count(), 1);

    assert_ok!(session.dispose().await);
    assert_ok!(session.dispose().await);
    assert_eq!(controller.subscriber_count(), 0);
    assert!(controller.is_closed());

    let err = assert_err!(session.send_command("Page.enable", json!({})).await);
    assert_eq!(err, GatherError::SessionDisposed);
}
