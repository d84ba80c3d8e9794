// tests/integration/failure_test.rs

//! Backend failures: lost connections, unreachable backends, slow replies and
//! a stopped event loop.

use super::test_helpers::{
    BODY_CLOSE, BODY_OPEN, BackendBehavior, ObservedEvent, ObserverLog, RecordingObserver,
    TestContext, closed_port, config_for, init_tracing, on_loop,
};
use spinelbridge::config::Config;
use spinelbridge::core::backend::ConnectionState;
use spinelbridge::core::continuation::CommandOutcome;
use spinelbridge::core::BridgeError;
use spinelbridge::core::BridgeService;
use spinelbridge::core::handler::{Request, SetGetHandler};
use spinelbridge::server::Dispatcher;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

fn empty_body() -> Vec<u8> {
    [BODY_OPEN, BODY_CLOSE].concat()
}

#[test]
fn test_connection_lost_before_reply_yields_no_reply() {
    let ctx = TestContext::with(
        BackendBehavior {
            drop_on_get: true,
            ..Default::default()
        },
        |config| config.request.timeout = Duration::from_secs(10),
    );

    let started = Instant::now();
    let result = ctx.run_request("doomed").expect("request completes");

    // Bounded by the teardown, not the request timeout.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.state.outcome(), Some(&CommandOutcome::NoReply));
    assert_eq!(&result.reply[..], &empty_body()[..]);
    assert!(result.woke_on_ready);
    assert!(
        ctx.observed
            .wait_for(ObservedEvent::ConnectionLost, Duration::from_secs(1))
    );
}

#[test]
fn test_requests_after_connection_loss_fail_fast() {
    let ctx = TestContext::with(
        BackendBehavior {
            drop_on_get: true,
            ..Default::default()
        },
        |_| {},
    );
    let first = ctx.run_request("first").expect("request completes");
    assert_eq!(first.state.outcome(), Some(&CommandOutcome::NoReply));

    // No reconnect: later requests complete with NoReply immediately.
    ctx.backend.set_behavior(BackendBehavior::default());
    let started = Instant::now();
    let second = ctx.run_request("second").expect("request completes");
    assert_eq!(second.state.outcome(), Some(&CommandOutcome::NoReply));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(ctx.backend.connections(), 1);
}

#[test]
fn test_unreachable_backend_completes_with_no_reply() {
    init_tracing();
    let addr = SocketAddr::from(([127, 0, 0, 1], closed_port()));
    let observed = ObserverLog::default();
    let service = BridgeService::init_with_observer(
        config_for(addr),
        Box::new(RecordingObserver(observed.clone())),
    )
    .expect("initialization does not wait for the connect");

    let request = Request::new(service.next_request_id(), vec![Bytes::from_static(b"v")]);
    let result = Dispatcher::default()
        .run(&SetGetHandler::new(service.clone()), &request)
        .expect("request completes");

    assert_eq!(result.state.outcome(), Some(&CommandOutcome::NoReply));
    assert!(observed.wait_for(ObservedEvent::ConnectFailed, Duration::from_secs(2)));
    service.shutdown();
}

#[test]
fn test_unresolvable_backend_fails_initialization() {
    init_tracing();
    let mut config = Config::default();
    config.backend.host = "backend.invalid".to_string();
    let err = BridgeService::init(config).err().expect("initialization fails");
    assert!(matches!(err, BridgeError::ConnectionFailure(_)));
}

#[test]
fn test_slow_backend_times_out() {
    let ctx = TestContext::with(
        BackendBehavior {
            get_delay: Duration::from_secs(2),
            ..Default::default()
        },
        |config| config.request.timeout = Duration::from_millis(200),
    );

    let started = Instant::now();
    let result = ctx.run_request("slow").expect("request completes");
    let elapsed = started.elapsed();

    assert_eq!(result.state.outcome(), Some(&CommandOutcome::TimedOut));
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(1500));
    assert!(!result.woke_on_ready);
    assert_eq!(&result.reply[..], &empty_body()[..]);
}

#[test]
fn test_graceful_disconnect_refuses_new_requests() {
    let ctx = TestContext::new();
    ctx.service
        .event_loop()
        .schedule_async(|conn| {
            conn.disconnect();
        })
        .expect("schedule disconnect");
    assert!(
        ctx.observed
            .wait_for(ObservedEvent::Disconnected, Duration::from_secs(2))
    );

    // After a graceful disconnect nothing is accepted; the request still ends.
    let result = ctx.run_request("closed").expect("request completes");
    assert_eq!(result.state.outcome(), Some(&CommandOutcome::NoReply));
    assert_eq!(&result.reply[..], &empty_body()[..]);
}

#[test]
fn test_disconnect_during_connect_reports_no_disconnect() {
    let ctx = TestContext::new();
    ctx.service
        .event_loop()
        .schedule_async(|conn| conn.disconnect())
        .expect("schedule disconnect");
    assert!(
        ctx.observed
            .wait_for(ObservedEvent::Disconnected, Duration::from_secs(2))
    );

    // Reconnect and give up before the connect is ever driven.
    let state = on_loop(ctx.service.event_loop(), |conn| {
        conn.connect();
        conn.disconnect();
        conn.state().clone()
    });
    assert_eq!(state, ConnectionState::Disconnected);

    std::thread::sleep(Duration::from_millis(100));
    let events = ctx.observed.events();
    let count = |wanted: ObservedEvent| events.iter().filter(|e| **e == wanted).count();
    assert_eq!(count(ObservedEvent::Connected), 1);
    assert_eq!(count(ObservedEvent::Disconnected), 1);
}

#[test]
fn test_request_after_shutdown_fails_on_first_invocation() {
    let ctx = TestContext::new();
    ctx.service.shutdown();
    assert!(!ctx.service.event_loop().is_running());

    let err = ctx.run_request("late").unwrap_err();
    assert_eq!(err, BridgeError::LoopClosed);
}

#[test]
fn test_shutdown_completes_in_flight_requests() {
    let ctx = TestContext::with(
        BackendBehavior {
            get_delay: Duration::from_secs(5),
            ..Default::default()
        },
        |config| config.request.timeout = Duration::from_secs(10),
    );
    let handler = ctx.handler();
    let request = ctx.request("in-flight");
    let runner = std::thread::spawn(move || Dispatcher::default().run(&handler, &request));

    std::thread::sleep(Duration::from_millis(200));
    let started = Instant::now();
    ctx.service.shutdown();
    let result = runner
        .join()
        .expect("request thread")
        .expect("request completes");

    assert_eq!(result.state.outcome(), Some(&CommandOutcome::NoReply));
    assert!(started.elapsed() < Duration::from_secs(3));
}
