// tests/integration/roundtrip_test.rs

//! End-to-end SET/GET through the handler, the dispatcher and the event loop.

use super::test_helpers::{BackendBehavior, TestContext, expected_body};
use spinelbridge::core::continuation::{CommandOutcome, RequestSlot};
use spinelbridge::core::handler::RequestEnv;
use spinelbridge::core::handler::Handler;
use spinelbridge::core::protocol::RespFrame;
use spinelbridge::core::reentry::{Interest, Reentry, Step, WakeRegistration};
use spinelbridge::server::Dispatcher;
use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};

#[test]
fn test_set_get_roundtrip() {
    let ctx = TestContext::new();
    let request = ctx.request("hello");
    let result = Dispatcher::default()
        .run(&ctx.handler(), &request)
        .expect("request completes");

    assert_eq!(&result.reply[..], &expected_body(b"hello")[..]);
    assert_eq!(
        result.state.outcome(),
        Some(&CommandOutcome::Value(RespFrame::BulkString(Bytes::from_static(
            b"hello"
        ))))
    );
    assert_eq!(result.invocations, 2);
    assert!(result.woke_on_ready);
    assert_eq!(
        ctx.backend.stored(&ctx.key_for(&request)),
        Some(Bytes::from_static(b"hello"))
    );
}

#[test]
fn test_binary_value_is_written_verbatim() {
    let ctx = TestContext::new();
    let value = "line one\r\nline two\u{1F980}";
    let result = ctx.run_request(value).expect("request completes");
    assert_eq!(&result.reply[..], &expected_body(value.as_bytes())[..]);
}

#[test]
fn test_empty_value_writes_no_chunk() {
    let ctx = TestContext::new();
    let result = ctx.run_request("").expect("request completes");

    // A zero-length chunk would end the body early; only the wrapper remains.
    assert_eq!(&result.reply[..], &expected_body(b"")[..]);
    assert_eq!(
        result.state.outcome(),
        Some(&CommandOutcome::Value(RespFrame::BulkString(Bytes::new())))
    );
}

#[test]
fn test_large_value_uses_hex_chunk_length() {
    let ctx = TestContext::new();
    let value = "x".repeat(4096);
    let result = ctx.run_request(&value).expect("request completes");
    assert!(result.reply.starts_with(b"5\r\n<pre>\r\n1000\r\n"));
    assert_eq!(&result.reply[..], &expected_body(value.as_bytes())[..]);
}

#[test]
fn test_sequential_requests_share_one_connection() {
    let ctx = TestContext::new();
    for value in ["a", "b", "c"] {
        let result = ctx.run_request(value).expect("request completes");
        assert_eq!(&result.reply[..], &expected_body(value.as_bytes())[..]);
    }
    assert_eq!(ctx.backend.connections(), 1);
    // SET and GET per request.
    assert_eq!(ctx.backend.commands(), 6);
}

#[test]
fn test_missing_value_fails_before_anything_is_issued() {
    let ctx = TestContext::new();
    let request = spinelbridge::core::handler::Request::new(ctx.service.next_request_id(), vec![]);
    let err = Dispatcher::default()
        .run(&ctx.handler(), &request)
        .unwrap_err();
    assert!(format!("{:?}", err).contains("InvalidRequest"));
    assert_eq!(ctx.backend.commands(), 0);
}

#[test]
fn test_last_argument_is_the_value() {
    let ctx = TestContext::new();
    let request = spinelbridge::core::handler::Request::new(
        ctx.service.next_request_id(),
        vec![Bytes::from_static(b"ignored"), Bytes::from_static(b"used")],
    );
    let result = Dispatcher::default()
        .run(&ctx.handler(), &request)
        .expect("request completes");
    assert_eq!(&result.reply[..], &expected_body(b"used")[..]);
}

#[test]
fn test_early_reinvocation_waits_for_the_reply() {
    let ctx = TestContext::with(
        BackendBehavior {
            get_delay: Duration::from_millis(300),
            ..Default::default()
        },
        |_| {},
    );
    let handler = ctx.handler();
    let request = ctx.request("late");

    let mut reply = BytesMut::new();
    let mut state = RequestSlot::default();
    let mut wake = WakeRegistration::default();

    let step = handler
        .invoke(&mut RequestEnv::new(&request, &mut reply, &mut state, &mut wake, 1))
        .expect("first invocation");
    assert_eq!(step, Step::Suspend);
    assert!(matches!(wake.interest(), Some(Interest::Descriptor { .. })));
    assert_eq!(&reply[..], b"5\r\n<pre>\r\n");

    let continuation = state.continuation().cloned().expect("pending continuation");
    assert!(!continuation.is_complete());

    // Re-invoke without waiting for the descriptor: the handler must block
    // until the GET reply arrives rather than finish with nothing.
    let started = Instant::now();
    let step = handler
        .invoke(&mut RequestEnv::new(&request, &mut reply, &mut state, &mut wake, 2))
        .expect("second invocation");
    assert_eq!(step, Step::Done);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(&reply[..], &expected_body(b"late")[..]);
    assert!(wake.interest().is_none());
}

#[test]
fn test_invoking_a_finished_request_is_rejected() {
    let ctx = TestContext::new();
    let handler = ctx.handler();
    let request = ctx.request("once");
    let mut result = Dispatcher::default()
        .run(&handler, &request)
        .expect("request completes");

    let mut wake = WakeRegistration::default();
    let err = handler
        .invoke(&mut RequestEnv::new(
            &request,
            &mut result.reply,
            &mut result.state,
            &mut wake,
            3,
        ))
        .unwrap_err();
    assert!(format!("{:?}", err).contains("InvalidState"));
}
