//! Wire-level compliance tests: the processor is fed raw bytes and its
//! serialized output is checked field by field, the way any transport
//! would see it.

use serde_json::Value;
use std::sync::Arc;

use polyrpc_server::{
    Chain, Dispatcher, HandlerSelectionMiddleware, MockClock, Outcome, Processor,
    ProcessingContext, SequenceIdGenerator,
};
use polyrpc_server::handlers::{CalculateHandler, EchoHandler};

use chrono::{TimeZone, Utc};
use std::collections::HashMap;

fn fixture() -> Processor {
    let clock = Arc::new(MockClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
    ));
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register_handler("echo", Arc::new(EchoHandler::new(clock.clone())));
    dispatcher.register_handler("calculate", Arc::new(CalculateHandler));
    dispatcher.set_chain(Chain::new().with(Arc::new(HandlerSelectionMiddleware::new(
        HashMap::from([("echo".to_string(), "EchoHandler".to_string())]),
    ))));

    let ids = Arc::new(SequenceIdGenerator::new([
        "aaaaaaaaaaaaaaa1",
        "aaaaaaaaaaaaaaa2",
        "aaaaaaaaaaaaaaa3",
        "aaaaaaaaaaaaaaa4",
    ]));
    Processor::new(dispatcher, clock, ids)
}

fn pctx() -> ProcessingContext {
    ProcessingContext::new("HTTP", "127.0.0.1:40000", "polyrpc", "0.3.0")
}

async fn run(processor: &Processor, payload: &str) -> Option<Value> {
    let outcome = processor.process(payload.as_bytes(), &pctx()).await;
    outcome
        .into_bytes()
        .unwrap()
        .map(|bytes| serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn scenario_echo() {
    let processor = fixture();
    let body = run(
        &processor,
        r#"{"jsonrpc":"2.0","method":"echo","params":{"message":"hello"},"id":1}"#,
    )
    .await
    .unwrap();

    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 1);
    assert!(body.get("error").is_none());
    assert_eq!(body["result"]["echo"]["message"], "hello");
    assert_eq!(body["result"]["request_id"], "aaaaaaaaaaaaaaa1");
    assert_eq!(body["result"]["transport"], "HTTP");
    assert!(body["result"]["timestamp"].is_string());
}

#[tokio::test]
async fn scenario_divide_by_zero() {
    let processor = fixture();
    let body = run(
        &processor,
        r#"{"jsonrpc":"2.0","method":"calculate","params":{"operation":"divide","a":10,"b":0},"id":"d0"}"#,
    )
    .await
    .unwrap();

    assert_eq!(body["id"], "d0");
    assert_eq!(body["error"]["code"], -32602);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Division by zero"));
    assert!(body.get("result").is_none());
}

#[tokio::test]
async fn scenario_unknown_method() {
    let processor = fixture();
    let body = run(&processor, r#"{"jsonrpc":"2.0","method":"nope","id":7}"#)
        .await
        .unwrap();

    assert_eq!(body["id"], 7);
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn scenario_notification_is_silent() {
    let processor = fixture();
    let body = run(
        &processor,
        r#"{"jsonrpc":"2.0","method":"echo","params":{"x":1}}"#,
    )
    .await;
    assert!(body.is_none());
}

#[tokio::test]
async fn scenario_mixed_batch() {
    let processor = fixture();
    let body = run(
        &processor,
        r#"[{"jsonrpc":"2.0","method":"echo","params":{"m":"a"},"id":1},{"jsonrpc":"2.0","method":"echo","params":{"m":"b"}},{"jsonrpc":"2.0","method":"nope","id":3}]"#,
    )
    .await
    .unwrap();

    let responses = body.as_array().unwrap();
    assert_eq!(responses.len(), 2);

    assert_eq!(responses[0]["id"], 1);
    assert!(responses[0].get("error").is_none());
    assert_eq!(responses[1]["id"], 3);
    assert_eq!(responses[1]["error"]["code"], -32601);
}

#[tokio::test]
async fn scenario_malformed_json() {
    let processor = fixture();
    let body = run(&processor, "{bad}").await.unwrap();

    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn property_version_echo_on_every_shape() {
    let processor = fixture();
    let payloads = [
        r#"{"jsonrpc":"2.0","method":"echo","id":1}"#,
        r#"{"jsonrpc":"2.0","method":"nope","id":2}"#,
        r#"{"jsonrpc":"1.0","method":"echo","id":3}"#,
        r#"{"jsonrpc":"2.0","method":"","id":4}"#,
        r#"{"jsonrpc":"2.0","method":"rpc.reserved","id":5}"#,
        "{broken}",
    ];

    for payload in payloads {
        let body = run(&processor, payload).await.unwrap();
        assert_eq!(body["jsonrpc"], "2.0", "payload: {}", payload);
    }
}

#[tokio::test]
async fn property_id_echo_preserves_type() {
    let processor = fixture();

    let number = run(&processor, r#"{"jsonrpc":"2.0","method":"echo","id":42}"#)
        .await
        .unwrap();
    assert_eq!(number["id"], 42);

    let string = run(&processor, r#"{"jsonrpc":"2.0","method":"echo","id":"42"}"#)
        .await
        .unwrap();
    assert_eq!(string["id"], "42");

    // Explicit null id: not a notification, response echoes null.
    let null = run(&processor, r#"{"jsonrpc":"2.0","method":"echo","id":null}"#)
        .await
        .unwrap();
    assert_eq!(null["id"], Value::Null);
    assert!(null.get("result").is_some());
}

#[tokio::test]
async fn property_exclusive_outcome() {
    let processor = fixture();
    let payloads = [
        r#"{"jsonrpc":"2.0","method":"echo","id":1}"#,
        r#"{"jsonrpc":"2.0","method":"nope","id":2}"#,
        "{broken}",
        r#"{"jsonrpc":"2.0","method":"calculate","params":{"operation":"divide","a":1,"b":0},"id":3}"#,
    ];

    for payload in payloads {
        let body = run(&processor, payload).await.unwrap();
        let has_result = body.get("result").is_some();
        let has_error = body.get("error").is_some();
        assert!(
            has_result ^ has_error,
            "exactly one of result/error expected for {}",
            payload
        );
    }
}

#[tokio::test]
async fn property_all_notification_batch_suppressed() {
    let processor = fixture();
    let body = run(
        &processor,
        r#"[{"jsonrpc":"2.0","method":"echo"},{"jsonrpc":"2.0","method":"echo"}]"#,
    )
    .await;
    assert!(body.is_none());
}

#[tokio::test]
async fn boundary_invalid_envelope_with_id_echoes_it() {
    let processor = fixture();

    let body = run(&processor, r#"{"jsonrpc":"1.0","method":"echo","id":9}"#)
        .await
        .unwrap();
    assert_eq!(body["id"], 9);
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn boundary_reserved_prefix() {
    let processor = fixture();
    let body = run(
        &processor,
        r#"{"jsonrpc":"2.0","method":"rpc.anything","id":1}"#,
    )
    .await
    .unwrap();
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn outcome_batch_silent_and_single_serialization() {
    let processor = fixture();

    let single = processor
        .process(br#"{"jsonrpc":"2.0","method":"echo","id":1}"#, &pctx())
        .await;
    assert!(matches!(single, Outcome::Single(_)));

    let silent = processor
        .process(br#"{"jsonrpc":"2.0","method":"echo"}"#, &pctx())
        .await;
    assert!(silent.is_silent());
    assert!(silent.into_bytes().unwrap().is_none());
}
