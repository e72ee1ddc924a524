//! 单操作终端 Link：一次调用、一个结果、尽力中止。

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use serde_json::{Value, json};
use spark_link::{
    Chain, HttpLink, HttpLinkConfig, HttpMethod, LinkError, Operation, ResultEnvelope,
    Transformer, WireResponse,
    test_stubs::{
        observer::recording,
        transport::{data_response, error_response},
    },
};
use support::Harness;

const URL: &str = "http://api.local/rpc";

fn http_chain(harness: &Harness) -> Chain {
    let link = HttpLink::new(HttpLinkConfig::new(URL), harness.runtime(), harness.transport())
        .expect("合法的 HTTP 配置");
    Chain::builder().link(link).build()
}

#[test]
fn query_issues_exactly_one_get_and_completes() {
    let harness = Harness::new();
    harness.transport.push_response(data_response(1, json!([1, 2, 3])));
    let chain = http_chain(&harness);

    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain
        .execute(Operation::query(1, "numbers.list", json!({ "limit": 3 })))
        .subscribe(observer);
    harness.runtime.run_until_idle();

    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert_eq!(requests[0].url, URL);
    assert!(!requests[0].batch);
    let body: Value = serde_json::from_str(&requests[0].body).expect("请求体应为 JSON");
    assert_eq!(
        body,
        json!({ "id": 1, "type": "query", "path": "numbers.list", "input": { "limit": 3 } })
    );
    assert_eq!(record.values(), vec![ResultEnvelope::new(1, json!([1, 2, 3]))]);
    assert!(record.completed());
    assert_eq!(record.terminal_count(), 1);
}

#[test]
fn mutation_uses_post() {
    let harness = Harness::echo();
    let chain = http_chain(&harness);
    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain
        .execute(Operation::mutation(5, "post.add", json!({ "title": "t" })))
        .subscribe(observer);
    harness.runtime.run_until_idle();
    assert_eq!(harness.transport.requests()[0].method, HttpMethod::Post);
    assert_eq!(record.values()[0].data, json!({ "title": "t" }));
}

#[test]
fn application_errors_surface_as_server_failures() {
    let harness = Harness::new();
    harness
        .transport
        .push_response(error_response(1, -32603, "resolver threw"));
    let chain = http_chain(&harness);
    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain
        .execute(Operation::query(1, "boom", Value::Null))
        .subscribe(observer);
    harness.runtime.run_until_idle();

    let errors = record.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], LinkError::Server { error } if error.code == -32603));
    assert!(!record.completed());
}

#[test]
fn garbage_body_is_a_malformed_response() {
    let harness = Harness::new();
    harness.transport.push_response(WireResponse::ok("not json"));
    let chain = http_chain(&harness);
    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain
        .execute(Operation::query(1, "p", Value::Null))
        .subscribe(observer);
    harness.runtime.run_until_idle();
    assert!(matches!(
        record.errors().as_slice(),
        [LinkError::MalformedResponse { .. }]
    ));
}

#[test]
fn unsubscribing_aborts_the_in_flight_call() {
    let harness = Harness::new();
    harness.transport.push_hang();
    let chain = http_chain(&harness);
    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    let subscription = chain
        .execute(Operation::query(1, "slow", Value::Null))
        .subscribe(observer);
    harness.runtime.run_until_idle();

    subscription.unsubscribe();
    assert!(harness.transport.cancellations()[0].is_cancelled());
    harness.runtime.run_until_idle();
    assert_eq!(harness.runtime.pending_tasks(), 0);
    assert!(record.is_empty());
}

#[test]
fn a_transport_ignoring_cancellation_still_cannot_notify() {
    let harness = Harness::new();
    let gate = harness.transport.push_gate();
    let chain = http_chain(&harness);
    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    let subscription = chain
        .execute(Operation::query(1, "slow", Value::Null))
        .subscribe(observer);
    harness.runtime.run_until_idle();

    subscription.unsubscribe();
    gate.open(Ok(data_response(1, json!("late"))));
    harness.runtime.run_until_idle();
    assert!(record.is_empty(), "退订后不得收到迟到的结果");
}

#[test]
fn subscriptions_are_unsupported() {
    let harness = Harness::new();
    let chain = http_chain(&harness);
    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain
        .execute(Operation::subscription(1, "onEvent", Value::Null))
        .subscribe(observer);
    assert!(matches!(
        record.errors().as_slice(),
        [LinkError::Unsupported { .. }]
    ));
    assert_eq!(harness.transport.request_count(), 0);
}

struct Envelope;

impl Transformer for Envelope {
    fn serialize(&self, input: &Value) -> spark_link::Result<Value> {
        Ok(json!({ "json": input }))
    }

    fn deserialize(&self, output: Value) -> spark_link::Result<Value> {
        output
            .get("json")
            .cloned()
            .ok_or_else(|| LinkError::malformed("missing `json` envelope"))
    }
}

#[test]
fn transformer_wraps_input_and_unwraps_output() {
    let harness = Harness::echo();
    let link = HttpLink::new(HttpLinkConfig::new(URL), harness.runtime(), harness.transport())
        .expect("合法的 HTTP 配置")
        .with_transformer(Arc::new(Envelope));
    let chain = Chain::builder().link(link).build();
    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain
        .execute(Operation::query(1, "p", json!(42)))
        .subscribe(observer);
    harness.runtime.run_until_idle();

    let body: Value =
        serde_json::from_str(&harness.transport.requests()[0].body).expect("请求体应为 JSON");
    assert_eq!(body["input"], json!({ "json": 42 }));
    assert_eq!(record.values(), vec![ResultEnvelope::new(1, json!(42))]);
}

#[test]
fn empty_url_is_rejected() {
    let harness = Harness::new();
    assert!(matches!(
        HttpLink::new(HttpLinkConfig::new(""), harness.runtime(), harness.transport()),
        Err(spark_link::ConfigError::EmptyUrl { link: "http" })
    ));
}

/// 在还原响应时 panic 的变换器。
struct ExplodingDeserializer;

impl Transformer for ExplodingDeserializer {
    fn serialize(&self, input: &Value) -> spark_link::Result<Value> {
        Ok(input.clone())
    }

    fn deserialize(&self, _output: Value) -> spark_link::Result<Value> {
        panic!("deserializer exploded");
    }
}

#[test]
fn panicking_deserializer_surfaces_as_internal_error() {
    let harness = Harness::echo();
    let link = HttpLink::new(HttpLinkConfig::new(URL), harness.runtime(), harness.transport())
        .expect("合法的 HTTP 配置")
        .with_transformer(Arc::new(ExplodingDeserializer));
    let chain = Chain::builder().link(link).build();
    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain
        .execute(Operation::query(1, "p", json!(1)))
        .subscribe(observer);

    harness.runtime.run_until_idle();

    assert_eq!(harness.transport.request_count(), 1);
    assert_eq!(harness.runtime.pending_tasks(), 0);
    assert!(record.values().is_empty());
    assert!(matches!(
        record.errors().as_slice(),
        [LinkError::Internal { detail }] if detail.contains("deserializer exploded")
    ));
}
