//! 重试 Link：收敛、耗尽、分类与取消。

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{Value, json};
use spark_link::{
    Chain, HttpLink, HttpLinkConfig, LinkError, Operation, ResultEnvelope, RetryConfig, RetryLink,
    test_stubs::{
        observer::recording,
        transport::{data_response, error_response},
    },
    wire::WireError,
};
use support::{Harness, ScriptedLink, count};
use tracing_test::traced_test;

fn retry(attempts: u32) -> RetryLink {
    RetryLink::new(RetryConfig::new(attempts)).expect("合法的重试配置")
}

fn query() -> Operation {
    Operation::query(1, "user.list", Value::Null)
}

#[test]
fn converges_on_the_third_attempt() {
    let scripted = ScriptedLink::new(vec![
        Err(LinkError::transport("connection reset")),
        Err(LinkError::server(WireError::new(-32603, "resolver threw"))),
        Ok(json!(["ada", "grace"])),
    ]);
    let calls = Arc::clone(&scripted.calls);
    let overlaps = Arc::clone(&scripted.overlaps);
    let chain = Chain::builder().link(retry(3)).link(scripted).build();

    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain.execute(query()).subscribe(observer);

    assert_eq!(count(&calls), 3, "下游应恰好被调用 3 次");
    assert_eq!(record.values(), vec![ResultEnvelope::new(1, json!(["ada", "grace"]))]);
    assert!(record.completed());
    assert_eq!(record.terminal_count(), 1);
    assert_eq!(count(&overlaps), 0, "尝试之间不得重叠");
}

#[test]
fn exhaustion_propagates_the_last_failure() {
    let scripted = ScriptedLink::new(vec![
        Err(LinkError::transport("first")),
        Err(LinkError::transport("second")),
    ]);
    let calls = Arc::clone(&scripted.calls);
    let chain = Chain::builder().link(retry(2)).link(scripted).build();

    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain.execute(query()).subscribe(observer);

    assert_eq!(count(&calls), 2);
    let errors = record.errors();
    assert_eq!(errors.len(), 1, "只允许一个错误通知");
    assert_eq!(errors[0].to_string(), "transport failure: second");
    assert!(record.values().is_empty());
}

#[test]
fn batching_disabled_is_never_retried() {
    let scripted = ScriptedLink::always_failing(LinkError::BatchingDisabled {
        message: "Batching is not enabled on the server".into(),
    });
    let calls = Arc::clone(&scripted.calls);
    let chain = Chain::builder().link(retry(5)).link(scripted).build();

    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain.execute(query()).subscribe(observer);

    assert_eq!(count(&calls), 1);
    assert!(matches!(
        record.errors().as_slice(),
        [LinkError::BatchingDisabled { .. }]
    ));
}

#[test]
fn asynchronous_failures_are_retried_through_the_transport() {
    let harness = Harness::new();
    harness
        .transport
        .push_failure(LinkError::transport("timeout"))
        .push_response(error_response(1, -32603, "flaky"))
        .push_response(data_response(1, json!({ "ok": true })));
    let http = HttpLink::new(
        HttpLinkConfig::new("http://api.local/rpc"),
        harness.runtime(),
        harness.transport(),
    )
    .expect("合法的 HTTP 配置");
    let chain = Chain::builder().link(retry(3)).link(http).build();

    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    chain.execute(query()).subscribe(observer);
    assert!(record.is_empty(), "线缆调用结算前不应有通知");

    harness.runtime.run_until_idle();
    assert_eq!(harness.transport.request_count(), 3);
    assert_eq!(record.values(), vec![ResultEnvelope::new(1, json!({ "ok": true }))]);
    assert!(record.completed());
}

#[test]
fn cancellation_stops_further_attempts_and_aborts_the_outstanding_one() {
    let harness = Harness::new();
    harness
        .transport
        .push_failure(LinkError::transport("refused"))
        .push_hang();
    let http = HttpLink::new(
        HttpLinkConfig::new("http://api.local/rpc"),
        harness.runtime(),
        harness.transport(),
    )
    .expect("合法的 HTTP 配置");
    let chain = Chain::builder().link(retry(5)).link(http).build();

    let (observer, record) = recording::<ResultEnvelope, LinkError>();
    let subscription = chain.execute(query()).subscribe(observer);
    harness.runtime.run_until_idle();
    assert_eq!(harness.transport.request_count(), 2, "第二次尝试应已挂起");

    subscription.unsubscribe();
    harness.runtime.run_until_idle();

    let cancellations = harness.transport.cancellations();
    assert!(cancellations[1].is_cancelled(), "在途尝试应被中止");
    assert_eq!(harness.transport.request_count(), 2, "退订后不得再发起尝试");
    assert!(record.is_empty());
    assert_eq!(harness.runtime.pending_tasks(), 0);
}

#[test]
#[traced_test]
fn each_attempt_is_traced() {
    let scripted = ScriptedLink::new(vec![Err(LinkError::transport("once")), Ok(Value::Null)]);
    let chain = Chain::builder().link(retry(2)).link(scripted).build();
    let (observer, _record) = recording::<ResultEnvelope, LinkError>();
    chain.execute(query()).subscribe(observer);
    assert!(logs_contain("starting attempt"));
    assert!(logs_contain("attempt=2"));
}

proptest! {
    #[test]
    fn downstream_calls_never_exceed_the_budget(attempts in 1u32..8, failures in 0usize..10) {
        let mut script: Vec<Result<Value, LinkError>> =
            (0..failures).map(|n| Err(LinkError::transport(format!("failure {n}")))).collect();
        script.push(Ok(json!("done")));
        let scripted = ScriptedLink::new(script);
        let calls = Arc::clone(&scripted.calls);
        let chain = Chain::builder().link(retry(attempts)).link(scripted).build();

        let (observer, record) = recording::<ResultEnvelope, LinkError>();
        chain.execute(query()).subscribe(observer);

        let expected_calls = (failures + 1).min(attempts as usize);
        prop_assert_eq!(count(&calls), expected_calls);
        prop_assert_eq!(record.terminal_count(), 1);
        prop_assert_eq!(record.completed(), failures < attempts as usize);
    }
}
