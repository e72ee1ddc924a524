//! 批处理 Link：同回合合并、按位置解复用、失败扇出与取消语义。

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use serde_json::{Value, json};
use spark_link::{
    BatchLink, BatchLinkConfig, BatchRegistry, Chain, HttpMethod, LinkError, Operation,
    ResultEnvelope, Subscription, Transformer, callbacks,
    test_stubs::{
        observer::{Recording, recording},
        transport::{batch_response, batching_disabled_response, error_response},
    },
};
use support::Harness;

const URL: &str = "http://api.local/trpc";

fn batch_link(harness: &Harness, config: BatchLinkConfig) -> BatchLink {
    BatchLink::new(config, harness.runtime(), harness.transport())
        .expect("合法的批处理配置")
}

fn batch_chain(harness: &Harness, config: BatchLinkConfig) -> Chain {
    Chain::builder().link(batch_link(harness, config)).build()
}

fn subscribe(
    chain: &Chain,
    operation: Operation,
) -> (Subscription, Recording<ResultEnvelope, LinkError>) {
    let (observer, record) = recording();
    (chain.execute(operation).subscribe(observer), record)
}

fn request_ids(body: &str) -> Vec<u64> {
    let parsed: Value = serde_json::from_str(body).expect("请求体应为 JSON");
    parsed
        .as_array()
        .expect("批量请求体应为数组")
        .iter()
        .map(|item| item["id"].as_u64().expect("id 应为整数"))
        .collect()
}

#[test]
fn same_turn_operations_share_one_wire_call() {
    let harness = Harness::echo();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (_a, first) = subscribe(&chain, Operation::query(1, "user.byId", json!({ "id": "a" })));
    let (_b, second) = subscribe(&chain, Operation::query(2, "user.byId", json!({ "id": "b" })));
    assert_eq!(harness.transport.request_count(), 0, "回合结束前不得发出调用");

    harness.runtime.run_until_idle();

    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 1, "两个操作应合并为一次线缆调用");
    assert!(requests[0].batch);
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert_eq!(request_ids(&requests[0].body), vec![1, 2]);

    assert_eq!(first.values(), vec![ResultEnvelope::new(1, json!({ "id": "a" }))]);
    assert_eq!(second.values(), vec![ResultEnvelope::new(2, json!({ "id": "b" }))]);
    assert!(first.completed() && second.completed());
}

#[test]
fn batching_disabled_fails_every_member() {
    let harness = Harness::new();
    harness.transport.push_response(batching_disabled_response());
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let records: Vec<_> = (1..=3)
        .map(|id| subscribe(&chain, Operation::query(id, "post.list", Value::Null)))
        .collect();
    harness.runtime.run_until_idle();

    for (_, record) in &records {
        assert!(record.values().is_empty(), "不得出现部分成功");
        assert!(matches!(
            record.errors().as_slice(),
            [LinkError::BatchingDisabled { .. }]
        ));
    }
}

#[test]
fn transport_failure_fans_out_to_all_members() {
    let harness = Harness::new();
    harness.transport.push_failure(LinkError::transport("connection refused"));
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (_a, first) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", Value::Null));
    harness.runtime.run_until_idle();

    for record in [&first, &second] {
        let errors = record.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_retryable());
    }
}

#[test]
fn length_mismatch_is_a_protocol_violation_for_everyone() {
    let harness = Harness::new();
    harness
        .transport
        .push_response(batch_response([(1, json!("only one"))]));
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (_a, first) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", Value::Null));
    harness.runtime.run_until_idle();

    for record in [&first, &second] {
        assert!(record.values().is_empty());
        assert!(matches!(
            record.errors().as_slice(),
            [LinkError::MalformedResponse { .. }]
        ));
    }
}

#[test]
fn cancelling_every_member_before_flush_skips_the_call() {
    let harness = Harness::echo();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (a, first) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    let (b, second) = subscribe(&chain, Operation::query(2, "b", Value::Null));
    a.unsubscribe();
    b.unsubscribe();
    harness.runtime.run_until_idle();

    assert_eq!(harness.transport.request_count(), 0, "全部退订后不得发出调用");
    assert!(first.is_empty() && second.is_empty());
}

#[test]
fn cancelling_one_member_before_flush_removes_only_that_member() {
    let harness = Harness::echo();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (a, first) = subscribe(&chain, Operation::query(1, "a", json!("a")));
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", json!("b")));
    a.unsubscribe();
    harness.runtime.run_until_idle();

    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(request_ids(&requests[0].body), vec![2]);
    assert!(first.is_empty());
    assert_eq!(second.values(), vec![ResultEnvelope::new(2, json!("b"))]);
}

#[test]
fn partial_cancellation_after_dispatch_leaves_siblings_untouched() {
    let harness = Harness::new();
    let gate = harness.transport.push_gate();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (a, first) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", Value::Null));
    harness.runtime.run_until_idle();
    assert_eq!(harness.transport.request_count(), 1);

    a.unsubscribe();
    assert!(
        !harness.transport.cancellations()[0].is_cancelled(),
        "仍有成员等待时不得中止调用"
    );

    gate.open(Ok(batch_response([(1, json!("one")), (2, json!("two"))])));
    harness.runtime.run_until_idle();

    assert!(first.is_empty(), "已退订的成员不得收到结果");
    assert_eq!(second.values(), vec![ResultEnvelope::new(2, json!("two"))]);
    assert!(second.completed());
}

#[test]
fn cancelling_every_member_after_dispatch_aborts_the_call() {
    let harness = Harness::new();
    harness.transport.push_hang();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (a, _first) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    let (b, _second) = subscribe(&chain, Operation::query(2, "b", Value::Null));
    harness.runtime.run_until_idle();

    a.unsubscribe();
    b.unsubscribe();
    assert!(harness.transport.cancellations()[0].is_cancelled());
    harness.runtime.run_until_idle();
    assert_eq!(harness.runtime.pending_tasks(), 0);
}

#[test]
fn late_arrivals_start_a_new_group() {
    let harness = Harness::echo();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (_a, first) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    harness.runtime.run_until_idle();
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", Value::Null));
    harness.runtime.run_until_idle();

    assert_eq!(harness.transport.request_count(), 2);
    assert!(first.completed() && second.completed());
}

#[test]
fn queries_and_mutations_never_share_a_group() {
    let harness = Harness::echo();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (_a, _) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    let (_b, _) = subscribe(&chain, Operation::mutation(2, "b", Value::Null));
    harness.runtime.run_until_idle();

    let methods: Vec<_> = harness
        .transport
        .requests()
        .into_iter()
        .map(|request| request.method)
        .collect();
    assert_eq!(methods, vec![HttpMethod::Get, HttpMethod::Post]);
}

#[test]
fn distinct_endpoints_sharing_a_registry_stay_apart() {
    let harness = Harness::echo();
    let registry = BatchRegistry::new();
    let build = |url: &str| {
        let link = BatchLink::new(BatchLinkConfig::new(url), harness.runtime(), harness.transport())
            .expect("合法的批处理配置")
            .with_registry(registry.clone());
        Chain::builder().link(link).build()
    };
    let east = build("http://east.local/rpc");
    let west = build("http://west.local/rpc");

    let (_a, _) = subscribe(&east, Operation::query(1, "a", Value::Null));
    let (_b, _) = subscribe(&west, Operation::query(2, "b", Value::Null));
    assert_eq!(registry.open_groups(), 2);
    harness.runtime.run_until_idle();

    assert_eq!(harness.transport.request_count(), 2);
    assert_eq!(registry.open_groups(), 0, "flush 后注册表应清空");
}

#[test]
fn max_batch_size_seals_full_groups() {
    let harness = Harness::echo();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL).with_max_batch_size(2));

    let records: Vec<_> = (1..=5)
        .map(|id| subscribe(&chain, Operation::query(id, "p", json!(id))))
        .collect();
    harness.runtime.run_until_idle();

    let sizes: Vec<usize> = harness
        .transport
        .requests()
        .iter()
        .map(|request| request_ids(&request.body).len())
        .collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    for (id, (_, record)) in (1u64..).zip(&records) {
        assert_eq!(record.values(), vec![ResultEnvelope::new(id, json!(id))]);
    }
}

#[test]
fn duplicate_ids_never_share_a_group() {
    let harness = Harness::echo();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));

    let (_a, first) = subscribe(&chain, Operation::query(7, "a", json!("first")));
    let (_b, second) = subscribe(&chain, Operation::query(7, "b", json!("second")));
    harness.runtime.run_until_idle();

    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|request| request_ids(&request.body) == vec![7]));
    assert_eq!(first.values()[0].data, json!("first"));
    assert_eq!(second.values()[0].data, json!("second"));
}

#[test]
fn subscriptions_are_rejected() {
    let harness = Harness::echo();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));
    let (_s, record) = subscribe(&chain, Operation::subscription(1, "onPost", Value::Null));
    assert!(matches!(
        record.errors().as_slice(),
        [LinkError::Unsupported { .. }]
    ));
    harness.runtime.run_until_idle();
    assert_eq!(harness.transport.request_count(), 0);
}

#[test]
fn members_sharing_a_group_complete_independently() {
    let harness = Harness::new();
    harness.transport.push_response(spark_link::WireResponse::ok(
        json!([
            { "id": 1, "result": { "type": "data", "data": "ok" } },
            { "id": 2, "result": { "type": "error", "error": { "code": -32603, "message": "boom" } } }
        ])
        .to_string(),
    ));
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));
    let (_a, first) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", Value::Null));
    harness.runtime.run_until_idle();

    assert_eq!(first.values(), vec![ResultEnvelope::new(1, json!("ok"))]);
    assert!(matches!(
        second.errors().as_slice(),
        [LinkError::Server { error }] if error.message == "boom"
    ));
}

#[test]
fn non_array_server_error_fails_every_member() {
    let harness = Harness::new();
    harness
        .transport
        .push_response(error_response(1, -32603, "resolver crashed"));
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));
    let (_a, first) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", Value::Null));
    harness.runtime.run_until_idle();

    for record in [&first, &second] {
        assert!(record.values().is_empty(), "不得出现部分成功");
        assert!(matches!(
            record.errors().as_slice(),
            [LinkError::Server { error }] if error.code == -32603
        ));
    }
}

#[test]
fn mismatched_item_id_fails_only_its_member() {
    let harness = Harness::new();
    harness
        .transport
        .push_response(batch_response([(1, json!("a")), (99, json!("b"))]));
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));
    let (_a, first) = subscribe(&chain, Operation::query(1, "a", Value::Null));
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", Value::Null));
    harness.runtime.run_until_idle();

    assert_eq!(first.values(), vec![ResultEnvelope::new(1, json!("a"))]);
    assert!(first.completed());
    assert!(second.values().is_empty());
    assert!(matches!(
        second.errors().as_slice(),
        [LinkError::MalformedResponse { .. }]
    ));
}

/// 在指定方向上 panic 的变换器。
#[derive(Clone, Copy)]
enum Exploding {
    OnSerialize,
    OnDeserialize,
}

impl Transformer for Exploding {
    fn serialize(&self, input: &Value) -> spark_link::Result<Value> {
        if matches!(self, Exploding::OnSerialize) {
            panic!("serializer exploded");
        }
        Ok(input.clone())
    }

    fn deserialize(&self, output: Value) -> spark_link::Result<Value> {
        if matches!(self, Exploding::OnDeserialize) {
            panic!("deserializer exploded");
        }
        Ok(output)
    }
}

#[test]
fn panicking_serializer_fails_the_whole_group() {
    let harness = Harness::echo();
    let link = batch_link(&harness, BatchLinkConfig::new(URL))
        .with_transformer(Arc::new(Exploding::OnSerialize));
    let chain = Chain::builder().link(link).build();
    let (_a, first) = subscribe(&chain, Operation::query(1, "a", json!(1)));
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", json!(2)));

    harness.runtime.run_until_idle();

    assert_eq!(harness.transport.request_count(), 0, "编码失败时不得发出调用");
    assert_eq!(harness.runtime.pending_tasks(), 0);
    for record in [&first, &second] {
        assert!(matches!(
            record.errors().as_slice(),
            [LinkError::Internal { detail }] if detail.contains("serializer exploded")
        ));
    }
}

#[test]
fn panicking_deserializer_fails_each_member_separately() {
    let harness = Harness::echo();
    let link = batch_link(&harness, BatchLinkConfig::new(URL))
        .with_transformer(Arc::new(Exploding::OnDeserialize));
    let chain = Chain::builder().link(link).build();
    let (_a, first) = subscribe(&chain, Operation::query(1, "a", json!(1)));
    let (_b, second) = subscribe(&chain, Operation::query(2, "b", json!(2)));

    harness.runtime.run_until_idle();

    assert_eq!(harness.transport.request_count(), 1);
    assert_eq!(harness.runtime.pending_tasks(), 0);
    for record in [&first, &second] {
        assert_eq!(record.terminal_count(), 1);
        assert!(matches!(
            record.errors().as_slice(),
            [LinkError::Internal { .. }]
        ));
    }
}

#[test]
fn a_panicking_consumer_does_not_starve_its_siblings() {
    let harness = Harness::echo();
    let chain = batch_chain(&harness, BatchLinkConfig::new(URL));
    let greedy = callbacks().next(|_: ResultEnvelope| {
        panic!("consumer exploded");
    });
    let _greedy = chain
        .execute(Operation::query(1, "a", json!("mine")))
        .subscribe(greedy);
    let (_b, sibling) = subscribe(&chain, Operation::query(2, "b", json!("yours")));

    harness.runtime.run_until_idle();

    assert_eq!(sibling.values(), vec![ResultEnvelope::new(2, json!("yours"))]);
    assert!(sibling.completed());
    assert_eq!(harness.runtime.pending_tasks(), 0, "结算任务应正常结束");
}
