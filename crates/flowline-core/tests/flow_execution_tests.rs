use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowline_core::{
    DefinitionError, Emitter, ErrorStatus, Flow, FlowContext, FlowError, FlowRegistry,
    RecordKind, RecordStatus, StreamingFlow,
};
use pretty_assertions::assert_eq;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
struct Count {
    count: usize,
}

fn counting_flow(registry: &mut FlowRegistry, name: &str, fail_at: Option<usize>) -> StreamingFlow<usize, String, Count> {
    registry
        .define_streaming_flow(name, move |_ctx, n: usize, emitter: Emitter<Count>| async move {
            let mut streamed = 0;
            if emitter.is_streaming() {
                for count in 0..n {
                    if Some(count) == fail_at {
                        return Err(FlowError::application("boom!"));
                    }
                    emitter.emit(Count { count }).await?;
                    streamed += 1;
                }
            }
            Ok(format!("done: {}, streamed: {} times", n, streamed))
        })
        .unwrap()
}

fn llm_flow(registry: &mut FlowRegistry) -> Flow<String, String> {
    registry
        .define_flow("basic", |ctx: FlowContext, subject: String| async move {
            let subject = ctx
                .run("call-llm", || async { Ok(format!("subject: {}", subject)) })
                .await?;
            ctx.run("call-llm", || async { Ok(format!("foo: {}", subject)) })
                .await
        })
        .unwrap()
}

#[tokio::test]
async fn test_stream_delivers_every_chunk_then_result() {
    let mut registry = FlowRegistry::new();
    let streamy = counting_flow(&mut registry, "streamy", None);

    let mut stream = streamy.stream(&FlowContext::new(), 5, 1);
    let mut counts = Vec::new();
    while let Some(chunk) = stream.next_chunk().await {
        counts.push(chunk.unwrap().count);
    }

    assert_eq!(counts, vec![0, 1, 2, 3, 4]);
    assert_eq!(stream.finish().await.unwrap(), "done: 5, streamed: 5 times");
}

#[tokio::test]
async fn test_failure_midway_keeps_delivered_chunks() {
    let mut registry = FlowRegistry::new();
    let throwy = counting_flow(&mut registry, "streamyThrowy", Some(3));

    let mut stream = throwy.stream(&FlowContext::new(), 10, 1);
    let mut counts = Vec::new();
    while let Some(chunk) = stream.next_chunk().await {
        counts.push(chunk.unwrap().count);
    }

    assert_eq!(counts, vec![0, 1, 2]);
    let err = stream.finish().await.unwrap_err();
    assert_eq!(err, FlowError::application("boom!"));
    assert_eq!(err.status(), ErrorStatus::Internal);
}

#[tokio::test]
async fn test_reinvocation_repeats_the_chunk_sequence() {
    let mut registry = FlowRegistry::new();
    let streamy = counting_flow(&mut registry, "streamy", None);

    let mut runs = Vec::new();
    for _ in 0..3 {
        let mut stream = streamy.stream(&FlowContext::new(), 4, 2);
        let mut counts = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            counts.push(chunk.unwrap().count);
        }
        stream.finish().await.unwrap();
        runs.push(counts);
    }

    assert!(runs.iter().all(|run| run == &vec![0, 1, 2, 3]));
}

#[tokio::test]
async fn test_cancel_between_chunks_stops_delivery() {
    let mut registry = FlowRegistry::new();
    let streamy = counting_flow(&mut registry, "streamy", None);

    let ctx = FlowContext::new();
    let mut stream = streamy.stream(&ctx, 1_000, 1);
    for expected in 0..3 {
        assert_eq!(stream.next_chunk().await.unwrap().unwrap().count, expected);
    }

    ctx.cancel();
    assert!(stream.next_chunk().await.is_none());
    assert_eq!(stream.delivered(), 3);
    assert_eq!(stream.finish().await.unwrap_err(), FlowError::Cancelled);
}

#[tokio::test]
async fn test_batch_mode_skips_emission() {
    let mut registry = FlowRegistry::new();
    let streamy = counting_flow(&mut registry, "streamy", None);

    let out = streamy.run(&FlowContext::new(), 3).await.unwrap();
    assert_eq!(out, "done: 3, streamed: 0 times");
}

#[tokio::test]
async fn test_basic_flow_chains_two_steps() {
    let mut registry = FlowRegistry::new();
    let basic = llm_flow(&mut registry);

    let ctx = FlowContext::new();
    let out = basic.run(&ctx, "socks".to_string()).await.unwrap();
    assert_eq!(out, "foo: subject: socks");

    let records = ctx.trace().records();
    let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["basic", "call-llm", "call-llm-2"]);
    assert_eq!(records[0].kind, RecordKind::Flow);
    assert!(records.iter().all(|r| r.status == RecordStatus::Succeeded));
}

#[tokio::test]
async fn test_nested_flow_errors_propagate_unchanged() {
    let mut registry = FlowRegistry::new();
    let failing: Flow<String, String> = registry
        .define_flow("throwy", |_ctx, message: String| async move {
            Err(FlowError::application(message))
        })
        .unwrap();
    let parent: Flow<(), String> = registry
        .define_flow("parent", move |ctx: FlowContext, _: ()| {
            let failing = failing.clone();
            async move { failing.run(&ctx, "nested failure".to_string()).await }
        })
        .unwrap();

    let err = parent.invoke(()).await.unwrap_err();
    assert_eq!(err, FlowError::application("nested failure"));
}

#[tokio::test]
async fn test_nested_flow_shares_parent_trace() {
    let mut registry = FlowRegistry::new();
    let basic = llm_flow(&mut registry);
    let parent: Flow<(), String> = registry
        .define_flow("parent", move |ctx: FlowContext, _: ()| {
            let basic = basic.clone();
            async move { basic.run(&ctx, "foo".to_string()).await }
        })
        .unwrap();

    let ctx = FlowContext::new();
    assert_eq!(parent.run(&ctx, ()).await.unwrap(), "foo: subject: foo");
    let keys: Vec<_> = ctx.trace().records().into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["parent", "basic", "call-llm", "call-llm-2"]);
}

#[tokio::test]
async fn test_replay_skips_completed_steps() {
    let mut registry = FlowRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let flow: Flow<String, String> = registry
        .define_flow("counted", move |ctx: FlowContext, input: String| {
            let counter = counter.clone();
            async move {
                ctx.run("expensive", || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("computed {}", input))
                })
                .await
            }
        })
        .unwrap();

    let first = FlowContext::new();
    assert_eq!(flow.run(&first, "a".to_string()).await.unwrap(), "computed a");

    let replay = FlowContext::with_replay(&first.trace().records());
    assert_eq!(flow.run(&replay, "b".to_string()).await.unwrap(), "computed a");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_slow_step() {
    let mut registry = FlowRegistry::new();
    let slow: Flow<(), ()> = registry
        .define_flow("slow", |ctx: FlowContext, _: ()| async move {
            ctx.run("sleep", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
        })
        .unwrap();

    let ctx = FlowContext::new().with_timeout(Duration::from_millis(100));
    assert_eq!(slow.run(&ctx, ()).await, Err(FlowError::DeadlineExceeded));
}

#[tokio::test]
async fn test_entry_rejects_invalid_input_before_running() {
    let mut registry = FlowRegistry::new();
    counting_flow(&mut registry, "streamy", None);
    let entry = registry.get("streamy").unwrap();

    let ctx = FlowContext::new();
    let err = entry.stream(&ctx, json!("five"), 1).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::InvalidArgument);
    assert!(ctx.trace().is_empty());
}

#[test]
fn test_duplicate_definition_fails() {
    let mut registry = FlowRegistry::new();
    counting_flow(&mut registry, "streamy", None);

    let err = registry
        .define_flow("streamy", |_ctx, input: String| async move { Ok(input) })
        .unwrap_err();
    assert_eq!(err, DefinitionError::DuplicateFlow("streamy".to_string()));
}
