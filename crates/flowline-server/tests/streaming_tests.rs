mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowline_core::{Emitter, FlowError, FlowRegistry};
use flowline_server::{FlowServer, ServerConfig};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use common::{ndjson_events, test_registry, Tick};

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(registry: FlowRegistry) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        let server = FlowServer::new(ServerConfig::default(), Arc::new(registry));
        let handle = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server shuts down")
            .unwrap();
    }
}

#[tokio::test]
async fn test_live_ndjson_stream() {
    let server = TestServer::start(test_registry()).await;

    let response = reqwest::Client::new()
        .post(server.url("/ticks?stream=true"))
        .json(&json!({ "data": 5 }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert!(response.headers().contains_key("x-flowline-invocation-id"));

    let events = ndjson_events(&response.text().await.unwrap());
    assert_eq!(events.len(), 6);
    for (i, event) in events[..5].iter().enumerate() {
        assert_eq!(event, &json!({"type": "chunk", "data": {"count": i}}));
    }
    assert_eq!(
        events[5],
        json!({"type": "result", "data": "done: 5, streamed: 5 times"})
    );

    server.stop().await;
}

#[tokio::test]
async fn test_repeated_streams_are_identical() {
    let server = TestServer::start(test_registry()).await;
    let client = reqwest::Client::new();

    let mut bodies = Vec::new();
    for _ in 0..3 {
        let text = client
            .post(server.url("/ticks?stream=true"))
            .json(&json!({ "data": 8 }))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        bodies.push(ndjson_events(&text));
    }

    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    server.stop().await;
}

/// Sets its flag when dropped, i.e. when the flow body ends for any reason
struct StopGuard(Arc<AtomicBool>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_client_disconnect_cancels_invocation() {
    let emitted = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicBool::new(false));

    let mut registry = FlowRegistry::new();
    {
        let emitted = emitted.clone();
        let stopped = stopped.clone();
        registry
            .define_streaming_flow("endless", move |_ctx, _: Value, emitter: Emitter<Tick>| {
                let emitted = emitted.clone();
                let stopped = stopped.clone();
                async move {
                    let _guard = StopGuard(stopped);
                    let mut count = 0;
                    loop {
                        if let Err(err) = emitter.emit(Tick { count }).await {
                            return Err::<(), FlowError>(err);
                        }
                        emitted.fetch_add(1, Ordering::SeqCst);
                        count += 1;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            })
            .unwrap();
    }

    let server = TestServer::start(registry).await;
    let mut response = reqwest::Client::new()
        .post(server.url("/endless?stream=true"))
        .json(&json!({ "data": null }))
        .send()
        .await
        .unwrap();

    let first = response.chunk().await.unwrap().expect("first frame");
    let first: Value = serde_json::from_slice(first.split(|b| *b == b'\n').next().unwrap()).unwrap();
    assert_eq!(first, json!({"type": "chunk", "data": {"count": 0}}));
    drop(response);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !stopped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("flow body ends after the disconnect");

    // No chunk is produced once the body has ended.
    let after_stop = emitted.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(emitted.load(Ordering::SeqCst), after_stop);

    server.stop().await;
}

#[tokio::test]
async fn test_request_timeout_ends_stream_with_deadline_error() {
    let mut registry = FlowRegistry::new();
    registry
        .define_streaming_flow("slow", |_ctx, _: Value, emitter: Emitter<Tick>| async move {
            emitter.emit(Tick { count: 0 }).await?;
            tokio::time::sleep(Duration::from_secs(30)).await;
            emitter.emit(Tick { count: 1 }).await?;
            Ok(())
        })
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        request_timeout_ms: Some(100),
        ..ServerConfig::default()
    };
    let server = FlowServer::new(config, Arc::new(registry));
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    let text = reqwest::Client::new()
        .post(format!("http://{}/slow?stream=true", addr))
        .json(&json!({ "data": null }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let events = ndjson_events(&text);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], json!("chunk"));
    assert_eq!(events[1]["type"], json!("error"));
    assert_eq!(events[1]["error"]["status"], json!("DEADLINE_EXCEEDED"));

    let _ = tx.send(());
    handle.await.unwrap();
}
