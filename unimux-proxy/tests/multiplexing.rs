//! End-to-end tests running several supervised instances against a fake
//! downstream tool on a shared loopback port.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use unimux_protocol::{HeaderCodec, Message};
use unimux_proxy::{AppConfig, Downstream, HubExit, LocalCaller, Outcome, Supervisor};
use unimux_utils::Result;

const STEP: Duration = Duration::from_secs(10);

/// Counters shared by every launch of the fake tool
#[derive(Clone, Default)]
struct FakeTool {
    launches: Arc<AtomicUsize>,
    handshakes: Arc<AtomicUsize>,
}

impl FakeTool {
    fn launcher(&self) -> impl Fn() -> Result<Downstream> + Send + Sync + 'static {
        let tool = self.clone();
        move || {
            tool.launches.fetch_add(1, Ordering::SeqCst);
            let (hub_out, tool_in) = tokio::io::duplex(64 * 1024);
            let (tool_out, hub_in) = tokio::io::duplex(64 * 1024);
            tokio::spawn(serve(tool.clone(), tool_in, tool_out));
            Ok(Downstream::from_io(hub_in, hub_out))
        }
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

/// Echo `params` back; `notify` also emits an unsolicited message first
/// and `hang` is never answered
///
/// Like a real tool, every call before `initialize` is rejected.
async fn serve(tool: FakeTool, input: DuplexStream, output: DuplexStream) {
    let mut requests = FramedRead::new(input, HeaderCodec::new());
    let mut replies = FramedWrite::new(output, HeaderCodec::new());
    let mut initialized = false;

    while let Some(Ok(msg)) = requests.next().await {
        let Some(id) = msg.id().cloned() else {
            continue;
        };

        if !initialized && msg.method() != Some("initialize") {
            let rejected = Message::new(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32002, "message": "not initialized"}
            }));
            if replies.send(rejected).await.is_err() {
                return;
            }
            continue;
        }

        let result = match msg.method() {
            Some("initialize") => {
                initialized = true;
                tool.handshakes.fetch_add(1, Ordering::SeqCst);
                json!({"protocolVersion": "2024-11-05", "serverInfo": {"name": "fake"}})
            }
            Some("hang") => continue,
            Some("notify") => {
                let note = Message::new(json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": {"text": "hello"}
                }));
                if replies.send(note).await.is_err() {
                    return;
                }
                json!("sent")
            }
            _ => msg.as_value().get("params").cloned().unwrap_or(Value::Null),
        };

        if replies.send(Message::response(id, result)).await.is_err() {
            return;
        }
    }
}

/// The far side of one process's stdin/stdout
struct Caller {
    input: Option<FramedWrite<DuplexStream, HeaderCodec>>,
    output: FramedRead<DuplexStream, HeaderCodec>,
}

impl Caller {
    fn new() -> (LocalCaller, Self) {
        let (caller_in, proxy_in) = tokio::io::duplex(64 * 1024);
        let (proxy_out, caller_out) = tokio::io::duplex(64 * 1024);
        (
            LocalCaller::from_io(proxy_in, proxy_out),
            Self {
                input: Some(FramedWrite::new(caller_in, HeaderCodec::new())),
                output: FramedRead::new(caller_out, HeaderCodec::new()),
            },
        )
    }

    async fn send(&mut self, id: Value, method: &str, params: Value) {
        let msg = Message::new(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }));
        self.input.as_mut().unwrap().send(msg).await.unwrap();
    }

    async fn recv(&mut self) -> Message {
        tokio::time::timeout(STEP, self.output.next())
            .await
            .expect("timed out waiting for a message")
            .unwrap()
            .unwrap()
    }

    /// Send a request and wait for its reply, skipping notifications
    async fn call(&mut self, id: Value, method: &str, params: Value) -> Message {
        self.send(id.clone(), method, params).await;
        loop {
            let msg = self.recv().await;
            if msg.id() == Some(&id) {
                return msg;
            }
        }
    }

    fn close(&mut self) {
        self.input = None;
    }
}

async fn test_config() -> AppConfig {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = AppConfig::default();
    config.hub.port = port;
    config.resolver.connect_timeout_ms = 500;
    config.resolver.race_backoff_min_ms = 20;
    config.resolver.race_backoff_max_ms = 60;
    config.resolver.reconnect_delay_ms = 20;
    config
}

fn start(
    config: &AppConfig,
    tool: &FakeTool,
    cancel: CancellationToken,
) -> (JoinHandle<Outcome>, Caller) {
    let (local, caller) = Caller::new();
    let supervisor = Supervisor::new(config.clone(), tool.launcher());
    let handle = tokio::spawn(async move { supervisor.run(local, cancel).await });
    (handle, caller)
}

async fn finish(handle: JoinHandle<Outcome>) -> Outcome {
    tokio::time::timeout(STEP, handle)
        .await
        .expect("instance did not stop")
        .unwrap()
}

#[tokio::test]
async fn test_handshake_reaches_tool_once() {
    let config = test_config().await;
    let tool = FakeTool::default();

    let (hub, mut first) = start(&config, &tool, CancellationToken::new());
    let reply = first.call(json!(0), "initialize", json!({})).await;
    assert_eq!(reply.result().unwrap()["serverInfo"]["name"], json!("fake"));

    let (client, mut second) = start(&config, &tool, CancellationToken::new());
    let reply = second.call(json!("init"), "initialize", json!({})).await;

    assert_eq!(reply.id(), Some(&json!("init")));
    assert_eq!(reply.result().unwrap()["serverInfo"]["name"], json!("fake"));
    assert_eq!(tool.handshakes(), 1);
    assert_eq!(tool.launches(), 1);

    second.close();
    assert_eq!(finish(client).await, Outcome::ClientFinished);
    first.close();
    assert_eq!(finish(hub).await, Outcome::Hub(HubExit::SessionEnded));
}

#[tokio::test]
async fn test_same_ids_from_different_processes() {
    let config = test_config().await;
    let tool = FakeTool::default();

    let (hub, mut first) = start(&config, &tool, CancellationToken::new());
    first.call(json!(0), "initialize", json!({})).await;
    let (client, mut second) = start(&config, &tool, CancellationToken::new());
    second.call(json!(0), "initialize", json!({})).await;

    first.send(json!(1), "echo", json!({"from": "first"})).await;
    second.send(json!(1), "echo", json!({"from": "second"})).await;

    let a = first.recv().await;
    let b = second.recv().await;
    assert_eq!(a.id(), Some(&json!(1)));
    assert_eq!(a.result(), Some(&json!({"from": "first"})));
    assert_eq!(b.id(), Some(&json!(1)));
    assert_eq!(b.result(), Some(&json!({"from": "second"})));

    second.close();
    first.close();
    finish(client).await;
    finish(hub).await;
}

#[tokio::test]
async fn test_unsolicited_messages_broadcast() {
    let config = test_config().await;
    let tool = FakeTool::default();

    let (hub, mut first) = start(&config, &tool, CancellationToken::new());
    first.call(json!(0), "initialize", json!({})).await;
    let (client, mut second) = start(&config, &tool, CancellationToken::new());
    second.call(json!(0), "initialize", json!({})).await;

    second.send(json!(5), "notify", json!({})).await;

    let note = second.recv().await;
    assert_eq!(note.method(), Some("notifications/message"));
    let reply = second.recv().await;
    assert_eq!(reply.id(), Some(&json!(5)));

    let note = first.recv().await;
    assert_eq!(note.method(), Some("notifications/message"));

    second.close();
    first.close();
    finish(client).await;
    finish(hub).await;
}

#[tokio::test]
async fn test_hub_outlives_its_caller_while_clients_remain() {
    let config = test_config().await;
    let tool = FakeTool::default();

    let (hub, mut first) = start(&config, &tool, CancellationToken::new());
    first.call(json!(0), "initialize", json!({})).await;
    let (client, mut second) = start(&config, &tool, CancellationToken::new());
    second.call(json!(0), "initialize", json!({})).await;

    first.close();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!hub.is_finished());

    // The hub keeps serving its client
    let reply = second.call(json!(9), "echo", json!("still here")).await;
    assert_eq!(reply.result(), Some(&json!("still here")));

    second.close();
    assert_eq!(finish(client).await, Outcome::ClientFinished);
    assert_eq!(finish(hub).await, Outcome::Hub(HubExit::SessionEnded));
}

#[tokio::test]
async fn test_simultaneous_start_elects_one_hub() {
    let config = test_config().await;
    let tool = FakeTool::default();

    let mut instances: Vec<_> = (0..3)
        .map(|_| start(&config, &tool, CancellationToken::new()))
        .collect();

    for (n, (_, caller)) in instances.iter_mut().enumerate() {
        let reply = caller.call(json!(n), "initialize", json!({})).await;
        assert_eq!(reply.id(), Some(&json!(n)));
        assert!(reply.result().is_some());
    }
    assert_eq!(tool.launches(), 1);
    assert_eq!(tool.handshakes(), 1);

    for (_, caller) in instances.iter_mut() {
        caller.close();
    }

    let mut hubs = 0;
    for (handle, _) in instances {
        match finish(handle).await {
            Outcome::Hub(HubExit::SessionEnded) => hubs += 1,
            Outcome::ClientFinished => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(hubs, 1);
}

#[tokio::test]
async fn test_client_takes_over_when_hub_dies() {
    let config = test_config().await;
    let tool = FakeTool::default();

    let hub_cancel = CancellationToken::new();
    let (hub, mut first) = start(&config, &tool, hub_cancel.clone());
    first.call(json!(0), "initialize", json!({})).await;
    let (survivor, mut second) = start(&config, &tool, CancellationToken::new());
    second.call(json!(0), "initialize", json!({})).await;

    // Outstanding when the hub dies; its reply is lost with the hub
    second.send(json!(1), "hang", json!({})).await;
    let echo = second.call(json!(2), "echo", json!("before")).await;
    assert_eq!(echo.result(), Some(&json!("before")));

    hub_cancel.cancel();
    assert_eq!(finish(hub).await, Outcome::Hub(HubExit::Cancelled));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The fresh tool only answers because the survivor replayed its
    // handshake after taking over
    let reply = second.call(json!(3), "echo", json!("recovered")).await;
    assert!(reply.as_value().get("error").is_none());
    assert_eq!(reply.result(), Some(&json!("recovered")));
    assert_eq!(tool.launches(), 2);
    assert_eq!(tool.handshakes(), 2);

    second.close();
    assert_eq!(finish(survivor).await, Outcome::Hub(HubExit::SessionEnded));
}
