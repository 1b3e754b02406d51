//! Integration tests: a real `Client` talking to a real `Server` over the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;

use muxrun::Call;
use muxrun::Client;
use muxrun::ClientConfig;
use muxrun::ClientValue;
use muxrun::Error;
use muxrun::Failure;
use muxrun::MemoryBroker;
use muxrun::Notification;
use muxrun::ObservableId;
use muxrun::Observable;
use muxrun::Publisher;
use muxrun::RequestId;
use muxrun::Router;
use muxrun::Server;
use muxrun::ServerConfig;
use muxrun::ServerHandle;
use muxrun::ServerValue;
use muxrun::Source;
use muxrun::Value;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held: {}", what);
}

async fn next(obs: &mut Observable) -> Notification<ClientValue> {
    tokio::time::timeout(Duration::from_secs(5), obs.next())
        .await
        .expect("timed out waiting for a notification")
        .expect("observable ended without a terminal notification")
}

async fn next_str(obs: &mut Observable) -> String {
    match next(obs).await {
        Notification::Next(Value::String(s)) => s,
        other => panic!("expected a string, got {:?}", other),
    }
}

// --- Methods ---

async fn echo(call: Call) -> anyhow::Result<ServerValue> {
    Ok(call.str_arg(0)?.to_string().into())
}

async fn letters(_: Call) -> anyhow::Result<ServerValue> {
    Ok(Value::Observable(Source::from_values(["A".into(), "B".into()])))
}

async fn explode(_: Call) -> anyhow::Result<ServerValue> {
    anyhow::bail!("insufficient funds")
}

async fn hang(_: Call) -> anyhow::Result<ServerValue> {
    futures::future::pending::<()>().await;
    Ok(Value::Unit)
}

struct Fixture {
    broker: MemoryBroker,
    server: ServerHandle,
    publishers: mpsc::UnboundedReceiver<Publisher>,
}

impl Fixture {
    async fn new() -> Self {
        init_tracing();
        let (tx, publishers) = mpsc::unbounded_channel();
        let slow_tx = tx.clone();

        let router = Router::new()
            .route("echo", echo)
            .route("letters", letters)
            .route("explode", explode)
            .route("hang", hang)
            .route("feed", move |_| {
                let tx = tx.clone();
                async move {
                    let (publisher, source) = Source::channel();
                    tx.send(publisher).map_err(|_| anyhow::anyhow!("test went away"))?;
                    Ok::<ServerValue, anyhow::Error>(source.into())
                }
            })
            .route("slow_feed", move |_| {
                let tx = slow_tx.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    let (publisher, source) = Source::channel();
                    tx.send(publisher).map_err(|_| anyhow::anyhow!("test went away"))?;
                    Ok::<ServerValue, anyhow::Error>(source.into())
                }
            });

        let broker = MemoryBroker::new();
        let server = Server::new(Arc::new(broker.clone()), router, ServerConfig::default())
            .start()
            .await
            .expect("server starts");
        Self { broker, server, publishers }
    }

    async fn client(&self) -> Client {
        self.client_with(ClientConfig::default()).await
    }

    async fn client_with(&self, config: ClientConfig) -> Client {
        Client::connect(Arc::new(self.broker.clone()), config).await.expect("client connects")
    }

    async fn publisher(&mut self) -> Publisher {
        tokio::time::timeout(Duration::from_secs(5), self.publishers.recv())
            .await
            .expect("handler never ran")
            .expect("router dropped")
    }

    fn active(&self) -> usize {
        self.server.tracker().active_count()
    }
}

// ============================================================================
//  CALLS
// ============================================================================

#[tokio::test]
async fn test_call_roundtrip() {
    let fx = Fixture::new().await;
    let client = fx.client().await;

    let reply = client.call("echo", vec!["hello".into()]).await.unwrap();
    assert_eq!(reply.as_str(), Some("hello"));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_independently() {
    let fx = Fixture::new().await;
    let client = fx.client().await;

    let calls = (0..50).map(|i| {
        let client = &client;
        async move { (i, client.call("echo", vec![format!("msg-{}", i).into()]).await) }
    });
    for (i, reply) in futures::future::join_all(calls).await {
        assert_eq!(reply.unwrap().as_str(), Some(format!("msg-{}", i).as_str()));
    }
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_remote_failure_is_distinguishable() {
    let fx = Fixture::new().await;
    let client = fx.client().await;

    let err = client.call("explode", vec![]).await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(err, Error::Remote(Failure::Application("insufficient funds".into())));

    let err = client.call("missing", vec![]).await.unwrap_err();
    assert_eq!(err, Error::Remote(Failure::MethodNotFound("missing".into())));
}

#[tokio::test]
async fn test_timeout_removes_pending_call() {
    let fx = Fixture::new().await;
    let client = fx.client_with(ClientConfig::default().with_call_timeout(Duration::from_millis(50))).await;

    let err = client.call("hang", vec![]).await.unwrap_err();
    assert_eq!(err, Error::Timeout);
    assert!(!err.is_remote());
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_server_is_not_remote() {
    let broker = MemoryBroker::new();
    let client = Client::connect(Arc::new(broker), ClientConfig::default()).await.unwrap();

    let err = client.call("echo", vec!["x".into()]).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(!err.is_remote());
    assert_eq!(client.pending_calls(), 0);
}

// ============================================================================
//  OBSERVABLES
// ============================================================================

#[tokio::test]
async fn test_first_call_first_stream() {
    let fx = Fixture::new().await;
    let client = fx.client().await;

    let (id, pending) = client.submit("letters", vec![]).await.unwrap();
    assert_eq!(id, RequestId(0));

    let mut obs = pending.await.unwrap().into_observable().expect("reply is an observable");
    assert_eq!(obs.id(), ObservableId(0));
    assert_eq!(next_str(&mut obs).await, "A");
    assert_eq!(next_str(&mut obs).await, "B");
    assert!(matches!(next(&mut obs).await, Notification::Completed));
    assert!(obs.next().await.is_none());

    eventually("stream retired", || fx.active() == 0).await;
    assert_eq!(client.open_observables(), 0);
}

#[tokio::test]
async fn test_two_level_nesting_streams_independently() {
    let mut fx = Fixture::new().await;
    let client = fx.client().await;

    let mut outer = client.observe("feed", vec![]).await.unwrap();
    let outer_pub = fx.publisher().await;

    let (inner_pub, inner_source) = Source::channel();
    let emission: ServerValue = Value::List(vec![Value::from("header"), Value::Observable(inner_source)]);
    assert!(outer_pub.next(emission));

    let mut inner = match next(&mut outer).await {
        Notification::Next(Value::List(mut items)) => {
            assert_eq!(items.len(), 2);
            items.pop().and_then(Value::into_observable).expect("second item is an observable")
        }
        other => panic!("unexpected {:?}", other),
    };
    assert_ne!(inner.id(), outer.id());
    assert_eq!(fx.active(), 2);

    // Closing the parent leaves the child running.
    drop(outer);
    tokio::time::timeout(Duration::from_secs(5), outer_pub.closed()).await.expect("parent retired");
    assert_eq!(fx.active(), 1);

    assert!(inner_pub.next("still here"));
    assert_eq!(next_str(&mut inner).await, "still here");
    inner_pub.complete();
    assert!(matches!(next(&mut inner).await, Notification::Completed));
    eventually("child retired", || fx.active() == 0).await;
}

#[tokio::test]
async fn test_dropping_observable_closes_it_on_server() {
    let mut fx = Fixture::new().await;
    let client = fx.client().await;

    let mut obs = client.observe("feed", vec![]).await.unwrap();
    let publisher = fx.publisher().await;
    assert!(publisher.next(1u64));
    assert!(matches!(next(&mut obs).await, Notification::Next(Value::U64(1))));

    drop(obs);
    tokio::time::timeout(Duration::from_secs(5), publisher.closed()).await.expect("source never dropped");
    assert!(!publisher.next(2u64));
    assert_eq!(fx.active(), 0);
    assert_eq!(client.open_observables(), 0);
}

#[tokio::test]
async fn test_stream_failure_reaches_client() {
    let mut fx = Fixture::new().await;
    let client = fx.client().await;

    let mut obs = client.observe("feed", vec![]).await.unwrap();
    let publisher = fx.publisher().await;
    publisher.error(Failure::Application("vault locked".into()));

    match next(&mut obs).await {
        Notification::Error(failure) => assert_eq!(failure, Failure::Application("vault locked".into())),
        other => panic!("unexpected {:?}", other),
    }
    assert!(obs.next().await.is_none());
    eventually("stream retired", || fx.active() == 0).await;
}

#[tokio::test]
async fn test_stale_reply_closes_its_observables() {
    let mut fx = Fixture::new().await;
    let client = fx.client_with(ClientConfig::default().with_call_timeout(Duration::from_millis(20))).await;

    assert_eq!(client.call("slow_feed", vec![]).await.unwrap_err(), Error::Timeout);

    // The reply still arrives; nobody wants it, so its stream is closed again.
    let publisher = fx.publisher().await;
    tokio::time::timeout(Duration::from_secs(5), publisher.closed()).await.expect("stale stream never closed");
    eventually("stale stream retired", || fx.active() == 0).await;
    assert_eq!(client.open_observables(), 0);
}

// ============================================================================
//  DISCONNECTS
// ============================================================================

#[tokio::test]
async fn test_client_close_retires_everything_on_server() {
    let mut fx = Fixture::new().await;
    let client = fx.client().await;
    let other = fx.client().await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        handles.push(client.observe("feed", vec![]).await.unwrap());
    }
    let _keep = other.observe("feed", vec![]).await.unwrap();
    let mut publishers = Vec::new();
    for _ in 0..11 {
        publishers.push(fx.publisher().await);
    }
    assert_eq!(fx.active(), 11);

    let reply_to = client.reply_address().to_string();
    client.close().await.unwrap();
    assert!(!fx.broker.has_queue(&reply_to));

    eventually("closed client's streams retired", || fx.active() == 1).await;
    assert_eq!(fx.server.tracker().active_for(&reply_to), 0);

    // Handles outliving their client report the disconnect.
    for mut handle in handles {
        assert!(matches!(next(&mut handle).await, Notification::Error(Failure::Disconnected(_))));
    }
}

#[tokio::test]
async fn test_server_departure_fails_client() {
    let mut fx = Fixture::new().await;
    let client = fx.client().await;

    let mut obs = client.observe("feed", vec![]).await.unwrap();
    let _publisher = fx.publisher().await;
    let (_, pending) = client.submit("hang", vec![]).await.unwrap();

    fx.server.shutdown().await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), pending).await.expect("call never failed").unwrap_err();
    assert!(matches!(err, Error::ConnectionLost(_)));
    assert!(!err.is_remote());
    assert!(matches!(next(&mut obs).await, Notification::Error(Failure::Disconnected(_))));
    assert!(!client.is_connected());
    assert!(matches!(client.call("echo", vec!["x".into()]).await, Err(Error::ConnectionLost(_))));
}

#[test]
fn test_drop_outside_runtime_leaves_queue_behind() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let broker = MemoryBroker::new();
    let client = runtime
        .block_on(Client::connect(Arc::new(broker.clone()), ClientConfig::default()))
        .unwrap();
    let reply_to = client.reply_address().to_string();

    drop(client);
    assert!(broker.has_queue(&reply_to));

    // Inside a runtime the queue is removed on drop.
    runtime.block_on(async {
        let client = Client::connect(Arc::new(broker.clone()), ClientConfig::default()).await.unwrap();
        let reply_to = client.reply_address().to_string();
        drop(client);
        eventually("reply queue deleted", || !broker.has_queue(&reply_to)).await;
    });
}
