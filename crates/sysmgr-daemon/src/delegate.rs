//! Client side of the web runtime connection.
//!
//! ```text
//!  RuntimeDelegate call --(Outbound)--> connection task --line--> runtime
//!          ^                                  |
//!          +---------(oneshot reply)----------+ <--line-- reply {token}
//!                                             +--------> EventSink <-- event {start|close}
//! ```
//!
//! [`DelegateClient`] is the handle the supervisor calls through;
//! [`run_connection`] owns the socket, reconnects with backoff and reports
//! connectivity as `DelegateConnected` / `DelegateDisconnected`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sysmgr_core::TransportError;
use sysmgr_core::backoff::{Backoff, BackoffConfig};
use sysmgr_core::delegate::{
    CacheScope, RuntimeDelegate, UrlLaunchRequest, WebAppEntry, WebLaunchRequest,
};
use sysmgr_core::event::{EventSink, LoopEvent};
use sysmgr_core::ipc::{
    AppEventKind, DelegateCall, DelegateMessage, DelegateRequest, encode_line,
    parse_delegate_message,
};
use sysmgr_core::process::ProcessId;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::line::read_line;

/// Service name used in transport errors.
pub const DELEGATE_SERVICE: &str = "webappmanager";

type ReplyResult = Result<Option<Vec<WebAppEntry>>, TransportError>;

/// One request waiting to be written.
#[derive(Debug)]
struct Outbound {
    request: DelegateRequest,
    reply: oneshot::Sender<ReplyResult>,
}

#[derive(Debug)]
struct Shared {
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    next_token: AtomicU64,
    call_timeout: Duration,
}

/// [`RuntimeDelegate`] over the runtime's socket. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DelegateClient {
    shared: Arc<Shared>,
}

impl DelegateClient {
    /// Creates a disconnected client. Calls fail with
    /// [`TransportError::Unavailable`] until [`run_connection`] attaches it.
    #[must_use]
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                outbound: Mutex::new(None),
                next_token: AtomicU64::new(1),
                call_timeout,
            }),
        }
    }

    /// Whether a connection is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.sender().is_some()
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Outbound>> {
        self.shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn attach(&self, sender: mpsc::UnboundedSender<Outbound>) {
        *self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    fn detach(&self) {
        self.shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn next_token(&self) -> u64 {
        self.shared.next_token.fetch_add(1, Ordering::Relaxed)
    }

    async fn call(&self, call: DelegateCall) -> ReplyResult {
        let sender = self
            .sender()
            .ok_or_else(|| TransportError::unavailable(DELEGATE_SERVICE))?;
        let method = call.method();
        let request = DelegateRequest {
            token: self.next_token(),
            call,
        };
        let (reply, response) = oneshot::channel();
        sender
            .send(Outbound { request, reply })
            .map_err(|_| TransportError::unavailable(DELEGATE_SERVICE))?;

        match tokio::time::timeout(self.shared.call_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::unavailable(DELEGATE_SERVICE)),
            Err(_) => {
                warn!(method, "web runtime call timed out");
                Err(TransportError::Timeout)
            },
        }
    }
}

#[async_trait]
impl RuntimeDelegate for DelegateClient {
    async fn launch_web(&self, request: WebLaunchRequest) -> Result<(), TransportError> {
        self.call(DelegateCall::LaunchApp(request)).await.map(drop)
    }

    async fn kill_web(&self, process_id: ProcessId) -> Result<(), TransportError> {
        self.call(DelegateCall::KillApp { process_id })
            .await
            .map(drop)
    }

    async fn relaunch_web(&self, app_id: String, params: String) -> Result<(), TransportError> {
        self.call(DelegateCall::Relaunch { app_id, params })
            .await
            .map(drop)
    }

    async fn list_running(&self) -> Result<Vec<WebAppEntry>, TransportError> {
        Ok(self
            .call(DelegateCall::ListRunningApps)
            .await?
            .unwrap_or_default())
    }

    async fn launch_url(&self, request: UrlLaunchRequest) -> Result<(), TransportError> {
        self.call(DelegateCall::LaunchUrl(request)).await.map(drop)
    }

    async fn clear_memory_caches(&self, scope: CacheScope) -> Result<(), TransportError> {
        self.call(DelegateCall::from(scope)).await.map(drop)
    }
}

/// Keeps a connection to the runtime at `socket` until the session loop
/// stops.
pub async fn run_connection(
    client: DelegateClient,
    socket: PathBuf,
    reconnect: BackoffConfig,
    sink: EventSink,
) {
    let mut backoff = Backoff::new(reconnect);

    while !sink.is_closed() {
        match UnixStream::connect(&socket).await {
            Ok(stream) => {
                backoff.reset();
                info!(socket = %socket.display(), "connected to web runtime");

                let (sender, outbound) = mpsc::unbounded_channel();
                client.attach(sender);
                sink.send(LoopEvent::DelegateConnected);

                let outcome = serve(stream, outbound, &client, &sink).await;
                client.detach();
                sink.send(LoopEvent::DelegateDisconnected);
                match outcome {
                    Ok(()) => warn!("web runtime closed the connection"),
                    Err(error) => warn!(%error, "web runtime connection lost"),
                }
            },
            Err(error) => {
                debug!(socket = %socket.display(), %error, "web runtime not reachable");
            },
        }

        let delay = backoff.next_delay();
        debug!(?delay, attempt = backoff.attempts(), "reconnecting to web runtime");
        tokio::time::sleep(delay).await;
    }
}

async fn serve(
    stream: UnixStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    client: &DelegateClient,
    sink: &EventSink,
) -> Result<(), TransportError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut pending: HashMap<u64, oneshot::Sender<ReplyResult>> = HashMap::new();

    // Replies to this one are not awaited.
    write_request(
        &mut write,
        &DelegateRequest {
            token: client.next_token(),
            call: DelegateCall::RegisterForAppEvents,
        },
    )
    .await?;

    let mut line = Vec::new();
    let result = loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(Outbound { request, reply }) = next else {
                    break Ok(());
                };
                if let Err(error) = write_request(&mut write, &request).await {
                    let _ = reply.send(Err(TransportError::unavailable(DELEGATE_SERVICE)));
                    break Err(error);
                }
                pending.retain(|_, waiting| !waiting.is_closed());
                pending.insert(request.token, reply);
            },
            read = read_line(&mut reader, &mut line) => {
                match read {
                    Ok(0) => break Ok(()),
                    Ok(_) => {
                        dispatch(&line, &mut pending, sink);
                        line.clear();
                    },
                    Err(error) => break Err(error),
                }
            },
        }
    };

    for (_, waiting) in pending.drain() {
        let _ = waiting.send(Err(TransportError::unavailable(DELEGATE_SERVICE)));
    }
    result
}

async fn write_request(
    write: &mut OwnedWriteHalf,
    request: &DelegateRequest,
) -> Result<(), TransportError> {
    debug!(token = request.token, method = request.call.method(), "web runtime request");
    write.write_all(&encode_line(request)?).await?;
    Ok(())
}

fn dispatch(
    line: &[u8],
    pending: &mut HashMap<u64, oneshot::Sender<ReplyResult>>,
    sink: &EventSink,
) {
    let message = match parse_delegate_message(line) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, "discarding malformed message from web runtime");
            return;
        },
    };

    match message {
        DelegateMessage::Event(event) => {
            let loop_event = match event.event {
                AppEventKind::Start => LoopEvent::DelegateAppStarted {
                    app_id: event.app_id,
                    process_id: event.process_id,
                },
                AppEventKind::Close => LoopEvent::DelegateAppClosed {
                    process_id: event.process_id,
                },
            };
            sink.send(loop_event);
        },
        DelegateMessage::Reply(reply) => match pending.remove(&reply.token) {
            Some(waiting) => {
                let _ = waiting.send(reply.into_result());
            },
            None => debug!(token = reply.token, "reply without a waiting caller"),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    struct FakeRuntime {
        lines: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
        write: OwnedWriteHalf,
    }

    impl FakeRuntime {
        async fn accept(listener: &UnixListener) -> Self {
            let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
                .await
                .unwrap()
                .unwrap();
            let (read, write) = stream.into_split();
            Self {
                lines: BufReader::new(read).lines(),
                write,
            }
        }

        async fn request(&mut self) -> Value {
            let line = tokio::time::timeout(WAIT, self.lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, message: Value) {
            let mut line = serde_json::to_vec(&message).unwrap();
            line.push(b'\n');
            self.write.write_all(&line).await.unwrap();
        }
    }

    async fn next_event(events: &mut UnboundedReceiver<LoopEvent>) -> LoopEvent {
        tokio::time::timeout(WAIT, events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn setup() -> (tempfile::TempDir, PathBuf, UnixListener) {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("webappmgr.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        (dir, socket, listener)
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_calls_are_correlated_by_token() {
        let (_dir, socket, listener) = setup();
        let (sink, mut events) = EventSink::channel();
        let client = DelegateClient::new(WAIT);
        tokio::spawn(run_connection(
            client.clone(),
            socket,
            BackoffConfig::default(),
            sink,
        ));

        let mut runtime = FakeRuntime::accept(&listener).await;
        assert_eq!(runtime.request().await["method"], json!("registerForAppEvents"));
        assert!(matches!(next_event(&mut events).await, LoopEvent::DelegateConnected));

        let caller = client.clone();
        let listing = tokio::spawn(async move { caller.list_running().await });
        let request = runtime.request().await;
        assert_eq!(request["method"], json!("listRunningApps"));

        runtime
            .send(json!({"token": request["token"], "returnValue": true,
                "apps": [{"appId": "com.palm.app.browser", "processId": 1003}]}))
            .await;
        let apps = listing.await.unwrap().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].process_id, ProcessId::new(1003));

        runtime
            .send(json!({"event": "close", "processId": 1003}))
            .await;
        assert!(matches!(
            next_event(&mut events).await,
            LoopEvent::DelegateAppClosed { process_id } if process_id == ProcessId::new(1003)
        ));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_rejected_launch_is_reported() {
        let (_dir, socket, listener) = setup();
        let (sink, mut events) = EventSink::channel();
        let client = DelegateClient::new(WAIT);
        tokio::spawn(run_connection(
            client.clone(),
            socket,
            BackoffConfig::default(),
            sink,
        ));
        let mut runtime = FakeRuntime::accept(&listener).await;
        runtime.request().await;
        next_event(&mut events).await;

        let caller = client.clone();
        let launch = tokio::spawn(async move {
            caller
                .launch_web(WebLaunchRequest {
                    app_id: "com.palm.app.maps".to_string(),
                    process_id: ProcessId::new(4),
                    entry_point: "index.html".to_string(),
                    params: String::new(),
                    launching_app_id: None,
                })
                .await
        });
        let request = runtime.request().await;
        assert_eq!(request["processId"], json!(4));
        runtime
            .send(json!({"token": request["token"], "returnValue": false,
                "errorText": "app not installed"}))
            .await;

        assert!(matches!(
            launch.await.unwrap(),
            Err(TransportError::Rejected { reason }) if reason == "app not installed"
        ));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_cache_clear_and_url_launch_reach_runtime() {
        let (_dir, socket, listener) = setup();
        let (sink, mut events) = EventSink::channel();
        let client = DelegateClient::new(WAIT);
        tokio::spawn(run_connection(
            client.clone(),
            socket,
            BackoffConfig::default(),
            sink,
        ));
        let mut runtime = FakeRuntime::accept(&listener).await;
        runtime.request().await;
        next_event(&mut events).await;

        let caller = client.clone();
        let clear = tokio::spawn(async move {
            caller
                .clear_memory_caches(CacheScope::App("com.palm.app.browser".to_string()))
                .await
        });
        let request = runtime.request().await;
        assert_eq!(request["method"], json!("clearMemoryCaches"));
        assert_eq!(request["appId"], json!("com.palm.app.browser"));
        assert!(request.get("processId").is_none());
        runtime
            .send(json!({"token": request["token"], "returnValue": true}))
            .await;
        clear.await.unwrap().unwrap();

        let caller = client.clone();
        let open = tokio::spawn(async move {
            caller
                .launch_url(UrlLaunchRequest {
                    url: "http://example.com".to_string(),
                    window_type: sysmgr_core::delegate::WindowType::Card,
                    process_id: ProcessId::new(21),
                    params: String::new(),
                    launching_app_id: None,
                })
                .await
        });
        let request = runtime.request().await;
        assert_eq!(request["method"], json!("launchUrl"));
        assert_eq!(request["windowType"], json!("card"));
        assert_eq!(request["processId"], json!(21));
        runtime
            .send(json!({"token": request["token"], "returnValue": true}))
            .await;
        open.await.unwrap().unwrap();
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_disconnect_fails_pending_calls() {
        let (_dir, socket, listener) = setup();
        let (sink, mut events) = EventSink::channel();
        let client = DelegateClient::new(WAIT);
        tokio::spawn(run_connection(
            client.clone(),
            socket,
            BackoffConfig::default(),
            sink,
        ));
        let mut runtime = FakeRuntime::accept(&listener).await;
        runtime.request().await;
        next_event(&mut events).await;

        let caller = client.clone();
        let kill = tokio::spawn(async move { caller.kill_web(ProcessId::new(9)).await });
        assert_eq!(runtime.request().await["method"], json!("killApp"));
        drop(runtime);

        assert!(matches!(
            kill.await.unwrap(),
            Err(TransportError::Unavailable { .. })
        ));
        assert!(matches!(
            next_event(&mut events).await,
            LoopEvent::DelegateDisconnected
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_unanswered_call_times_out() {
        let (_dir, socket, listener) = setup();
        let (sink, mut events) = EventSink::channel();
        let client = DelegateClient::new(Duration::from_millis(100));
        tokio::spawn(run_connection(
            client.clone(),
            socket,
            BackoffConfig::default(),
            sink,
        ));
        let mut runtime = FakeRuntime::accept(&listener).await;
        runtime.request().await;
        next_event(&mut events).await;

        let result = client
            .relaunch_web("com.palm.app.email".to_string(), "{}".to_string())
            .await;
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert_eq!(runtime.request().await["method"], json!("relaunch"));
    }

    #[tokio::test]
    async fn test_disconnected_client_is_unavailable() {
        let client = DelegateClient::new(WAIT);
        assert!(matches!(
            client.list_running().await,
            Err(TransportError::Unavailable { .. })
        ));
    }
}
