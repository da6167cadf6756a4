//! Drives a real `Session` through the control socket with the daemon's own
//! adapters: `OsLauncher` spawns a real child, the reaper reports its exit.
//!
//! The web runtime and bus services are absent, so every outbound call
//! fails as unavailable and is only logged.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use sysmgr_core::app::{AppDescriptor, AppKind, StaticCatalog};
use sysmgr_core::config::{PathsConfig, SysmgrConfig};
use sysmgr_core::event::LoopEvent;
use sysmgr_core::memory::ProcStatusSampler;
use sysmgr_core::process::OsLauncher;
use sysmgr_core::session::{Session, SessionParts};
use sysmgr_daemon::bus::BusClient;
use sysmgr_daemon::delegate::DelegateClient;
use sysmgr_daemon::{reaper, server};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

const WAIT: Duration = Duration::from_secs(5);

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Client {
    async fn connect(path: &Path) -> Self {
        let (read, write) = UnixStream::connect(path).await.unwrap().into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn call(&mut self, request: Value) -> Value {
        let mut line = serde_json::to_vec(&request).unwrap();
        line.push(b'\n');
        self.write.write_all(&line).await.unwrap();
        let reply = tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str(&reply).unwrap()
    }
}

fn config(root: &Path) -> SysmgrConfig {
    let mut sleeper = AppDescriptor::new("com.example.sleeper", AppKind::Native, "sleep");
    sleeper.args = vec!["30".to_string()];

    SysmgrConfig {
        paths: PathsConfig {
            preferences_dir: root.join("preferences"),
            suspend_marker: root.join("suspend-allowed"),
            runtime_dir: root.join("session"),
            bus_dir: root.join("bus"),
            control_socket: root.join("sysmgr.sock"),
            ..PathsConfig::default()
        },
        apps: vec![sleeper],
        ..SysmgrConfig::default()
    }
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn launch_suspend_list_and_kill_a_native_application() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let sigchld = reaper::child_exits().unwrap();
    let session = Session::new(
        &config,
        SessionParts {
            catalog: Arc::new(StaticCatalog::new(config.apps.clone())),
            launcher: Box::new(OsLauncher::new(&config.paths, &config.supervisor)),
            sampler: Box::new(ProcStatusSampler::default()),
            delegate: Arc::new(DelegateClient::new(Duration::from_millis(200))),
            services: Arc::new(BusClient::new(
                &config.paths.bus_dir,
                Duration::from_millis(200),
            )),
        },
    );
    let sink = session.sink();
    tokio::spawn(reaper::forward_child_exits(sigchld, sink.clone()));
    let listener = server::bind(&config.paths.control_socket).unwrap();
    tokio::spawn(server::serve(listener, sink.clone()));
    let session_task = tokio::spawn(session.run());

    let mut client = Client::connect(&config.paths.control_socket).await;

    let status = client.call(json!({"method": "getStatus"})).await;
    assert_eq!(status["state"], json!("startup"));

    let launched = client
        .call(json!({"method": "launch", "appId": "com.example.sleeper"}))
        .await;
    assert_eq!(launched["returnValue"], json!(true));
    let process_id = launched["processId"].clone();

    // A second launch is a relaunch of the same instance.
    let again = client
        .call(json!({"method": "launch", "appId": "com.example.sleeper"}))
        .await;
    assert_eq!(again["processId"], process_id);

    let listed = client.call(json!({"method": "listRunning"})).await;
    let running = listed["running"].as_array().unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0]["appId"], json!("com.example.sleeper"));
    assert!(running[0]["pid"].as_u64().unwrap() > 0);

    // A stopped child still ends on kill: SIGCONT follows the SIGTERM.
    let suspended = client
        .call(json!({"method": "suspendApp", "appId": "com.example.sleeper"}))
        .await;
    assert_eq!(suspended, json!({"returnValue": true}));
    let listed = client.call(json!({"method": "listRunning"})).await;
    assert_eq!(listed["running"][0]["suspended"], json!(true));

    let killed = client
        .call(json!({"method": "killApp", "appId": "com.example.sleeper"}))
        .await;
    assert_eq!(killed, json!({"returnValue": true}));

    // SIGTERM ends `sleep`; the reaper turns SIGCHLD into a registry update.
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let listed = client.call(json!({"method": "listRunning"})).await;
        if listed["running"].as_array().unwrap().is_empty() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "child never reaped");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let missing = client
        .call(json!({"method": "killApp", "appId": "com.example.sleeper"}))
        .await;
    assert_eq!(missing["errorCode"], json!("resource_not_found"));

    sink.send(LoopEvent::Shutdown);
    tokio::time::timeout(WAIT, session_task)
        .await
        .unwrap()
        .unwrap();
}
