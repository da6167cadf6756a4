//! End-to-end tests driving a full `Session` with fake collaborators.
//!
//! ```text
//! test --LoopEvent--> Session --> BootSequencer / ProcessSupervisor
//!                         |
//!                         +--> Launcher / Runtime / Services (fakes)
//! ```

mod common;

use std::time::Duration;

use common::{Fixture, pump};
use sysmgr_core::app::{AppDescriptor, AppKind};
use sysmgr_core::boot::{BootEvent, BootPhase};
use sysmgr_core::config::BootConfig;
use sysmgr_core::event::{ControlCommand, LoopEvent};
use sysmgr_core::memory::SystemMemoryState;
use sysmgr_core::process::{ProcessId, ProcessSignal, SupervisorError};
use sysmgr_core::session::Session;
use tokio::sync::oneshot;

fn catalog() -> Vec<AppDescriptor> {
    vec![
        AppDescriptor::new("org.webosports.app.firstuse", AppKind::Web, "index.html"),
        AppDescriptor::new("com.palm.launcher", AppKind::Native, "/usr/bin/luna-launcher"),
        AppDescriptor::new(
            "org.webosports.app.systemui",
            AppKind::Native,
            "/usr/bin/luna-systemui",
        ),
        AppDescriptor::new("com.example.game", AppKind::Native, "/usr/bin/game")
            .with_required_memory(100),
        AppDescriptor::new("com.palm.app.browser", AppKind::Web, "index.html"),
    ]
}

fn boot_config() -> BootConfig {
    BootConfig {
        system_ui_app: Some("org.webosports.app.systemui".to_string()),
        ..BootConfig::default()
    }
}

async fn bring_up(session: &mut Session) {
    session.start();
    session.handle(LoopEvent::Boot(BootEvent::CompositorAvailable));
    session.handle(LoopEvent::DelegateConnected);
    pump(session).await;
}

async fn launch(session: &mut Session, app_id: &str) -> Result<ProcessId, SupervisorError> {
    let (reply, rx) = oneshot::channel();
    session.handle(LoopEvent::Control(ControlCommand::Launch {
        app_id: app_id.to_string(),
        params: String::new(),
        reply,
    }));
    rx.await.unwrap()
}

#[tokio::test]
async fn fresh_device_goes_through_first_use_into_normal() {
    let fixture = Fixture::new(catalog(), boot_config());
    let mut session = fixture.session();

    bring_up(&mut session).await;
    assert_eq!(session.phase(), BootPhase::FirstUse);
    assert_eq!(fixture.runtime.launches.lock().unwrap().len(), 1);
    assert!(fixture.launcher.spawned().is_empty());
    assert_eq!(
        fixture.services.log(),
        vec!["acquire_display_lock org.webosports.bootmgr"]
    );

    // The first-use app finishes and writes its marker.
    fixture.touch_marker(&fixture.config.paths.first_use_marker_path());
    session.handle(LoopEvent::MarkersChanged);
    pump(&mut session).await;

    // Account creation wrote the profile marker; the watcher reports it.
    session.handle(LoopEvent::MarkersChanged);
    pump(&mut session).await;

    assert_eq!(session.phase(), BootPhase::Normal);
    assert_eq!(
        fixture.services.log(),
        vec![
            "acquire_display_lock org.webosports.bootmgr",
            "create_local_account",
            "run_configurator",
            "release_display_lock org.webosports.bootmgr",
        ]
    );
    assert_eq!(
        fixture.launcher.spawned(),
        vec!["com.palm.launcher", "org.webosports.app.systemui"]
    );
    assert_eq!(fixture.runtime.kills.lock().unwrap().len(), 1);
    assert!(fixture.config.paths.suspend_marker.exists());
}

#[tokio::test]
async fn provisioned_device_boots_straight_to_normal() {
    let fixture = Fixture::new(catalog(), boot_config());
    fixture.touch_marker(&fixture.config.paths.first_use_marker_path());
    fixture.touch_marker(&fixture.config.paths.profile_marker_path());
    let mut session = fixture.session();

    bring_up(&mut session).await;

    assert_eq!(session.phase(), BootPhase::Normal);
    assert!(fixture.runtime.launches.lock().unwrap().is_empty());
    assert!(session.supervisor().is_running("com.palm.launcher"));
    assert!(fixture.services.log().is_empty());

    // Losing the compositor sends the session back to Startup.
    session.handle(LoopEvent::Boot(BootEvent::CompositorUnavailable));
    assert_eq!(session.phase(), BootPhase::Startup);
    assert!(!fixture.config.paths.suspend_marker.exists());

    // Coming back does not spawn the launcher twice.
    session.handle(LoopEvent::Boot(BootEvent::CompositorAvailable));
    pump(&mut session).await;
    assert_eq!(session.phase(), BootPhase::Normal);
    assert_eq!(
        fixture.launcher.spawned(),
        vec!["com.palm.launcher", "org.webosports.app.systemui"]
    );
}

#[tokio::test(start_paused = true)]
async fn over_quota_process_is_killed_only_under_pressure() {
    let fixture = Fixture::new(catalog(), boot_config());
    let mut session = fixture.session();

    let process_id = launch(&mut session, "com.example.game").await.unwrap();
    let pid = fixture.launcher.pid_of("com.example.game").unwrap();
    fixture.sampler.set(pid, 180);

    // Normal pressure: over quota, but tolerated.
    tokio::time::sleep(Duration::from_secs(6)).await;
    pump(&mut session).await;
    assert!(session.supervisor().is_running("com.example.game"));
    assert!(fixture.launcher.signals(pid).is_empty());

    session.handle(LoopEvent::MemoryStateChanged(SystemMemoryState::Low));
    tokio::time::sleep(Duration::from_secs(6)).await;
    pump(&mut session).await;
    assert_eq!(fixture.launcher.signals(pid), vec![ProcessSignal::Graceful]);

    session.handle(LoopEvent::ChildExited);
    pump(&mut session).await;
    assert!(!session.supervisor().is_running("com.example.game"));
    assert!(session.supervisor().memory().quota(process_id).is_none());

    let notices = fixture.services.notices.lock().unwrap().clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].app_id, "com.example.game");

    // Low memory also refuses new native launches that need memory.
    assert!(matches!(
        launch(&mut session, "com.example.game").await,
        Err(SupervisorError::AdmissionRefused { .. })
    ));
}

#[tokio::test]
async fn web_registry_follows_the_runtime_across_reconnects() {
    let fixture = Fixture::new(catalog(), boot_config());
    fixture.touch_marker(&fixture.config.paths.first_use_marker_path());
    fixture.touch_marker(&fixture.config.paths.profile_marker_path());
    fixture
        .runtime
        .set_running(&[("com.palm.app.browser", 7), ("com.palm.app.email", 9)]);
    let mut session = fixture.session();

    bring_up(&mut session).await;
    assert!(session.supervisor().is_running("com.palm.app.browser"));
    assert!(session.supervisor().is_running("com.palm.app.email"));

    session.handle(LoopEvent::DelegateAppClosed {
        process_id: ProcessId::new(9),
    });
    assert!(!session.supervisor().is_running("com.palm.app.email"));

    session.handle(LoopEvent::DelegateDisconnected);
    assert_eq!(session.phase(), BootPhase::Startup);
    assert!(!session.supervisor().is_running("com.palm.app.browser"));
    assert!(session.supervisor().is_running("com.palm.launcher"));

    fixture.runtime.set_running(&[("com.palm.app.maps", 12)]);
    session.handle(LoopEvent::DelegateConnected);
    pump(&mut session).await;
    assert_eq!(session.phase(), BootPhase::Normal);
    assert!(session.supervisor().is_running("com.palm.app.maps"));
    assert!(!session.supervisor().is_running("com.palm.app.browser"));

    // Fresh ids never collide with ones the runtime handed out.
    let process_id = launch(&mut session, "com.palm.app.browser").await.unwrap();
    assert!(process_id.as_u64() > 12);
}
