use tracing::{debug, info, warn};

use super::{BootEvent, BootHost, BootPhase, CallTicket, Marker};
use crate::config::BootConfig;
use crate::error::TransportError;

/// What each phase launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPlan {
    /// The out-of-box application.
    pub first_use_app: String,
    /// Launched with the first-use app and killed with it.
    pub setup_apps: Vec<String>,
    /// Launched on entering Normal, in order, without duplicates.
    pub normal_apps: Vec<String>,
    /// Whether Normal manages the suspend marker.
    pub manages_suspend: bool,
}

impl BootPlan {
    /// Builds the plan from the `[boot]` section plus the catalog's
    /// boot-time applications.
    #[must_use]
    pub fn new(config: &BootConfig, catalog_boot_apps: impl IntoIterator<Item = String>) -> Self {
        let mut normal_apps: Vec<String> = Vec::new();
        let candidates = std::iter::once(config.launcher_app.clone())
            .chain(config.system_ui_app.clone())
            .chain(config.boot_apps.iter().cloned())
            .chain(catalog_boot_apps);
        for app_id in candidates {
            if !app_id.is_empty() && !normal_apps.contains(&app_id) {
                normal_apps.push(app_id);
            }
        }

        Self {
            first_use_app: config.first_use_app.clone(),
            setup_apps: config.setup_apps.clone(),
            normal_apps,
            manages_suspend: config.hardware_profile.manages_suspend(),
        }
    }
}

/// Progress through the first-use completion steps of one FirstUse entry.
#[derive(Debug, Default, Clone, Copy)]
struct FirstUseProgress {
    account_requested: bool,
    configurator_requested: bool,
    profile_seen: bool,
}

/// Startup / FirstUse / Normal state machine.
///
/// Transitions always leave the old phase before entering the new one and
/// publish the new phase once it is entered.
#[derive(Debug)]
pub struct BootSequencer {
    plan: BootPlan,
    phase: BootPhase,
    started: bool,
    compositor_ready: bool,
    delegate_ready: bool,
    /// Bumped on every transition; stamps outbound call tickets.
    epoch: u64,
    first_use: FirstUseProgress,
}

impl BootSequencer {
    /// Creates a sequencer in `Startup`, not yet started.
    #[must_use]
    pub const fn new(plan: BootPlan) -> Self {
        Self {
            plan,
            phase: BootPhase::Startup,
            started: false,
            compositor_ready: false,
            delegate_ready: false,
            epoch: 0,
            first_use: FirstUseProgress {
                account_requested: false,
                configurator_requested: false,
                profile_seen: false,
            },
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> BootPhase {
        self.phase
    }

    /// Whether both the compositor and the web runtime are available.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.compositor_ready && self.delegate_ready
    }

    /// The launch plan.
    #[must_use]
    pub const fn plan(&self) -> &BootPlan {
        &self.plan
    }

    /// Enters `Startup` and follows whatever transitions that implies.
    /// Subsequent calls do nothing.
    pub fn start(&mut self, host: &mut dyn BootHost) {
        if self.started {
            return;
        }
        self.started = true;
        info!(phase = %self.phase, "boot sequencer started");

        host.phase_entered(self.phase);
        let next = self.enter(self.phase, host);
        host.publish_phase(self.phase);
        if let Some(next) = next {
            self.transition(next, host);
        }
    }

    /// Feeds one event to the current phase.
    ///
    /// Readiness events are recorded before started so that `start`
    /// sees them.
    pub fn handle_event(&mut self, event: BootEvent, host: &mut dyn BootHost) {
        match event {
            BootEvent::CompositorAvailable => self.compositor_ready = true,
            BootEvent::CompositorUnavailable => self.compositor_ready = false,
            BootEvent::DelegateAvailable => self.delegate_ready = true,
            BootEvent::DelegateUnavailable => self.delegate_ready = false,
            BootEvent::FirstUseDone | BootEvent::ProfileCreated => {},
        }
        debug!(%event, phase = %self.phase, "boot event");

        if !self.started {
            return;
        }

        let next = match self.phase {
            BootPhase::Startup => self.evaluate_startup(host),
            BootPhase::FirstUse => self.first_use_event(event, host),
            BootPhase::Normal => Self::normal_event(event),
        };
        if let Some(next) = next {
            self.transition(next, host);
        }
    }

    /// Re-reads the marker files after a change in the preferences
    /// directory.
    ///
    /// `FirstUseDone` is raised whenever its marker exists; `ProfileCreated`
    /// only when its marker appeared since it was last looked at.
    pub fn markers_changed(&mut self, host: &mut dyn BootHost) {
        let profile_present = host.marker_present(Marker::ProfileCreated);
        let profile_appeared = profile_present && !self.first_use.profile_seen;
        self.first_use.profile_seen = profile_present;

        if host.marker_present(Marker::FirstUseDone) {
            self.handle_event(BootEvent::FirstUseDone, host);
        }
        if profile_appeared {
            self.handle_event(BootEvent::ProfileCreated, host);
        }
    }

    /// Completion of the local account request.
    ///
    /// Failure is logged and treated like success.
    pub fn on_account_created(
        &mut self,
        ticket: CallTicket,
        result: Result<(), TransportError>,
        host: &mut dyn BootHost,
    ) {
        if !self.is_current(ticket) {
            debug!(epoch = ticket.epoch(), "ignoring stale account creation result");
            return;
        }
        match result {
            Ok(()) => info!("local account created"),
            Err(error) => warn!(%error, "local account creation failed, continuing"),
        }
        self.request_configurator(host);
    }

    /// Completion of the configurator run. Success or failure, the session
    /// moves on to `Normal`.
    pub fn on_configurator_finished(
        &mut self,
        ticket: CallTicket,
        result: Result<(), TransportError>,
        host: &mut dyn BootHost,
    ) {
        if !self.is_current(ticket) {
            debug!(epoch = ticket.epoch(), "ignoring stale configurator result");
            return;
        }
        match result {
            Ok(()) => info!("configurator finished"),
            Err(error) => warn!(%error, "configurator failed, continuing"),
        }
        self.transition(BootPhase::Normal, host);
    }

    fn is_current(&self, ticket: CallTicket) -> bool {
        self.phase == BootPhase::FirstUse && ticket.epoch() == self.epoch
    }

    fn ticket(&self) -> CallTicket {
        CallTicket::new(self.epoch)
    }

    fn transition(&mut self, next: BootPhase, host: &mut dyn BootHost) {
        let mut next = Some(next);
        while let Some(to) = next.take() {
            let from = self.phase;
            self.leave(from, host);
            host.phase_left(from);

            self.phase = to;
            self.epoch += 1;
            info!(%from, %to, "boot phase changed");

            host.phase_entered(to);
            next = self.enter(to, host);
            host.publish_phase(to);
        }
    }

    fn enter(&mut self, phase: BootPhase, host: &mut dyn BootHost) -> Option<BootPhase> {
        match phase {
            BootPhase::Startup => self.evaluate_startup(host),
            BootPhase::FirstUse => {
                self.enter_first_use(host);
                None
            },
            BootPhase::Normal => {
                self.enter_normal(host);
                None
            },
        }
    }

    fn leave(&mut self, phase: BootPhase, host: &mut dyn BootHost) {
        match phase {
            BootPhase::Startup => {},
            BootPhase::FirstUse => {
                host.kill_app(&self.plan.first_use_app);
                for app_id in &self.plan.setup_apps {
                    host.kill_app(app_id);
                }
                host.set_display_lock(false);
            },
            BootPhase::Normal => {
                if self.plan.manages_suspend {
                    host.set_suspend_allowed(false);
                }
            },
        }
    }

    // Startup -----------------------------------------------------------

    fn evaluate_startup(&self, host: &dyn BootHost) -> Option<BootPhase> {
        if !self.is_ready() {
            debug!(
                compositor = self.compositor_ready,
                delegate = self.delegate_ready,
                "waiting for readiness"
            );
            return None;
        }

        let first_use_done = host.marker_present(Marker::FirstUseDone);
        let profile_created = host.marker_present(Marker::ProfileCreated);
        if first_use_done && profile_created {
            Some(BootPhase::Normal)
        } else {
            Some(BootPhase::FirstUse)
        }
    }

    // FirstUse ----------------------------------------------------------

    fn enter_first_use(&mut self, host: &mut dyn BootHost) {
        self.first_use = FirstUseProgress {
            profile_seen: host.marker_present(Marker::ProfileCreated),
            ..FirstUseProgress::default()
        };
        host.launch_app(&self.plan.first_use_app);
        for app_id in &self.plan.setup_apps {
            host.launch_app(app_id);
        }
        host.set_display_lock(true);

        // The first-use app may have finished in an earlier entry.
        if host.marker_present(Marker::FirstUseDone) {
            self.first_use_done(host);
        }
    }

    fn first_use_done(&mut self, host: &mut dyn BootHost) {
        if self.first_use.account_requested || self.first_use.configurator_requested {
            return;
        }
        self.first_use.account_requested = true;
        if host.marker_present(Marker::ProfileCreated) {
            info!("first use done, profile already exists");
            self.request_configurator(host);
        } else {
            info!("first use done, creating local account");
            host.create_local_account(self.ticket());
        }
    }

    fn first_use_event(&mut self, event: BootEvent, host: &mut dyn BootHost) -> Option<BootPhase> {
        match event {
            BootEvent::FirstUseDone => self.first_use_done(host),
            BootEvent::ProfileCreated => self.request_configurator(host),
            BootEvent::CompositorAvailable => {
                info!(app_id = %self.plan.first_use_app, "compositor restarted, relaunching first use");
                host.launch_app(&self.plan.first_use_app);
            },
            BootEvent::CompositorUnavailable
            | BootEvent::DelegateAvailable
            | BootEvent::DelegateUnavailable => {},
        }
        None
    }

    fn request_configurator(&mut self, host: &mut dyn BootHost) {
        if self.first_use.configurator_requested {
            return;
        }
        self.first_use.configurator_requested = true;
        info!("running configurator");
        host.run_configurator(self.ticket());
    }

    // Normal ------------------------------------------------------------

    fn enter_normal(&self, host: &mut dyn BootHost) {
        if self.plan.manages_suspend {
            host.set_suspend_allowed(true);
        }
        for app_id in &self.plan.normal_apps {
            host.launch_app(app_id);
        }
    }

    const fn normal_event(event: BootEvent) -> Option<BootPhase> {
        match event {
            BootEvent::CompositorUnavailable | BootEvent::DelegateUnavailable => {
                Some(BootPhase::Startup)
            },
            _ => None,
        }
    }
}
