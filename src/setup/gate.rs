//! Application-facing lifecycle: `get_state → setup → start_services`.

use super::orchestrator::{Installer, SetupOrchestrator};
use super::preflight::{ComponentInspector, PreflightChecker, PreflightReport};
use super::{InstallMode, SetupProgress, SetupStep};
use crate::Error;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Capacity of the progress channel. Slow subscribers lose old events.
const PROGRESS_CAPACITY: usize = 64;

/// What the UI should show next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    Setup,
    Loading,
}

/// Where this gate instance is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Unknown,
    Setup,
    Loading,
    Ready,
}

/// User-visible result of a gate operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl GateResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            code: None,
        }
    }
}

impl From<&Error> for GateResponse {
    fn from(e: &Error) -> Self {
        Self {
            success: false,
            message: Some(e.to_string()),
            code: Some(e.code().to_string()),
        }
    }
}

/// Starts the long-running services once setup is done.
pub trait ServiceStarter: Send + Sync {
    fn start(&self) -> impl Future<Output = crate::Result<()>> + Send;
}

/// Gates readiness behind setup.
///
/// Every flag lives on the instance, so independent gates never interfere.
pub struct LifecycleGate<I, N, S> {
    mode: InstallMode,
    checker: PreflightChecker<I>,
    orchestrator: SetupOrchestrator<N>,
    services: S,
    /// Last successful preflight, consumed by the next `setup()`
    cached: Mutex<Option<PreflightReport>>,
    setup_in_progress: AtomicBool,
    services_started: tokio::sync::Mutex<bool>,
    phase: Mutex<LifecycleState>,
    progress: broadcast::Sender<SetupProgress>,
}

/// Clears the in-progress flag however `setup()` exits.
struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<I, N, S> LifecycleGate<I, N, S>
where
    I: ComponentInspector,
    N: Installer,
    S: ServiceStarter,
{
    pub fn new(
        mode: InstallMode,
        checker: PreflightChecker<I>,
        orchestrator: SetupOrchestrator<N>,
        services: S,
    ) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self {
            mode,
            checker,
            orchestrator,
            services,
            cached: Mutex::new(None),
            setup_in_progress: AtomicBool::new(false),
            services_started: tokio::sync::Mutex::new(false),
            phase: Mutex::new(LifecycleState::Unknown),
            progress,
        }
    }

    /// Progress events of subsequent `setup()` runs.
    pub fn subscribe(&self) -> broadcast::Receiver<SetupProgress> {
        self.progress.subscribe()
    }

    pub fn phase(&self) -> LifecycleState {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The report the last `get_state()` cached, if `setup()` has not
    /// consumed it yet.
    pub fn cached_report(&self) -> Option<PreflightReport> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn mode(&self) -> InstallMode {
        self.mode
    }

    fn set_phase(&self, phase: LifecycleState) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn set_cached(&self, report: Option<PreflightReport>) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = report;
    }

    /// Decide between the setup screen and loading.
    ///
    /// A failing preflight is logged and treated as "setup required".
    pub async fn get_state(&self) -> GateState {
        if self.mode == InstallMode::External {
            self.set_phase(LifecycleState::Loading);
            return GateState::Loading;
        }

        let state = match self.checker.check().await {
            Ok(report) => {
                let needs_setup = report.needs_setup;
                self.set_cached(Some(report));
                if needs_setup {
                    GateState::Setup
                } else {
                    GateState::Loading
                }
            }
            Err(e) => {
                warn!(error = %e, "preflight failed, assuming setup is required");
                self.set_cached(None);
                GateState::Setup
            }
        };
        self.set_phase(match state {
            GateState::Setup => LifecycleState::Setup,
            GateState::Loading => LifecycleState::Loading,
        });
        state
    }

    /// Run whatever installation work is outstanding.
    ///
    /// Only one run may be in flight per gate; an overlapping call returns
    /// `SETUP_IN_PROGRESS` immediately.
    pub async fn setup(&self) -> GateResponse {
        if self.setup_in_progress.swap(true, Ordering::AcqRel) {
            return GateResponse::from(&Error::SetupInProgress);
        }
        let _guard = InProgress(&self.setup_in_progress);

        let cached = self
            .cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let report = match cached {
            Some(report) => report,
            None => match self.checker.check().await {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "preflight failed, reinstalling everything");
                    PreflightReport::everything(self.checker.manifest())
                }
            },
        };

        if !report.needs_setup {
            self.set_phase(LifecycleState::Loading);
            return GateResponse::ok();
        }

        info!(
            binaries = report.missing_binaries.len(),
            extensions = report.missing_extensions.len() + report.outdated_extensions.len(),
            config = report.stale_config,
            "running setup"
        );
        let result = self
            .orchestrator
            .run(&report, |event| {
                if event.step != SetupStep::Finalize {
                    // no subscribers is fine
                    let _ = self.progress.send(event);
                }
            })
            .await;

        match result {
            Ok(()) => {
                self.set_phase(LifecycleState::Loading);
                GateResponse::ok()
            }
            Err(e) => {
                warn!(error = %e, "setup failed");
                GateResponse::from(&e)
            }
        }
    }

    /// Start services at most once. A failed start may be retried.
    pub async fn start_services(&self) -> GateResponse {
        let mut started = self.services_started.lock().await;
        if *started {
            return GateResponse::ok();
        }

        match self.services.start().await {
            Ok(()) => {
                *started = true;
                self.set_phase(LifecycleState::Ready);
                info!("services started");
                GateResponse::ok()
            }
            Err(e) => {
                let e = match e {
                    Error::ServiceStart(_) => e,
                    other => Error::ServiceStart(other.to_string()),
                };
                warn!(error = %e, "service start failed");
                GateResponse::from(&e)
            }
        }
    }
}
