//! Bootstrap gate: decides which navigation root to show.
//!
//! At boot the gate waits for two things, in whatever order they finish:
//! the minimum splash duration and the first session resolution. Only then
//! does it move from `Booting` to `Ready` and replace the navigation root,
//! exactly once. After that it keeps following auth-state changes and
//! replaces the root again only when the target route actually changes.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::models::RouteId;
use crate::store::SessionStore;

/// Minimum time the splash screen stays up.
pub const DEFAULT_SPLASH_DURATION: Duration = Duration::from_millis(2000);

/// Navigation contract consumed by the gate.
pub trait Navigator: Send + Sync {
    fn replace_root(&self, route: RouteId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Booting,
    Ready,
}

pub struct BootstrapGate;

impl BootstrapGate {
    /// Start the gate. Resolution is kicked off immediately; navigation
    /// happens on the returned handle's task.
    pub fn start(
        store: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        splash: Duration,
    ) -> GateHandle {
        let (phase_tx, phase_rx) = watch::channel(GatePhase::Booting);

        let resolver = {
            let store = store.clone();
            tokio::spawn(async move {
                store.resolve().await;
            })
        };

        let task = tokio::spawn(Self::run(store, navigator, splash, phase_tx));

        GateHandle {
            phase: phase_rx,
            task,
            resolver,
        }
    }

    async fn run(
        store: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        splash: Duration,
        phase: watch::Sender<GatePhase>,
    ) {
        debug!(splash_ms = splash.as_millis() as u64, "Gate booting");
        tokio::join!(tokio::time::sleep(splash), store.wait_until_resolved());

        // The first item is the state at subscription time; it drives the
        // single boot navigation. Everything after is a real transition.
        let mut states = store.watch();
        let mut current: Option<RouteId> = None;
        let mut booted = false;

        while let Some(state) = states.recv().await {
            let Some(route) = RouteId::for_state(&state) else {
                continue;
            };

            if !booted {
                booted = true;
                phase.send_replace(GatePhase::Ready);
                info!(%route, "Gate ready");
            } else if current == Some(route) {
                debug!(%route, "Already on route, not navigating");
                continue;
            }

            info!(%route, "Replacing navigation root");
            navigator.replace_root(route);
            current = Some(route);
        }
        debug!("Auth state stream closed, gate stopped");
    }
}

/// Owns the gate's tasks. Dropping it stops the gate.
pub struct GateHandle {
    phase: watch::Receiver<GatePhase>,
    task: JoinHandle<()>,
    resolver: JoinHandle<()>,
}

impl GateHandle {
    pub fn phase(&self) -> GatePhase {
        *self.phase.borrow()
    }

    pub async fn wait_ready(&mut self) {
        // An error means the gate task ended; there is nothing left to wait for.
        let _ = self.phase.wait_for(|p| *p == GatePhase::Ready).await;
    }

    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for GateHandle {
    fn drop(&mut self) {
        self.task.abort();
        self.resolver.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================
