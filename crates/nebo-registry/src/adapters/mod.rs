//! Host-side capability adapters.
//!
//! Each adapter bridges one capability of one app's gRPC surface behind
//! the matching host contract from `nebo_core::contract`, enforcing
//! runtime permission filters (e.g. bearer-token stripping) at the
//! boundary.

pub mod gateway;
pub mod settings;
pub mod streams;
pub mod tool;
pub mod ui;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use nebo_core::contract::{ChannelInbound, CommInbound, ScheduleFire};
use nebo_core::Capability;

pub use gateway::GatewayAdapter;
pub use settings::SettingsBridge;
pub use tool::ToolAdapter;
pub use ui::UiAdapter;

/// Host-supplied sinks the streaming adapters forward into.
///
/// Absent sinks simply mean no receive loop is started for that
/// capability; adapter creation (and its permission floor) is unchanged.
#[derive(Clone, Default)]
pub struct HostBridges {
    /// Comm-plane inbox.
    pub comm_tx: Option<tokio::sync::mpsc::Sender<CommInbound>>,
    /// Channel message callback.
    pub on_channel_message: Option<Arc<dyn Fn(ChannelInbound) + Send + Sync>>,
    /// Schedule trigger callback.
    pub on_schedule_fire: Option<Arc<dyn Fn(ScheduleFire) + Send + Sync>>,
}

impl std::fmt::Debug for HostBridges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBridges")
            .field("comm", &self.comm_tx.is_some())
            .field("channel", &self.on_channel_message.is_some())
            .field("schedule", &self.on_schedule_fire.is_some())
            .finish()
    }
}

/// Everything the registry publishes for one live app.
#[derive(Default)]
pub struct AppAdapters {
    /// Cancels the receive loops on deregistration.
    pub cancel: CancellationToken,
    /// Gateway adapter, when `gateway` cleared its permission floor.
    pub gateway: Option<Arc<GatewayAdapter>>,
    /// One adapter per declared `tool:<name>`.
    pub tools: Vec<Arc<ToolAdapter>>,
    /// UI adapter.
    pub ui: Option<Arc<UiAdapter>>,
    /// Settings hot-reload bridge, when the manifest declares settings.
    pub settings: Option<Arc<SettingsBridge>>,
    /// Receive-loop tasks (comm, channel, schedule). Aborted on
    /// deregistration.
    pub stream_tasks: Vec<JoinHandle<()>>,
    /// The capabilities that actually got adapters (post floor check).
    pub active: Vec<Capability>,
}

impl AppAdapters {
    /// Whether an adapter for this capability is active.
    #[must_use]
    pub fn has(&self, capability: &Capability) -> bool {
        self.active.contains(capability)
    }

    /// Cancel and abort receive loops; called on deregistration.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        for task in self.stream_tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for AppAdapters {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AppAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAdapters")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
