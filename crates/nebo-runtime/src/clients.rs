//! Typed capability clients over an app's gRPC connection.
//!
//! "Which typed client exists" is driven by the manifest at launch time:
//! the process record holds an optional handle per capability, and
//! dispatch is "if the handle is present, use it". Undeclared
//! capabilities produce no client handle at all.

use tonic::transport::Channel;

use nebo_core::{Capability, Manifest};
use nebo_proto::v1::channel_client::ChannelClient;
use nebo_proto::v1::comm_client::CommClient;
use nebo_proto::v1::gateway_client::GatewayClient;
use nebo_proto::v1::hooks_client::HooksClient;
use nebo_proto::v1::schedule_client::ScheduleClient;
use nebo_proto::v1::tool_client::ToolClient;
use nebo_proto::v1::ui_client::UiClient;

/// Per-capability typed client handles for one app process.
///
/// Clients are cheap clones of the underlying channel; cloning the whole
/// set shares the one gRPC connection.
#[derive(Debug, Clone, Default)]
pub struct CapabilityClients {
    /// Present iff the manifest declares `gateway`.
    pub gateway: Option<GatewayClient<Channel>>,
    /// Present iff the manifest declares any `tool:<name>`.
    pub tool: Option<ToolClient<Channel>>,
    /// Present iff the manifest declares any `channel:<type>`.
    pub channel: Option<ChannelClient<Channel>>,
    /// Present iff the manifest declares `comm`.
    pub comm: Option<CommClient<Channel>>,
    /// Present iff the manifest declares `ui`.
    pub ui: Option<UiClient<Channel>>,
    /// Present iff the manifest declares `schedule`.
    pub schedule: Option<ScheduleClient<Channel>>,
    /// Present iff the manifest declares `hooks`.
    pub hooks: Option<HooksClient<Channel>>,
}

impl CapabilityClients {
    /// Instantiate clients for exactly the declared capabilities.
    #[must_use]
    pub fn from_manifest(channel: &Channel, manifest: &Manifest) -> Self {
        let mut clients = Self::default();
        for capability in &manifest.capabilities {
            match capability {
                Capability::Gateway => {
                    clients.gateway = Some(GatewayClient::new(channel.clone()));
                },
                Capability::Tool(_) => {
                    clients.tool = Some(ToolClient::new(channel.clone()));
                },
                Capability::Channel(_) => {
                    clients.channel = Some(ChannelClient::new(channel.clone()));
                },
                Capability::Comm => {
                    clients.comm = Some(CommClient::new(channel.clone()));
                },
                Capability::Ui => {
                    clients.ui = Some(UiClient::new(channel.clone()));
                },
                Capability::Schedule => {
                    clients.schedule = Some(ScheduleClient::new(channel.clone()));
                },
                Capability::Hooks => {
                    clients.hooks = Some(HooksClient::new(channel.clone()));
                },
                // Vision and browser apps run but expose no typed client
                // surface on this socket yet.
                Capability::Vision | Capability::Browser => {},
            }
        }
        clients
    }

    /// Whether no client handle exists at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gateway.is_none()
            && self.tool.is_none()
            && self.channel.is_none()
            && self.comm.is_none()
            && self.ui.is_none()
            && self.schedule.is_none()
            && self.hooks.is_none()
    }
}
