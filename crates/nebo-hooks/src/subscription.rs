//! Hook subscriptions.

use tonic::transport::Channel;

use nebo_core::{AppId, HookKind, HookPoint};
use nebo_proto::v1::hooks_client::HooksClient;

/// One app's subscription to one hook point.
#[derive(Debug, Clone)]
pub struct HookSubscription {
    /// The subscribing app.
    pub app_id: AppId,
    /// The hook point.
    pub hook: HookPoint,
    /// Filter or action.
    pub kind: HookKind,
    /// Effective priority; lower runs first.
    pub priority: i32,
    /// The app's hooks client.
    pub client: HooksClient<Channel>,
}
