//! Per-app streaming receive loops.
//!
//! Each loop is a long-lived task with an ambient cancellation signal:
//! a comm receive forwarding into the host's comm plane, a channel
//! receive invoking the host callback, and a schedule trigger stream.
//! Per-app stream errors end the loop with a warning; they never take
//! the host down.

use std::sync::Arc;

use chrono::{TimeZone as _, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{debug, warn};

use nebo_core::contract::{ChannelInbound, CommInbound, ScheduleFire};
use nebo_core::AppId;
use nebo_proto::v1::channel_client::ChannelClient;
use nebo_proto::v1::comm_client::CommClient;
use nebo_proto::v1::schedule_client::ScheduleClient;
use nebo_proto::v1::{ChannelReceiveRequest, CommReceiveRequest, TriggerSubscribeRequest};

fn parse_payload(bytes: &[u8]) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null)
}

/// Start the comm receive loop, forwarding inbound messages to the
/// host's comm plane.
pub fn spawn_comm_receive(
    app_id: AppId,
    client: CommClient<Channel>,
    tx: tokio::sync::mpsc::Sender<CommInbound>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut client = client;
        let mut stream = match client.receive(CommReceiveRequest {}).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                warn!(app_id = %app_id, error = %status, "Comm receive stream failed to open");
                return;
            },
        };
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                message = stream.message() => match message {
                    Ok(Some(event)) => {
                        let inbound = CommInbound {
                            app_id: app_id.clone(),
                            from: event.from,
                            payload: parse_payload(&event.payload_json),
                        };
                        if tx.send(inbound).await.is_err() {
                            debug!(app_id = %app_id, "Comm plane receiver dropped, ending loop");
                            break;
                        }
                    },
                    Ok(None) => {
                        debug!(app_id = %app_id, "Comm receive stream ended");
                        break;
                    },
                    Err(status) => {
                        warn!(app_id = %app_id, error = %status, "Comm receive stream error");
                        break;
                    },
                },
            }
        }
    })
}

/// Start the channel receive loop, invoking the host callback per
/// inbound message.
pub fn spawn_channel_receive(
    app_id: AppId,
    client: ChannelClient<Channel>,
    callback: Arc<dyn Fn(ChannelInbound) + Send + Sync>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut client = client;
        let mut stream = match client.receive(ChannelReceiveRequest {}).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                warn!(app_id = %app_id, error = %status, "Channel receive stream failed to open");
                return;
            },
        };
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                message = stream.message() => match message {
                    Ok(Some(event)) => {
                        callback(ChannelInbound {
                            app_id: app_id.clone(),
                            channel: event.channel,
                            sender: event.sender,
                            payload: parse_payload(&event.payload_json),
                        });
                    },
                    Ok(None) => {
                        debug!(app_id = %app_id, "Channel receive stream ended");
                        break;
                    },
                    Err(status) => {
                        warn!(app_id = %app_id, error = %status, "Channel receive stream error");
                        break;
                    },
                },
            }
        }
    })
}

/// Start the schedule trigger loop.
pub fn spawn_schedule_triggers(
    app_id: AppId,
    client: ScheduleClient<Channel>,
    callback: Arc<dyn Fn(ScheduleFire) + Send + Sync>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut client = client;
        let mut stream = match client.triggers(TriggerSubscribeRequest {}).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                warn!(app_id = %app_id, error = %status, "Trigger stream failed to open");
                return;
            },
        };
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                message = stream.message() => match message {
                    Ok(Some(event)) => {
                        let fired_at = Utc
                            .timestamp_millis_opt(event.fired_at_unix_ms)
                            .single()
                            .unwrap_or_else(Utc::now);
                        callback(ScheduleFire {
                            app_id: app_id.clone(),
                            schedule_id: event.schedule_id,
                            fired_at,
                            payload: parse_payload(&event.payload_json),
                        });
                    },
                    Ok(None) => {
                        debug!(app_id = %app_id, "Trigger stream ended");
                        break;
                    },
                    Err(status) => {
                        warn!(app_id = %app_id, error = %status, "Trigger stream error");
                        break;
                    },
                },
            }
        }
    })
}
