//! App health checks.
//!
//! `HealthCheck` is attempted on the first capability client that exists,
//! probed in a fixed order (gateway → tool → channel → comm → ui), with a
//! hard 5-second deadline. `healthy = false` and transport errors are
//! distinguished so the supervisor can report the right kind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use nebo_core::AppId;
use nebo_inspect::{Direction, EventType, Inspector, InspectorEvent};
use nebo_proto::v1::{HealthCheckRequest, HealthCheckResponse};

use crate::clients::CapabilityClients;
use crate::error::{RuntimeError, RuntimeResult};

/// Hard deadline for one health call.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a health check against the first present capability client.
///
/// Apps with no probeable client (e.g. hooks-only) pass vacuously.
///
/// # Errors
///
/// [`RuntimeError::HealthUnhealthy`] when the app answers
/// `healthy = false`; [`RuntimeError::HealthTransport`] on status errors
/// or deadline expiry.
pub async fn check(
    app_id: &AppId,
    clients: &CapabilityClients,
    inspector: Option<&Arc<Inspector>>,
) -> RuntimeResult<()> {
    let Some((capability, outcome)) = probe_first(clients).await else {
        debug!(app_id = %app_id, "No probeable capability client, skipping health check");
        return Ok(());
    };

    record(app_id, capability, &outcome, inspector);

    match outcome.result {
        Ok(response) if response.healthy => Ok(()),
        Ok(response) => Err(RuntimeError::HealthUnhealthy {
            app_id: app_id.clone(),
            capability,
            message: response.message,
        }),
        Err(message) => Err(RuntimeError::HealthTransport {
            app_id: app_id.clone(),
            capability,
            message,
        }),
    }
}

struct ProbeOutcome {
    result: Result<HealthCheckResponse, String>,
    duration: Duration,
}

/// Probe the first client in the fixed order; `None` when no client in
/// the probe order exists.
async fn probe_first(clients: &CapabilityClients) -> Option<(&'static str, ProbeOutcome)> {
    if let Some(client) = &clients.gateway {
        let mut client = client.clone();
        let outcome =
            run_probe(async move { client.health_check(HealthCheckRequest {}).await }).await;
        return Some(("gateway", outcome));
    }
    if let Some(client) = &clients.tool {
        let mut client = client.clone();
        let outcome =
            run_probe(async move { client.health_check(HealthCheckRequest {}).await }).await;
        return Some(("tool", outcome));
    }
    if let Some(client) = &clients.channel {
        let mut client = client.clone();
        let outcome =
            run_probe(async move { client.health_check(HealthCheckRequest {}).await }).await;
        return Some(("channel", outcome));
    }
    if let Some(client) = &clients.comm {
        let mut client = client.clone();
        let outcome =
            run_probe(async move { client.health_check(HealthCheckRequest {}).await }).await;
        return Some(("comm", outcome));
    }
    if let Some(client) = &clients.ui {
        let mut client = client.clone();
        let outcome =
            run_probe(async move { client.health_check(HealthCheckRequest {}).await }).await;
        return Some(("ui", outcome));
    }
    None
}

async fn run_probe<F>(call: F) -> ProbeOutcome
where
    F: Future<Output = Result<tonic::Response<HealthCheckResponse>, tonic::Status>>,
{
    let start = Instant::now();
    let result = match tokio::time::timeout(HEALTH_TIMEOUT, call).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => Err(status.to_string()),
        Err(_) => Err(format!("deadline of {HEALTH_TIMEOUT:?} exceeded")),
    };
    ProbeOutcome {
        result,
        duration: start.elapsed(),
    }
}

fn record(
    app_id: &AppId,
    capability: &'static str,
    outcome: &ProbeOutcome,
    inspector: Option<&Arc<Inspector>>,
) {
    let Some(inspector) = inspector else { return };
    if !inspector.is_active() {
        return;
    }
    let method = format!("{capability}/HealthCheck");
    inspector.record(InspectorEvent::new(
        app_id.clone(),
        method.clone(),
        EventType::Unary,
        Direction::Request,
        nebo_inspect::marshal(&HealthCheckRequest {}),
    ));
    let mut event = InspectorEvent::new(
        app_id.clone(),
        method,
        EventType::Unary,
        Direction::Response,
        match &outcome.result {
            Ok(response) => nebo_inspect::marshal(response),
            Err(_) => Vec::new(),
        },
    )
    .with_duration_ms(u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX));
    if let Err(message) = &outcome.result {
        event = event.with_error(message.clone());
    }
    inspector.record(event);
}
