//! The hook dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tonic::transport::Channel;
use tracing::{debug, warn};

use nebo_core::{AppId, HookKind, HookPoint, HookSpec};
use nebo_inspect::{Direction, EventType, Inspector, InspectorEvent};
use nebo_proto::v1::hooks_client::HooksClient;
use nebo_proto::v1::HookInvocation;

use crate::circuit::CircuitState;
use crate::subscription::HookSubscription;

/// Hard deadline for one hook call.
pub const HOOK_CALL_TIMEOUT: Duration = Duration::from_millis(500);

/// Priority-ordered hook dispatch with per-app circuit breaking.
pub struct HookDispatcher {
    /// Sorted on insert; copied under the read lock at dispatch time.
    subscriptions: RwLock<HashMap<HookPoint, Vec<HookSubscription>>>,
    circuits: Mutex<HashMap<AppId, CircuitState>>,
    total_subscriptions: AtomicUsize,
    inspector: Option<Arc<Inspector>>,
}

impl HookDispatcher {
    /// Create a dispatcher; `inspector` enables gRPC traffic recording.
    #[must_use]
    pub fn new(inspector: Option<Arc<Inspector>>) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            circuits: Mutex::new(HashMap::new()),
            total_subscriptions: AtomicUsize::new(0),
            inspector,
        }
    }

    /// Register an app's hook subscriptions from its manifest specs.
    ///
    /// Unknown hook names are ignored with a warning. A fresh
    /// registration closes any circuit left open by the previous process.
    pub fn register_app(
        &self,
        app_id: &AppId,
        specs: &[HookSpec],
        client: HooksClient<Channel>,
    ) {
        {
            let mut circuits = lock(&self.circuits);
            circuits.remove(app_id);
        }

        let mut registered = 0usize;
        let mut subscriptions = write(&self.subscriptions);
        for spec in specs {
            let Ok(hook) = spec.name.parse::<HookPoint>() else {
                warn!(app_id = %app_id, hook = %spec.name, "Ignoring subscription to unknown hook");
                continue;
            };
            let subscription = HookSubscription {
                app_id: app_id.clone(),
                hook,
                kind: spec.kind,
                priority: spec.effective_priority(),
                client: client.clone(),
            };
            let list = subscriptions.entry(hook).or_default();
            // Stable insert: after existing entries of equal priority.
            let position = list
                .iter()
                .position(|existing| existing.priority > subscription.priority)
                .unwrap_or(list.len());
            list.insert(position, subscription);
            registered = registered.saturating_add(1);
        }
        drop(subscriptions);

        self.total_subscriptions
            .fetch_add(registered, Ordering::Relaxed);
        debug!(app_id = %app_id, count = registered, "Registered hook subscriptions");
    }

    /// Remove every subscription of an app (process stop or deregistration).
    pub fn deregister_app(&self, app_id: &AppId) {
        let mut removed = 0usize;
        {
            let mut subscriptions = write(&self.subscriptions);
            for list in subscriptions.values_mut() {
                let before = list.len();
                list.retain(|sub| &sub.app_id != app_id);
                removed = removed.saturating_add(before.saturating_sub(list.len()));
            }
            subscriptions.retain(|_, list| !list.is_empty());
        }
        self.total_subscriptions
            .fetch_sub(removed, Ordering::Relaxed);
        if removed > 0 {
            debug!(app_id = %app_id, count = removed, "Deregistered hook subscriptions");
        }
    }

    /// Fast path: whether any filter or action is registered for `hook`.
    /// Callers pay nothing when the answer is no.
    #[must_use]
    pub fn has_subscribers(&self, hook: HookPoint) -> bool {
        if self.total_subscriptions.load(Ordering::Relaxed) == 0 {
            return false;
        }
        read(&self.subscriptions)
            .get(&hook)
            .is_some_and(|list| !list.is_empty())
    }

    /// Run the filter chain for `hook` over `payload`.
    ///
    /// Filters run sequentially in ascending priority. A filter returning
    /// `handled = true` short-circuits with its payload; a non-null
    /// returned payload becomes the next filter's input; failures leave
    /// the payload untouched and the chain continues.
    pub async fn dispatch_filter(
        &self,
        hook: HookPoint,
        payload: serde_json::Value,
    ) -> serde_json::Value {
        let subscribers = self.subscribers(hook, HookKind::Filter);
        let mut current = payload;

        for subscription in subscribers {
            if self.circuit_open(&subscription.app_id) {
                debug!(app_id = %subscription.app_id, hook = %hook, "Skipping filter, circuit open");
                continue;
            }

            let request_bytes = serde_json::to_vec(&current).unwrap_or_default();
            let invocation = HookInvocation {
                hook: hook.as_str().to_string(),
                payload_json: request_bytes,
            };
            self.record_request(&subscription.app_id, "InvokeFilter", &invocation);

            let mut client = subscription.client.clone();
            let start = Instant::now();
            let outcome =
                tokio::time::timeout(HOOK_CALL_TIMEOUT, client.invoke_filter(invocation)).await;

            match outcome {
                Ok(Ok(response)) => {
                    let result = response.into_inner();
                    self.record_response(
                        &subscription.app_id,
                        "InvokeFilter",
                        &result,
                        start.elapsed(),
                        None,
                    );
                    self.record_call_success(&subscription.app_id);
                    if result.handled {
                        if let Some(bytes) = result.payload_json
                            && let Ok(value) = serde_json::from_slice(&bytes)
                        {
                            return value;
                        }
                        return current;
                    }
                    if let Some(bytes) = result.payload_json {
                        match serde_json::from_slice(&bytes) {
                            Ok(value) => current = value,
                            Err(e) => {
                                warn!(
                                    app_id = %subscription.app_id,
                                    hook = %hook,
                                    error = %e,
                                    "Filter returned unparseable payload, keeping previous"
                                );
                            },
                        }
                    }
                },
                Ok(Err(status)) => {
                    self.record_error(
                        &subscription.app_id,
                        "InvokeFilter",
                        start.elapsed(),
                        status.to_string(),
                    );
                    self.record_call_failure(&subscription.app_id, hook, &status.to_string());
                },
                Err(_) => {
                    self.record_call_failure(
                        &subscription.app_id,
                        hook,
                        &format!("deadline of {HOOK_CALL_TIMEOUT:?} exceeded"),
                    );
                },
            }
        }

        current
    }

    /// Fan `payload` out to every action subscriber of `hook`.
    ///
    /// Same ordering and deadline as filters; there is no return value
    /// and failures never stop the chain.
    pub async fn dispatch_action(&self, hook: HookPoint, payload: &serde_json::Value) {
        let subscribers = self.subscribers(hook, HookKind::Action);
        let payload_bytes = serde_json::to_vec(payload).unwrap_or_default();

        for subscription in subscribers {
            if self.circuit_open(&subscription.app_id) {
                debug!(app_id = %subscription.app_id, hook = %hook, "Skipping action, circuit open");
                continue;
            }

            let invocation = HookInvocation {
                hook: hook.as_str().to_string(),
                payload_json: payload_bytes.clone(),
            };
            self.record_request(&subscription.app_id, "InvokeAction", &invocation);

            let mut client = subscription.client.clone();
            let start = Instant::now();
            let outcome =
                tokio::time::timeout(HOOK_CALL_TIMEOUT, client.invoke_action(invocation)).await;

            match outcome {
                Ok(Ok(response)) => {
                    self.record_response(
                        &subscription.app_id,
                        "InvokeAction",
                        &response.into_inner(),
                        start.elapsed(),
                        None,
                    );
                    self.record_call_success(&subscription.app_id);
                },
                Ok(Err(status)) => {
                    self.record_error(
                        &subscription.app_id,
                        "InvokeAction",
                        start.elapsed(),
                        status.to_string(),
                    );
                    self.record_call_failure(&subscription.app_id, hook, &status.to_string());
                },
                Err(_) => {
                    self.record_call_failure(
                        &subscription.app_id,
                        hook,
                        &format!("deadline of {HOOK_CALL_TIMEOUT:?} exceeded"),
                    );
                },
            }
        }
    }

    /// The consecutive-failure count of an app's circuit (0 if none).
    #[must_use]
    pub fn failure_count(&self, app_id: &AppId) -> u32 {
        lock(&self.circuits)
            .get(app_id)
            .map_or(0, CircuitState::consecutive_failures)
    }

    /// Whether an app's circuit is open.
    #[must_use]
    pub fn circuit_open(&self, app_id: &AppId) -> bool {
        lock(&self.circuits)
            .get(app_id)
            .is_some_and(CircuitState::is_open)
    }

    fn subscribers(&self, hook: HookPoint, kind: HookKind) -> Vec<HookSubscription> {
        read(&self.subscriptions)
            .get(&hook)
            .map(|list| {
                list.iter()
                    .filter(|sub| sub.kind == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record_call_success(&self, app_id: &AppId) {
        let mut circuits = lock(&self.circuits);
        circuits.entry(app_id.clone()).or_default().record_success();
    }

    fn record_call_failure(&self, app_id: &AppId, hook: HookPoint, message: &str) {
        let opened = {
            let mut circuits = lock(&self.circuits);
            circuits.entry(app_id.clone()).or_default().record_failure()
        };
        if opened {
            warn!(app_id = %app_id, hook = %hook, error = message, "Hook circuit opened, disabling app hooks until restart");
        } else {
            warn!(app_id = %app_id, hook = %hook, error = message, "Hook call failed");
        }
    }

    fn record_request<T: nebo_proto::ProtoJson + serde::Serialize>(
        &self,
        app_id: &AppId,
        method: &str,
        message: &T,
    ) {
        let Some(inspector) = &self.inspector else {
            return;
        };
        if !inspector.is_active() {
            return;
        }
        inspector.record(InspectorEvent::new(
            app_id.clone(),
            format!("nebo.app.v1.Hooks/{method}"),
            EventType::Unary,
            Direction::Request,
            nebo_inspect::marshal(message),
        ));
    }

    fn record_response<T: nebo_proto::ProtoJson + serde::Serialize>(
        &self,
        app_id: &AppId,
        method: &str,
        message: &T,
        duration: Duration,
        error: Option<String>,
    ) {
        let Some(inspector) = &self.inspector else {
            return;
        };
        if !inspector.is_active() {
            return;
        }
        let mut event = InspectorEvent::new(
            app_id.clone(),
            format!("nebo.app.v1.Hooks/{method}"),
            EventType::Unary,
            Direction::Response,
            nebo_inspect::marshal(message),
        )
        .with_duration_ms(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        if let Some(error) = error {
            event = event.with_error(error);
        }
        inspector.record(event);
    }

    fn record_error(&self, app_id: &AppId, method: &str, duration: Duration, error: String) {
        let Some(inspector) = &self.inspector else {
            return;
        };
        if !inspector.is_active() {
            return;
        }
        inspector.record(
            InspectorEvent::new(
                app_id.clone(),
                format!("nebo.app.v1.Hooks/{method}"),
                EventType::Unary,
                Direction::Response,
                Vec::new(),
            )
            .with_duration_ms(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            .with_error(error),
        );
    }
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher")
            .field(
                "total_subscriptions",
                &self.total_subscriptions.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn read<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}
