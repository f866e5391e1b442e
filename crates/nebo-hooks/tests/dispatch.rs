//! Dispatcher behavior against real hooks servers over unix sockets.

#![cfg(unix)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use nebo_core::{AppId, HookKind, HookPoint, HookSpec};
use nebo_hooks::HookDispatcher;
use nebo_proto::v1::hooks_client::HooksClient;
use nebo_proto::v1::hooks_server::{Hooks, HooksServer};
use nebo_proto::v1::{HookActionAck, HookFilterResult, HookInvocation};

/// A scriptable hooks service.
#[derive(Default)]
struct FakeHooks {
    /// Return `handled = true` with this payload.
    handled_payload: Option<Vec<u8>>,
    /// Return `handled = false` with this replacement payload.
    replace_payload: Option<Vec<u8>>,
    /// Fail every call with an internal status.
    fail: bool,
    /// Sleep before answering (timeout tests).
    delay: Option<Duration>,
    calls: Arc<AtomicU32>,
}

#[tonic::async_trait]
impl Hooks for FakeHooks {
    async fn invoke_filter(
        &self,
        _request: Request<HookInvocation>,
    ) -> Result<Response<HookFilterResult>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Status::internal("scripted failure"));
        }
        if let Some(payload) = &self.handled_payload {
            return Ok(Response::new(HookFilterResult {
                handled: true,
                payload_json: Some(payload.clone()),
            }));
        }
        Ok(Response::new(HookFilterResult {
            handled: false,
            payload_json: self.replace_payload.clone(),
        }))
    }

    async fn invoke_action(
        &self,
        _request: Request<HookInvocation>,
    ) -> Result<Response<HookActionAck>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Status::internal("scripted failure"));
        }
        Ok(Response::new(HookActionAck {}))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    _server: tokio::task::JoinHandle<()>,
    client: HooksClient<Channel>,
    calls: Arc<AtomicU32>,
}

async fn serve(fake: FakeHooks) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("app.sock");
    let calls = Arc::clone(&fake.calls);

    let incoming = nebo_proto::uds::bind(&socket).unwrap();
    let server = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(HooksServer::new(fake))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });

    let channel = nebo_proto::uds::connect(&socket).await.unwrap();
    Fixture {
        _dir: dir,
        _server: server,
        client: HooksClient::new(channel),
        calls,
    }
}

fn filter_spec(priority: i32) -> HookSpec {
    HookSpec {
        name: "tool.pre_execute".into(),
        kind: HookKind::Filter,
        priority,
    }
}

fn action_spec() -> HookSpec {
    HookSpec {
        name: "steering".into(),
        kind: HookKind::Action,
        priority: 0,
    }
}

#[tokio::test]
async fn handled_filter_short_circuits_later_filters() {
    let x = serve(FakeHooks {
        handled_payload: Some(br#"{"ok":1}"#.to_vec()),
        ..FakeHooks::default()
    })
    .await;
    let y = serve(FakeHooks::default()).await;

    let dispatcher = HookDispatcher::new(None);
    dispatcher.register_app(&AppId::from_static("com.example.x"), &[filter_spec(5)], x.client.clone());
    dispatcher.register_app(&AppId::from_static("com.example.y"), &[filter_spec(10)], y.client.clone());

    let result = dispatcher
        .dispatch_filter(HookPoint::ToolPreExecute, serde_json::json!({"input": true}))
        .await;

    assert_eq!(result, serde_json::json!({"ok": 1}));
    assert_eq!(x.calls.load(Ordering::SeqCst), 1);
    assert_eq!(y.calls.load(Ordering::SeqCst), 0, "Y must never be called");
}

#[tokio::test]
async fn filter_chain_threads_last_non_null_payload() {
    // Priority 5 replaces the payload; priority 10 fails; priority 20
    // returns null. The final result is the priority-5 output.
    let replacer = serve(FakeHooks {
        replace_payload: Some(br#"{"step":1}"#.to_vec()),
        ..FakeHooks::default()
    })
    .await;
    let failer = serve(FakeHooks {
        fail: true,
        ..FakeHooks::default()
    })
    .await;
    let passthrough = serve(FakeHooks::default()).await;

    let dispatcher = HookDispatcher::new(None);
    dispatcher.register_app(&AppId::from_static("com.example.r"), &[filter_spec(5)], replacer.client.clone());
    dispatcher.register_app(&AppId::from_static("com.example.f"), &[filter_spec(10)], failer.client.clone());
    dispatcher.register_app(&AppId::from_static("com.example.p"), &[filter_spec(20)], passthrough.client.clone());

    let result = dispatcher
        .dispatch_filter(HookPoint::ToolPreExecute, serde_json::json!({"step": 0}))
        .await;

    assert_eq!(result, serde_json::json!({"step": 1}));
    assert_eq!(replacer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(failer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(passthrough.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn circuit_opens_after_three_failures_and_skips_fourth() {
    let failer = serve(FakeHooks {
        fail: true,
        ..FakeHooks::default()
    })
    .await;

    let dispatcher = HookDispatcher::new(None);
    let id = AppId::from_static("com.example.z");
    dispatcher.register_app(&id, &[action_spec()], failer.client.clone());

    for _ in 0..3 {
        dispatcher
            .dispatch_action(HookPoint::Steering, &serde_json::json!({}))
            .await;
    }
    assert!(dispatcher.circuit_open(&id));
    assert_eq!(dispatcher.failure_count(&id), 3);

    // Fourth dispatch: the app's function is not invoked, the counter
    // stays at 3.
    dispatcher
        .dispatch_action(HookPoint::Steering, &serde_json::json!({}))
        .await;
    assert_eq!(failer.calls.load(Ordering::SeqCst), 3);
    assert_eq!(dispatcher.failure_count(&id), 3);
}

#[tokio::test]
async fn reregistration_closes_the_circuit() {
    let failer = serve(FakeHooks {
        fail: true,
        ..FakeHooks::default()
    })
    .await;

    let dispatcher = HookDispatcher::new(None);
    let id = AppId::from_static("com.example.z");
    dispatcher.register_app(&id, &[action_spec()], failer.client.clone());
    for _ in 0..3 {
        dispatcher
            .dispatch_action(HookPoint::Steering, &serde_json::json!({}))
            .await;
    }
    assert!(dispatcher.circuit_open(&id));

    // A process restart re-registers and gets a fresh circuit.
    dispatcher.deregister_app(&id);
    dispatcher.register_app(&id, &[action_spec()], failer.client.clone());
    assert!(!dispatcher.circuit_open(&id));
}

#[tokio::test]
async fn timed_out_filter_counts_as_failure_and_keeps_payload() {
    let slow = serve(FakeHooks {
        delay: Some(Duration::from_secs(2)),
        replace_payload: Some(br#"{"late":true}"#.to_vec()),
        ..FakeHooks::default()
    })
    .await;

    let dispatcher = HookDispatcher::new(None);
    let id = AppId::from_static("com.example.slow");
    dispatcher.register_app(&id, &[filter_spec(5)], slow.client.clone());

    let started = std::time::Instant::now();
    let result = dispatcher
        .dispatch_filter(HookPoint::ToolPreExecute, serde_json::json!({"kept": 1}))
        .await;

    assert_eq!(result, serde_json::json!({"kept": 1}));
    assert!(started.elapsed() < Duration::from_secs(1), "deadline not enforced");
    assert_eq!(dispatcher.failure_count(&id), 1);
}

#[tokio::test]
async fn unknown_hook_names_are_ignored() {
    let fake = serve(FakeHooks::default()).await;
    let dispatcher = HookDispatcher::new(None);
    dispatcher.register_app(
        &AppId::from_static("com.example.a"),
        &[HookSpec {
            name: "tool.mid_execute".into(),
            kind: HookKind::Filter,
            priority: 0,
        }],
        fake.client.clone(),
    );
    assert!(!dispatcher.has_subscribers(HookPoint::ToolPreExecute));
}

#[tokio::test]
async fn has_subscribers_fast_path() {
    let fake = serve(FakeHooks::default()).await;
    let dispatcher = HookDispatcher::new(None);
    assert!(!dispatcher.has_subscribers(HookPoint::ToolPreExecute));

    let id = AppId::from_static("com.example.a");
    dispatcher.register_app(&id, &[filter_spec(0)], fake.client.clone());
    assert!(dispatcher.has_subscribers(HookPoint::ToolPreExecute));
    assert!(!dispatcher.has_subscribers(HookPoint::Steering));

    dispatcher.deregister_app(&id);
    assert!(!dispatcher.has_subscribers(HookPoint::ToolPreExecute));
}
