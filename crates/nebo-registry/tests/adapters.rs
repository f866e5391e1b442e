//! Adapter behavior against real capability servers over unix sockets.

#![cfg(unix)]

use std::sync::{Arc, Mutex};

use futures::StreamExt as _;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use nebo_core::contract::{
    ChatEvent, ChatGateway as _, ChatRequest, ChatTurn, Configurable as _, ToolInvoker as _,
};
use nebo_core::AppId;
use nebo_proto::v1::gateway_server::{Gateway, GatewayServer};
use nebo_proto::v1::tool_server::{Tool, ToolServer};
use nebo_proto::v1::{self, ChatEventType};
use nebo_registry::{GatewayAdapter, SettingsBridge, ToolAdapter};
use nebo_runtime::CapabilityClients;

/// Gateway fake: records the last request and streams two deltas.
#[derive(Default)]
struct FakeGateway {
    last_request: Arc<Mutex<Option<v1::ChatRequest>>>,
    last_settings: Arc<Mutex<Option<std::collections::HashMap<String, String>>>>,
}

#[tonic::async_trait]
impl Gateway for FakeGateway {
    async fn health_check(
        &self,
        _request: Request<v1::HealthCheckRequest>,
    ) -> Result<Response<v1::HealthCheckResponse>, Status> {
        Ok(Response::new(v1::HealthCheckResponse {
            healthy: true,
            message: String::new(),
        }))
    }

    async fn on_settings_changed(
        &self,
        request: Request<v1::SettingsChanged>,
    ) -> Result<Response<v1::SettingsAck>, Status> {
        *self.last_settings.lock().unwrap() = Some(request.into_inner().settings);
        Ok(Response::new(v1::SettingsAck {}))
    }

    type ChatCompletionStream = ReceiverStream<Result<v1::ChatEvent, Status>>;

    async fn chat_completion(
        &self,
        request: Request<v1::ChatRequest>,
    ) -> Result<Response<Self::ChatCompletionStream>, Status> {
        *self.last_request.lock().unwrap() = Some(request.into_inner());
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tokio::spawn(async move {
            for content in ["Hello", " world"] {
                let _ = tx
                    .send(Ok(v1::ChatEvent {
                        event_type: ChatEventType::Delta as i32,
                        content: content.to_string(),
                        error: String::new(),
                    }))
                    .await;
            }
            let _ = tx
                .send(Ok(v1::ChatEvent {
                    event_type: ChatEventType::Done as i32,
                    content: String::new(),
                    error: String::new(),
                }))
                .await;
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

struct GatewayFixture {
    _dir: tempfile::TempDir,
    _server: tokio::task::JoinHandle<()>,
    channel: Channel,
    last_request: Arc<Mutex<Option<v1::ChatRequest>>>,
    last_settings: Arc<Mutex<Option<std::collections::HashMap<String, String>>>>,
}

async fn serve_gateway() -> GatewayFixture {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("app.sock");
    let fake = FakeGateway::default();
    let last_request = Arc::clone(&fake.last_request);
    let last_settings = Arc::clone(&fake.last_settings);

    let incoming = nebo_proto::uds::bind(&socket).unwrap();
    let server = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(GatewayServer::new(fake))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });

    let channel = nebo_proto::uds::connect(&socket).await.unwrap();
    GatewayFixture {
        _dir: dir,
        _server: server,
        channel,
        last_request,
        last_settings,
    }
}

fn chat_request() -> ChatRequest {
    ChatRequest {
        model: "nebo-large".into(),
        messages: vec![ChatTurn {
            role: "user".into(),
            content: "hi".into(),
        }],
        bearer_token: Some("secret-user-token".into()),
    }
}

#[tokio::test]
async fn gateway_strips_token_without_user_token_permission() {
    let fixture = serve_gateway().await;
    let adapter = GatewayAdapter::new(
        AppId::from_static("com.example.gw"),
        nebo_proto::v1::gateway_client::GatewayClient::new(fixture.channel.clone()),
        false,
        None,
    );

    let mut stream = adapter.chat(chat_request()).await.unwrap();
    while stream.next().await.is_some() {}

    let seen = fixture.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(seen.bearer_token, "", "token must be stripped");
    assert_eq!(seen.model, "nebo-large");
    assert_eq!(seen.messages.len(), 1);
}

#[tokio::test]
async fn gateway_forwards_token_with_user_token_permission() {
    let fixture = serve_gateway().await;
    let adapter = GatewayAdapter::new(
        AppId::from_static("com.example.gw"),
        nebo_proto::v1::gateway_client::GatewayClient::new(fixture.channel.clone()),
        true,
        None,
    );

    let mut stream = adapter.chat(chat_request()).await.unwrap();
    while stream.next().await.is_some() {}

    let seen = fixture.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(seen.bearer_token, "secret-user-token");
}

#[tokio::test]
async fn gateway_converts_stream_events() {
    let fixture = serve_gateway().await;
    let adapter = GatewayAdapter::new(
        AppId::from_static("com.example.gw"),
        nebo_proto::v1::gateway_client::GatewayClient::new(fixture.channel.clone()),
        false,
        None,
    );

    let events: Vec<ChatEvent> = adapter.chat(chat_request()).await.unwrap().collect().await;
    assert_eq!(
        events,
        vec![
            ChatEvent::Delta("Hello".into()),
            ChatEvent::Delta(" world".into()),
            ChatEvent::Done,
        ]
    );
}

#[tokio::test]
async fn settings_bridge_forwards_to_first_present_client() {
    let fixture = serve_gateway().await;
    let clients = CapabilityClients {
        gateway: Some(nebo_proto::v1::gateway_client::GatewayClient::new(
            fixture.channel.clone(),
        )),
        ..CapabilityClients::default()
    };
    let bridge = SettingsBridge::new(AppId::from_static("com.example.gw"), clients);

    let settings =
        std::collections::HashMap::from([("api_key".to_string(), "rotated".to_string())]);
    bridge.on_settings_changed(settings).await.unwrap();

    let seen = fixture.last_settings.lock().unwrap().clone().unwrap();
    assert_eq!(seen.get("api_key").map(String::as_str), Some("rotated"));
}

/// Tool fake: echoes arguments back under a key, or fails on demand.
struct FakeTool;

#[tonic::async_trait]
impl Tool for FakeTool {
    async fn health_check(
        &self,
        _request: Request<v1::HealthCheckRequest>,
    ) -> Result<Response<v1::HealthCheckResponse>, Status> {
        Ok(Response::new(v1::HealthCheckResponse {
            healthy: true,
            message: String::new(),
        }))
    }

    async fn on_settings_changed(
        &self,
        _request: Request<v1::SettingsChanged>,
    ) -> Result<Response<v1::SettingsAck>, Status> {
        Ok(Response::new(v1::SettingsAck {}))
    }

    async fn execute(
        &self,
        request: Request<v1::ToolExecuteRequest>,
    ) -> Result<Response<v1::ToolExecuteResponse>, Status> {
        let request = request.into_inner();
        if request.tool == "broken" {
            return Ok(Response::new(v1::ToolExecuteResponse {
                result_json: Vec::new(),
                error: "tool exploded".into(),
            }));
        }
        let arguments: serde_json::Value =
            serde_json::from_slice(&request.arguments_json).unwrap_or_default();
        let result = serde_json::json!({"tool": request.tool, "echo": arguments});
        Ok(Response::new(v1::ToolExecuteResponse {
            result_json: serde_json::to_vec(&result).unwrap(),
            error: String::new(),
        }))
    }
}

async fn serve_tool() -> (tempfile::TempDir, tokio::task::JoinHandle<()>, Channel) {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("app.sock");
    let incoming = nebo_proto::uds::bind(&socket).unwrap();
    let server = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(ToolServer::new(FakeTool))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });
    let channel = nebo_proto::uds::connect(&socket).await.unwrap();
    (dir, server, channel)
}

#[tokio::test]
async fn tool_adapter_round_trips_json() {
    let (_dir, _server, channel) = serve_tool().await;
    let adapter = ToolAdapter::new(
        AppId::from_static("com.example.tools"),
        "search",
        nebo_proto::v1::tool_client::ToolClient::new(channel),
        None,
    );

    let result = adapter
        .invoke(serde_json::json!({"query": "rust"}))
        .await
        .unwrap();
    assert_eq!(result["tool"], "search");
    assert_eq!(result["echo"]["query"], "rust");
}

#[tokio::test]
async fn tool_adapter_surfaces_app_errors() {
    let (_dir, _server, channel) = serve_tool().await;
    let adapter = ToolAdapter::new(
        AppId::from_static("com.example.tools"),
        "broken",
        nebo_proto::v1::tool_client::ToolClient::new(channel),
        None,
    );

    let err = adapter.invoke(serde_json::json!({})).await.unwrap_err();
    assert!(err.to_string().contains("tool exploded"));
}
