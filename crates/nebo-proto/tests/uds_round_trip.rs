//! Round-trip the generated stubs over a real unix socket.

#![cfg(unix)]

use tonic::{Request, Response, Status};

use nebo_proto::v1::hooks_server::{Hooks, HooksServer};
use nebo_proto::v1::{HookActionAck, HookFilterResult, HookInvocation};

struct UppercaseFilter;

#[tonic::async_trait]
impl Hooks for UppercaseFilter {
    async fn invoke_filter(
        &self,
        request: Request<HookInvocation>,
    ) -> Result<Response<HookFilterResult>, Status> {
        let invocation = request.into_inner();
        let payload = String::from_utf8(invocation.payload_json)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        Ok(Response::new(HookFilterResult {
            handled: false,
            payload_json: Some(payload.to_uppercase().into_bytes()),
        }))
    }

    async fn invoke_action(
        &self,
        _request: Request<HookInvocation>,
    ) -> Result<Response<HookActionAck>, Status> {
        Ok(Response::new(HookActionAck {}))
    }
}

#[tokio::test]
async fn invoke_filter_over_unix_socket() {
    let tmp = tempfile::tempdir().unwrap();
    let socket = tmp.path().join("app.sock");

    let incoming = nebo_proto::uds::bind(&socket).unwrap();
    let server = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(HooksServer::new(UppercaseFilter))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });

    let channel = nebo_proto::uds::connect(&socket).await.unwrap();
    let mut client = nebo_proto::v1::hooks_client::HooksClient::new(channel);

    let result = client
        .invoke_filter(HookInvocation {
            hook: "tool.pre_execute".into(),
            payload_json: br#"{"ok":1}"#.to_vec(),
        })
        .await
        .unwrap()
        .into_inner();

    assert!(!result.handled);
    assert_eq!(result.payload_json.unwrap(), br#"{"OK":1}"#.to_vec());

    let ack = client
        .invoke_action(HookInvocation {
            hook: "steering".into(),
            payload_json: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(ack.into_inner(), HookActionAck {});

    server.abort();
}
