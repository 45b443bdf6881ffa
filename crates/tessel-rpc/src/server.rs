// crates/tessel-rpc/src/server.rs
//
// RPC server setup: TesselRpcServer and RpcConfig.
//
// Uses a JSON-RPC-over-HTTP approach. A single tonic service accepts
// JSON-encoded requests with a method field, dispatches to the appropriate
// handler, and returns JSON-encoded responses in the envelope shared with
// `tessel_cluster::transport`.
//
// A store node serves `node/*` from its local storage engine; every node with
// a farm serves `farm/*`. Gossip and announcements are handed to whatever the
// daemon registered.

use std::sync::Arc;

use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use tonic::transport::Server;
use tonic::Status;

use tessel_cluster::registry::NodeRegistry;
use tessel_cluster::transport::{JsonRpcRequest, JsonRpcResponse, RPC_SERVICE};
use tessel_core::{EventHandler, PeerType};
use tessel_farm::Farm;
use tessel_store::BucketStore;

use crate::handlers::{self, HandlerError};
use crate::middleware;

/// Callback invoked with every peer announcement this node receives.
/// The daemon provides it to record peers without the RPC crate depending
/// on the daemon's membership.
pub type AnnounceCallback = Arc<dyn Fn(handlers::peer::AnnounceRequest) + Send + Sync>;

// ---------------------------------------------------------------------------
// RpcConfig
// ---------------------------------------------------------------------------

/// Configuration for the RPC server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Host to bind to (e.g., "127.0.0.1" or "0.0.0.0").
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7650,
        }
    }
}

/// Who this server speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Public URL; the node's ring identity.
    pub url: String,
    pub node_type: PeerType,
}

// ---------------------------------------------------------------------------
// TesselRpcServer
// ---------------------------------------------------------------------------

/// The RPC server for one Tessel node.
#[derive(Clone)]
pub struct TesselRpcServer {
    config: RpcConfig,
    service: TesselServiceImpl,
}

impl std::fmt::Debug for TesselRpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TesselRpcServer")
            .field("config", &self.config)
            .field("node", &self.service.node)
            .field("store", &self.service.store.is_some())
            .field("farm", &self.service.farm.is_some())
            .finish()
    }
}

impl TesselRpcServer {
    pub fn new(config: RpcConfig, node: NodeInfo) -> Self {
        Self {
            config,
            service: TesselServiceImpl {
                node,
                store: None,
                farm: None,
                registry: None,
                gossip_handler: None,
                announce_callback: None,
            },
        }
    }

    /// Serve `node/*` from this storage engine.
    pub fn with_store(mut self, store: Arc<BucketStore>) -> Self {
        self.service.store = Some(store);
        self
    }

    /// Serve `farm/*` through this coordinator; its registry backs `node/status`.
    pub fn with_farm(mut self, farm: Farm) -> Self {
        self.service.registry = Some(farm.registry().clone());
        self.service.farm = Some(farm);
        self
    }

    /// Deliver `gossip/event` calls to this handler.
    pub fn with_gossip_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.service.gossip_handler = Some(handler);
        self
    }

    /// Report `peer/announce` calls to this callback.
    pub fn with_announce_callback(mut self, callback: AnnounceCallback) -> Self {
        self.service.announce_callback = Some(callback);
        self
    }

    /// Handle one request in-process, exactly as the network path would.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        self.service.dispatch(request).await
    }

    /// Start the RPC server and listen for requests.
    ///
    /// This binds to the configured address and serves requests until
    /// the process is terminated.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = format!("{}:{}", self.config.host, self.config.port).parse()?;

        tracing::info!("Tessel RPC server starting on {}", addr);

        Server::builder()
            .accept_http1(true)
            .add_service(tonic::service::interceptor::InterceptedService::new(
                TesselJsonRpcServer::new(self.service.clone()),
                middleware::logging_interceptor,
            ))
            .serve(addr)
            .await?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// The internal service implementation that holds shared state
/// and dispatches JSON-RPC calls to the appropriate handler.
#[derive(Clone)]
struct TesselServiceImpl {
    node: NodeInfo,
    store: Option<Arc<BucketStore>>,
    farm: Option<Farm>,
    registry: Option<Arc<NodeRegistry>>,
    gossip_handler: Option<Arc<dyn EventHandler>>,
    announce_callback: Option<AnnounceCallback>,
}

impl TesselServiceImpl {
    /// Dispatch a JSON-RPC request and wrap the outcome in the envelope.
    async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match self.route(request).await {
            Ok(value) => JsonRpcResponse::ok(value),
            Err(HandlerError::NotFound(what)) => JsonRpcResponse::not_found(what),
            Err(HandlerError::Partial { value, message }) => JsonRpcResponse::partial(value, message),
            Err(e) => JsonRpcResponse::err(e.to_string()),
        }
    }

    fn store(&self) -> Result<Arc<BucketStore>, HandlerError> {
        self.store
            .clone()
            .ok_or_else(|| HandlerError::Failed(format!("{} holds no data", self.node.url)))
    }

    fn farm(&self) -> Result<Farm, HandlerError> {
        self.farm
            .clone()
            .ok_or_else(|| HandlerError::Failed(format!("{} has no coordinator", self.node.url)))
    }

    async fn route(&self, request: JsonRpcRequest) -> Result<serde_json::Value, HandlerError> {
        let params = request.params;
        match request.method.as_str() {
            // Local storage engine
            "node/insert" => {
                let store = self.store()?;
                dispatch_handler(params, |r| async move { handlers::node::handle_insert(&store, r).await })
                    .await
            }
            "node/delete" => {
                let store = self.store()?;
                dispatch_handler(params, |r| async move { handlers::node::handle_delete(&store, r).await })
                    .await
            }
            "node/select" => {
                let store = self.store()?;
                dispatch_handler(params, |r| async move { handlers::node::handle_select(&store, r).await })
                    .await
            }
            "node/keys" => {
                let store = self.store()?;
                dispatch_handler(params, |r| async move { handlers::node::handle_keys(&store, r).await })
                    .await
            }
            "node/size" => {
                let store = self.store()?;
                dispatch_handler(params, |r| async move { handlers::node::handle_size(&store, r).await })
                    .await
            }
            "node/members" => {
                let store = self.store()?;
                dispatch_handler(params, |r| async move { handlers::node::handle_members(&store, r).await })
                    .await
            }
            "node/score" => {
                let store = self.store()?;
                dispatch_handler(params, |r| async move { handlers::node::handle_score(&store, r).await })
                    .await
            }
            "node/status" => {
                let registry = self.registry.clone();
                let node = self.node.clone();
                dispatch_handler(params, |r| async move {
                    handlers::node::handle_status(r, &node.url, node.node_type, registry.as_deref()).await
                })
                .await
            }

            // Coordinator
            "farm/insert" => {
                let farm = self.farm()?;
                dispatch_handler(params, |r| async move { handlers::farm::handle_insert(&farm, r).await })
                    .await
            }
            "farm/delete" => {
                let farm = self.farm()?;
                dispatch_handler(params, |r| async move { handlers::farm::handle_delete(&farm, r).await })
                    .await
            }
            "farm/select" => {
                let farm = self.farm()?;
                dispatch_handler(params, |r| async move { handlers::farm::handle_select(&farm, r).await })
                    .await
            }
            "farm/keys" => {
                let farm = self.farm()?;
                dispatch_handler(params, |r| async move { handlers::farm::handle_keys(&farm, r).await })
                    .await
            }
            "farm/size" => {
                let farm = self.farm()?;
                dispatch_handler(params, |r| async move { handlers::farm::handle_size(&farm, r).await })
                    .await
            }
            "farm/members" => {
                let farm = self.farm()?;
                dispatch_handler(params, |r| async move { handlers::farm::handle_members(&farm, r).await })
                    .await
            }
            "farm/score" => {
                let farm = self.farm()?;
                dispatch_handler(params, |r| async move { handlers::farm::handle_score(&farm, r).await })
                    .await
            }

            // Cluster plumbing
            "gossip/event" => {
                let handler = self.gossip_handler.clone();
                dispatch_handler(params, |r| async move {
                    handlers::gossip::handle_gossip_event(handler.as_ref(), r).await
                })
                .await
            }
            "peer/announce" => {
                let callback = self.announce_callback.clone();
                let node = self.node.clone();
                dispatch_handler(params, |r| async move {
                    handlers::peer::handle_announce(r, &node.url, node.node_type, callback.as_ref()).await
                })
                .await
            }

            other => {
                tracing::warn!("Unknown RPC method: {}", other);
                Err(HandlerError::Failed(format!("Unknown method: {}", other)))
            }
        }
    }
}

/// Generic dispatch helper: deserialize params into a request type,
/// call the handler, and serialize the result to JSON.
async fn dispatch_handler<Req, Resp, F, Fut>(
    params: serde_json::Value,
    handler: F,
) -> Result<serde_json::Value, HandlerError>
where
    Req: serde::de::DeserializeOwned,
    Resp: serde::Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: std::future::Future<Output = Result<Resp, HandlerError>>,
{
    let request: Req = serde_json::from_value(params)
        .map_err(|e| HandlerError::Failed(format!("Failed to deserialize request: {}", e)))?;
    let response = handler(request).await?;
    serde_json::to_value(response)
        .map_err(|e| HandlerError::Failed(format!("Failed to serialize response: {}", e)))
}

// ---------------------------------------------------------------------------
// Tonic Service Wiring
// ---------------------------------------------------------------------------
// A single service with one method, `Call`. The request and response bodies
// are raw JSON (JsonRpcRequest/JsonRpcResponse); no proto codegen.

/// The tonic service wrapper. Accepts bytes, deserializes them as JSON-RPC,
/// and dispatches.
#[derive(Clone)]
pub struct TesselJsonRpcServer {
    inner: TesselServiceImpl,
}

impl std::fmt::Debug for TesselJsonRpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TesselJsonRpcServer").finish()
    }
}

impl TesselJsonRpcServer {
    fn new(inner: TesselServiceImpl) -> Self {
        Self { inner }
    }
}

impl tonic::server::NamedService for TesselJsonRpcServer {
    const NAME: &'static str = RPC_SERVICE;
}

impl<B> tower_service::Service<http::Request<B>> for TesselJsonRpcServer
where
    B: HttpBody + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    B::Data: Send,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let body_bytes = match collect_body(req.into_body()).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!("Failed to read request body: {}", e);
                    let resp = JsonRpcResponse::err(format!("Failed to read request body: {}", e));
                    return Ok(build_response(&resp));
                }
            };

            let rpc_request: JsonRpcRequest = match serde_json::from_slice(&body_bytes) {
                Ok(r) => r,
                Err(e) => {
                    let resp = JsonRpcResponse::err(format!("Invalid JSON-RPC request: {}", e));
                    return Ok(build_response(&resp));
                }
            };

            let rpc_response = inner.dispatch(rpc_request).await;
            Ok(build_response(&rpc_response))
        })
    }
}

/// Collect the body of an HTTP request into bytes.
async fn collect_body<B>(body: B) -> Result<Vec<u8>, String>
where
    B: HttpBody + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B::Data: Send,
{
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    loop {
        match std::future::poll_fn(|cx| HttpBody::poll_frame(body.as_mut(), cx)).await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    use bytes::Buf;
                    collected.extend_from_slice(data.chunk());
                }
            }
            Some(Err(e)) => return Err(e.into().to_string()),
            None => break,
        }
    }

    Ok(collected)
}

/// Build an HTTP response carrying the JSON envelope.
fn build_response(envelope: &JsonRpcResponse) -> http::Response<tonic::body::BoxBody> {
    let json = serde_json::to_vec(envelope).unwrap_or_default();
    let body = tonic::body::BoxBody::new(
        http_body_util::Full::new(bytes::Bytes::from(json))
            .map_err(|e| Status::internal(format!("body error: {}", e))),
    );

    let mut response = http::Response::new(body);
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_server() -> TesselRpcServer {
        TesselRpcServer::new(
            RpcConfig::default(),
            NodeInfo {
                url: "http://127.0.0.1:7650".into(),
                node_type: PeerType::Store,
            },
        )
        .with_store(Arc::new(BucketStore::new(2)))
    }

    fn call(method: &str, params: serde_json::Value) -> JsonRpcRequest {
        JsonRpcRequest {
            method: method.into(),
            params,
        }
    }

    #[tokio::test]
    async fn node_methods_round_trip_through_the_envelope() {
        let server = store_server();
        let resp = server
            .handle(call(
                "node/insert",
                json!({"key": "k", "members": [{"field": "f", "value": [1, 2], "score": 3}]}),
            ))
            .await;
        assert!(resp.success, "error: {:?}", resp.error);
        assert_eq!(resp.result.unwrap()["success"], json!(["f"]));

        let resp = server
            .handle(call("node/select", json!({"key": "k", "field": "f"})))
            .await;
        assert_eq!(resp.result.unwrap(), json!({"field": "f", "value": [1, 2], "score": 3}));

        let resp = server
            .handle(call("node/score", json!({"key": "k", "field": "g"})))
            .await;
        assert_eq!(
            resp.result.unwrap(),
            json!({"inserted": false, "present": false, "score": -1})
        );
    }

    #[tokio::test]
    async fn absence_is_flagged_not_found() {
        let resp = store_server()
            .handle(call("node/select", json!({"key": "k", "field": "f"})))
            .await;
        assert!(!resp.success);
        assert!(resp.not_found);
    }

    #[tokio::test]
    async fn bad_requests_are_errors() {
        let server = store_server();
        let resp = server.handle(call("node/teleport", json!({}))).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("Unknown method"));

        let resp = server.handle(call("node/select", json!({"key": 5}))).await;
        assert!(!resp.success);
        assert!(!resp.not_found);
        assert!(resp.error.unwrap().contains("deserialize"));

        // No coordinator configured.
        let resp = server.handle(call("farm/keys", json!({}))).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("no coordinator"));
    }

    #[tokio::test]
    async fn client_nodes_hold_no_data() {
        let server = TesselRpcServer::new(
            RpcConfig::default(),
            NodeInfo {
                url: "http://c".into(),
                node_type: PeerType::Client,
            },
        );
        let resp = server.handle(call("node/keys", json!({}))).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("holds no data"));

        let resp = server.handle(call("node/status", json!({}))).await;
        assert_eq!(resp.result.unwrap()["node_type"], json!("client"));
    }

    #[tokio::test]
    async fn announcements_reach_the_callback() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: AnnounceCallback = Arc::new(move |req: handlers::peer::AnnounceRequest| {
            sink.lock().unwrap().push(req.url);
        });
        let server = store_server().with_announce_callback(callback);
        let resp = server
            .handle(call(
                "peer/announce",
                json!({"url": "http://b:7650", "node_type": "store"}),
            ))
            .await;
        assert!(resp.success);
        assert_eq!(resp.result.unwrap()["url"], json!("http://127.0.0.1:7650"));
        assert_eq!(seen.lock().unwrap().as_slice(), &["http://b:7650".to_string()]);
    }
}
