// crates/tessel-cluster/src/transport.rs
//
// JSON-RPC envelope and HTTP client shared by remote nodes and the daemon.
//
// Requests are `{method, params}` posted as JSON to a single route of the
// tonic server; responses are `{success, result, error, not_found, partial}`.
// The server side lives in tessel-rpc and reuses these types so both ends
// agree on the wire shape.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tessel_core::{Field, FieldValueScore, Key, TesselError};

/// Service name the RPC server registers under; requests are routed by it.
pub const RPC_SERVICE: &str = "tessel.rpc.TesselService";

/// Full URL of the RPC route on `host` (e.g. `http://10.0.0.1:7650`).
pub fn rpc_url(host: &str) -> String {
    format!("{}/{}/Call", host.trim_end_matches('/'), RPC_SERVICE)
}

// ---------------------------------------------------------------------------
// JSON-RPC Envelope
// ---------------------------------------------------------------------------

/// A JSON-RPC-style request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// The RPC method to invoke (e.g., "node/insert", "farm/select").
    pub method: String,
    /// JSON-encoded parameters for the method.
    pub params: serde_json::Value,
}

/// A JSON-RPC-style response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Whether the request succeeded (possibly with degraded confidence).
    pub success: bool,
    /// The result data (if success).
    pub result: Option<serde_json::Value>,
    /// Error message (if not success, or the partial-failure detail).
    pub error: Option<String>,
    /// The failure was an explicit absence rather than a fault.
    #[serde(default)]
    pub not_found: bool,
    /// Quorum was met despite some node failures or divergence.
    #[serde(default)]
    pub partial: bool,
}

impl JsonRpcResponse {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            not_found: false,
            partial: false,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
            not_found: false,
            partial: false,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            not_found: true,
            ..Self::err(message)
        }
    }

    pub fn partial(result: serde_json::Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: Some(message.into()),
            not_found: false,
            partial: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-node method parameters
// ---------------------------------------------------------------------------

/// Params for `node/keys`-style calls that take nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyParams {}

/// Params for `node/size` and `node/members`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyParams {
    pub key: Key,
}

/// Params for `node/select` and `node/score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldParams {
    pub key: Key,
    pub field: Field,
}

/// Params for `node/insert` and `node/delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteParams {
    pub key: Key,
    pub members: Vec<FieldValueScore>,
}

// ---------------------------------------------------------------------------
// RpcClient
// ---------------------------------------------------------------------------

/// Shared HTTP client speaking the JSON-RPC envelope.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
}

impl RpcClient {
    /// Build a client whose every request gives up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Invoke `method` on `host` and decode its result.
    ///
    /// Transport failures map to `Network`, an explicit absence to
    /// `NotFound`, and any other remote failure to `Node`.
    pub async fn call<P, R>(&self, host: &str, method: &str, params: &P) -> Result<R, TesselError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };

        let resp = self
            .client
            .post(rpc_url(host))
            .json(&request)
            .send()
            .await
            .map_err(|e| TesselError::Network(format!("{} {}: {}", host, method, e)))?;
        if !resp.status().is_success() {
            return Err(TesselError::Network(format!(
                "{} {} returned status {}",
                host,
                method,
                resp.status()
            )));
        }

        let envelope: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| TesselError::Serialization(format!("{} {}: {}", host, method, e)))?;
        decode(host, envelope)
    }
}

/// Turn a response envelope into the caller's result type.
pub fn decode<R: DeserializeOwned>(host: &str, envelope: JsonRpcResponse) -> Result<R, TesselError> {
    if envelope.not_found {
        return Err(TesselError::NotFound(envelope.error.unwrap_or_default()));
    }
    if !envelope.success {
        return Err(TesselError::Node(format!(
            "{}: {}",
            host,
            envelope.error.unwrap_or_else(|| "unknown error".to_string())
        )));
    }
    let value = envelope.result.unwrap_or(serde_json::Value::Null);
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_url_targets_service_route() {
        assert_eq!(
            rpc_url("http://127.0.0.1:7650/"),
            "http://127.0.0.1:7650/tessel.rpc.TesselService/Call"
        );
    }

    #[test]
    fn envelope_flags_default_to_false() {
        let json = r#"{"success":true,"result":3,"error":null}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.not_found);
        assert!(!resp.partial);
        let n: i64 = decode("h", resp).unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn decode_classifies_failures() {
        let nf = decode::<i64>("h", JsonRpcResponse::not_found("k/f"));
        assert!(matches!(nf, Err(TesselError::NotFound(m)) if m == "k/f"));

        let err = decode::<i64>("h", JsonRpcResponse::err("disk on fire"));
        match err {
            Err(TesselError::Node(m)) => assert!(m.contains("disk on fire")),
            other => panic!("Expected Node error, got: {:?}", other),
        }

        let bad = decode::<i64>("h", JsonRpcResponse::ok(serde_json::json!("nope")));
        assert!(matches!(bad, Err(TesselError::Serialization(_))));
    }

    #[test]
    fn write_params_round_trip() {
        let params = WriteParams {
            key: Key::new("k"),
            members: vec![FieldValueScore::new("f", b"v".to_vec(), 2)],
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["key"], "k");
        let back: WriteParams = serde_json::from_value(value).unwrap();
        assert_eq!(back.members, params.members);
    }
}
