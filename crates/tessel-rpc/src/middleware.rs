// crates/tessel-rpc/src/middleware.rs
//
// Middleware for the RPC server.

use tonic::{Request, Status};

/// Logging interceptor for incoming requests.
pub fn logging_interceptor(req: Request<()>) -> Result<Request<()>, Status> {
    let agent = req
        .metadata()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::debug!("Incoming RPC request (agent {})", agent);
    Ok(req)
}
