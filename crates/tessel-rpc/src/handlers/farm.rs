// crates/tessel-rpc/src/handlers/farm.rs
//
// Coordinator handlers behind `farm/*`.
//
// Each call runs one quorum operation on this node's farm. Failures map to
// the envelope through `HandlerError`: absence sets `not_found`, a partial
// success still returns its value with `partial` set.

use serde::{Deserialize, Serialize};

use tessel_cluster::transport::{EmptyParams, FieldParams, KeyParams};
use tessel_core::{ChangeSet, Field, FieldValueScore, Key, Presence, Quorum};
use tessel_farm::Farm;

use super::HandlerError;

/// Params for `farm/insert` and `farm/delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmWriteRequest {
    pub key: Key,
    pub members: Vec<FieldValueScore>,
    /// Defaults to `consensus`.
    #[serde(default)]
    pub quorum: Quorum,
}

/// Params for `farm/select`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmSelectRequest {
    pub key: Key,
    pub field: Field,
    /// Defaults to `consensus`.
    #[serde(default)]
    pub quorum: Quorum,
}

pub async fn handle_insert(farm: &Farm, request: FarmWriteRequest) -> Result<ChangeSet, HandlerError> {
    Ok(farm
        .insert(&request.key, request.members, request.quorum)
        .await?)
}

pub async fn handle_delete(farm: &Farm, request: FarmWriteRequest) -> Result<ChangeSet, HandlerError> {
    Ok(farm
        .delete(&request.key, request.members, request.quorum)
        .await?)
}

pub async fn handle_select(
    farm: &Farm,
    request: FarmSelectRequest,
) -> Result<FieldValueScore, HandlerError> {
    Ok(farm
        .select(&request.key, &request.field, request.quorum)
        .await?)
}

pub async fn handle_keys(farm: &Farm, _request: EmptyParams) -> Result<Vec<Key>, HandlerError> {
    Ok(farm.keys().await?)
}

pub async fn handle_size(farm: &Farm, request: KeyParams) -> Result<i64, HandlerError> {
    Ok(farm.size(&request.key).await?)
}

pub async fn handle_members(farm: &Farm, request: KeyParams) -> Result<Vec<Field>, HandlerError> {
    Ok(farm.members(&request.key).await?)
}

pub async fn handle_score(farm: &Farm, request: FieldParams) -> Result<Presence, HandlerError> {
    Ok(farm.score(&request.key, &request.field).await?)
}
