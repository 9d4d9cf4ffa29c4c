use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

use super::MapValue;
use super::protocol::*;
use super::registry::{MapRegistry, StringMap};

/// All storage endpoints, serving every map of `registry`.
pub fn router<V: MapValue>(registry: Arc<MapRegistry<V>>) -> Router {
    Router::new()
        .route(ENDPOINT_PUT, post(handle_put::<V>))
        .route(&format!("{ENDPOINT_GET}/:map/:key"), get(handle_get::<V>))
        .route(ENDPOINT_REMOVE, post(handle_remove::<V>))
        .route(ENDPOINT_FORWARD_PUT, post(handle_forward_put::<V>))
        .route(ENDPOINT_FORWARD_REMOVE, post(handle_forward_remove::<V>))
        .route(ENDPOINT_REPLICATE, post(handle_replicate::<V>))
        .route(ENDPOINT_REPLICATE_REMOVE, post(handle_replicate_remove::<V>))
        .route(
            &format!("{ENDPOINT_GET_INTERNAL}/:map/:key"),
            get(handle_get_internal::<V>),
        )
        .route(
            &format!("{ENDPOINT_PARTITION_DUMP}/:map/:partition"),
            get(handle_partition_dump::<V>),
        )
        .layer(Extension(registry))
}

async fn open_map<V: MapValue>(
    registry: &MapRegistry<V>,
    name: &str,
) -> Result<Arc<StringMap<V>>, String> {
    registry.get_map(name).await.map_err(|e| {
        tracing::error!("Map {} unavailable: {:#}", name, e);
        format!("{:#}", e)
    })
}

fn decode_value<V: MapValue>(value_json: &str) -> Result<V, String> {
    serde_json::from_str(value_json).map_err(|e| {
        tracing::error!("Failed to deserialize value: {}", e);
        e.to_string()
    })
}

fn value_response<V: MapValue>(value: Option<V>) -> (StatusCode, Json<GetResponse>) {
    match value.map(|v| serde_json::to_string(&v)).transpose() {
        Ok(Some(value_json)) => (
            StatusCode::OK,
            Json(GetResponse {
                value_json: Some(value_json),
            }),
        ),
        Ok(None) => (StatusCode::NOT_FOUND, Json(GetResponse { value_json: None })),
        Err(e) => {
            tracing::error!("Failed to serialize value: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GetResponse { value_json: None }),
            )
        }
    }
}

fn write_outcome(op: &str, result: anyhow::Result<()>) -> (StatusCode, Json<PutResponse>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(PutResponse::ok())),
        Err(e) => {
            tracing::error!("Failed to {}: {:#}", op, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PutResponse::failed(format!("{:#}", e))),
            )
        }
    }
}

pub async fn handle_put<V: MapValue>(
    Extension(registry): Extension<Arc<MapRegistry<V>>>,
    Json(req): Json<PutRequest>,
) -> (StatusCode, Json<PutResponse>) {
    let value: V = match decode_value(&req.value_json) {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(PutResponse::failed(e))),
    };
    let map = match open_map(&registry, &req.map).await {
        Ok(map) => map,
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, Json(PutResponse::failed(e))),
    };
    write_outcome("put", map.put_with_op(req.key, value, req.op_id).await)
}

pub async fn handle_get<V: MapValue>(
    Extension(registry): Extension<Arc<MapRegistry<V>>>,
    Path((map_name, key)): Path<(String, String)>,
) -> (StatusCode, Json<GetResponse>) {
    let map = match open_map(&registry, &map_name).await {
        Ok(map) => map,
        Err(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(GetResponse { value_json: None }),
            );
        }
    };
    match map.get(&key).await {
        Ok(value) => value_response(value),
        Err(e) => {
            tracing::error!("Failed to get [{}] from map {}: {:#}", key, map_name, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GetResponse { value_json: None }),
            )
        }
    }
}

pub async fn handle_get_internal<V: MapValue>(
    Extension(registry): Extension<Arc<MapRegistry<V>>>,
    Path((map_name, key)): Path<(String, String)>,
) -> (StatusCode, Json<GetResponse>) {
    let map = match open_map(&registry, &map_name).await {
        Ok(map) => map,
        Err(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(GetResponse { value_json: None }),
            );
        }
    };
    match map.get_or_load_local(&key).await {
        Ok(value) => value_response(value),
        Err(e) => {
            tracing::error!("Owner read of [{}] in map {} failed: {:#}", key, map_name, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GetResponse { value_json: None }),
            )
        }
    }
}

pub async fn handle_remove<V: MapValue>(
    Extension(registry): Extension<Arc<MapRegistry<V>>>,
    Json(req): Json<RemoveRequest>,
) -> (StatusCode, Json<GetResponse>) {
    let map = match open_map(&registry, &req.map).await {
        Ok(map) => map,
        Err(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(GetResponse { value_json: None }),
            );
        }
    };
    removal_response(&req.key, map.remove_with_op(&req.key, req.op_id).await)
}

fn removal_response<V: MapValue>(
    key: &str,
    result: anyhow::Result<Option<V>>,
) -> (StatusCode, Json<GetResponse>) {
    match result {
        // Removing an absent key is still a success.
        Ok(previous) => {
            let (_, body) = value_response(previous);
            (StatusCode::OK, body)
        }
        Err(e) => {
            tracing::error!("Failed to remove [{}]: {:#}", key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GetResponse { value_json: None }),
            )
        }
    }
}

pub async fn handle_forward_put<V: MapValue>(
    Extension(registry): Extension<Arc<MapRegistry<V>>>,
    Json(req): Json<ForwardPutRequest>,
) -> (StatusCode, Json<PutResponse>) {
    let value: V = match decode_value(&req.value_json) {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(PutResponse::failed(e))),
    };
    let map = match open_map(&registry, &req.map).await {
        Ok(map) => map,
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, Json(PutResponse::failed(e))),
    };
    write_outcome(
        "store as primary",
        map.store_as_primary(req.partition, req.op_id, req.key, value)
            .await,
    )
}

pub async fn handle_forward_remove<V: MapValue>(
    Extension(registry): Extension<Arc<MapRegistry<V>>>,
    Json(req): Json<ForwardRemoveRequest>,
) -> (StatusCode, Json<GetResponse>) {
    let map = match open_map(&registry, &req.map).await {
        Ok(map) => map,
        Err(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(GetResponse { value_json: None }),
            );
        }
    };
    let result = map
        .remove_as_primary(req.partition, req.op_id, &req.key)
        .await;
    removal_response(&req.key, result)
}

pub async fn handle_replicate<V: MapValue>(
    Extension(registry): Extension<Arc<MapRegistry<V>>>,
    Json(req): Json<ReplicateRequest>,
) -> (StatusCode, Json<PutResponse>) {
    let value: V = match decode_value(&req.value_json) {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(PutResponse::failed(e))),
    };
    let map = match open_map(&registry, &req.map).await {
        Ok(map) => map,
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, Json(PutResponse::failed(e))),
    };
    map.store_replica(req.partition, req.op_id, req.key, value);
    tracing::debug!("Stored replica in map {} partition {}", req.map, req.partition);
    (StatusCode::OK, Json(PutResponse::ok()))
}

pub async fn handle_replicate_remove<V: MapValue>(
    Extension(registry): Extension<Arc<MapRegistry<V>>>,
    Json(req): Json<ReplicateRemoveRequest>,
) -> (StatusCode, Json<PutResponse>) {
    let map = match open_map(&registry, &req.map).await {
        Ok(map) => map,
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, Json(PutResponse::failed(e))),
    };
    map.remove_replica(req.partition, req.op_id, &req.key);
    (StatusCode::OK, Json(PutResponse::ok()))
}

pub async fn handle_partition_dump<V: MapValue>(
    Extension(registry): Extension<Arc<MapRegistry<V>>>,
    Path((map_name, partition)): Path<(String, u32)>,
) -> (StatusCode, Json<PartitionDumpResponse>) {
    let entries = registry
        .existing(&map_name)
        .map(|map| map.dump_partition(partition))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match serde_json::to_string(&value) {
            Ok(value_json) => Some(KeyValueJson { key, value_json }),
            Err(e) => {
                tracing::warn!("Failed to serialize partition entry: {}", e);
                None
            }
        })
        .collect();

    (
        StatusCode::OK,
        Json(PartitionDumpResponse {
            map: map_name,
            partition,
            entries,
        }),
    )
}
