//! Shared test utilities

#![allow(dead_code)]

use std::sync::Arc;

use epo_dxl_client::fabric::codec;
use epo_dxl_client::registry::REMOTE_REQUEST_PREFIX;
use epo_dxl_client::{LocalFabric, Response, ServiceRegistration};
use serde_json::{Value, json};

/// Build an empty loopback fabric
#[must_use]
pub fn setup_fabric() -> Arc<LocalFabric> {
    Arc::new(LocalFabric::new())
}

/// Register a legacy `remote` ePO server that echoes the request envelope
pub fn add_remote_epo(fabric: &LocalFabric, unique_id: &str) {
    fabric.register_service(ServiceRegistration::remote(unique_id));
    let id = unique_id.to_string();
    fabric.on_request(format!("{REMOTE_REQUEST_PREFIX}{unique_id}"), move |request| {
        let envelope: Value = codec::decode_json(&request.payload).expect("envelope is JSON");
        Ok(Response::json(request, &json!({ "server": id, "echo": envelope })).expect("encodes"))
    });
}

/// Register a `commands` ePO server without any command handlers
pub fn add_commands_epo(fabric: &LocalFabric, unique_id: &str) {
    fabric.register_service(ServiceRegistration::commands(unique_id));
}

/// Answer requests on `topic` with `body` encoded as JSON
pub fn answer_json(fabric: &LocalFabric, topic: &str, body: Value) {
    fabric.on_request(topic, move |request| {
        Ok(Response::json(request, &body).expect("encodes"))
    });
}

/// Answer requests on `topic` with raw `payload`
pub fn answer_raw(fabric: &LocalFabric, topic: &str, payload: &'static [u8]) {
    fabric.on_request(topic, move |request| Ok(Response::new(request, payload.to_vec())));
}
