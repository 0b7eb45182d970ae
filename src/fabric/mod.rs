//! DXL fabric abstraction
//!
//! The client never talks to a broker directly. Everything it needs from the
//! message fabric is captured by the [`Fabric`] trait: single request/response
//! exchanges plus event callback registration. Any DXL transport can back the
//! client by implementing it; [`LocalFabric`] is an in-process implementation.

pub mod codec;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub use local::{LocalFabric, RequestHandler, ServiceRegistration};

/// A request message addressed to a single service topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Unique message ID used to correlate the response
    pub message_id: String,
    /// Destination topic
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Request {
    /// Create a request with an empty payload and a fresh message ID
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            payload: Vec::new(),
        }
    }

    /// Return this request with the given raw payload
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Return this request with `value` encoded as its JSON payload
    ///
    /// # Errors
    ///
    /// Returns error if `value` cannot be serialized
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let payload = codec::encode_json(value)?;
        Ok(self.with_payload(payload))
    }
}

/// A response message answering a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Message ID of the request being answered
    pub request_message_id: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Response {
    /// Create a response to `request` carrying `payload`
    #[must_use]
    pub fn new(request: &Request, payload: Vec<u8>) -> Self {
        Self {
            request_message_id: request.message_id.clone(),
            payload,
        }
    }

    /// Create a response to `request` with `value` encoded as JSON
    ///
    /// # Errors
    ///
    /// Returns error if `value` cannot be serialized
    pub fn json<T: Serialize + ?Sized>(
        request: &Request,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(request, codec::encode_json(value)?))
    }
}

/// An event published on a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Topic the event was published on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Event {
    /// Create an event
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Callback invoked for every event delivered on a subscribed topic
///
/// Handlers are compared by pointer identity when removed, so keep the `Arc`
/// that was registered.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Errors reported by a fabric transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FabricError {
    /// The service answered with an error response
    #[error("error response ({code}): {message}")]
    ErrorResponse {
        /// Service-defined error code
        code: i32,
        /// Human-readable error message
        message: String,
    },

    /// The client is not connected to the fabric
    #[error("not connected to the DXL fabric")]
    Disconnected,

    /// No service answers requests on the topic
    #[error("no service is available to handle requests on {topic}")]
    NoHandler {
        /// Request topic
        topic: String,
    },

    /// Any other transport failure
    #[error("fabric error: {0}")]
    Other(String),
}

/// Capabilities the client needs from the message fabric
#[async_trait]
pub trait Fabric: Send + Sync {
    /// Send `request` and wait for its single correlated response
    async fn request(&self, request: Request) -> Result<Response, FabricError>;

    /// Register `handler` for events published on `topic`
    fn add_event_callback(&self, topic: &str, handler: EventHandler);

    /// Remove a previously registered `handler` from `topic`
    fn remove_event_callback(&self, topic: &str, handler: &EventHandler);
}

#[async_trait]
impl<T: Fabric + ?Sized> Fabric for Arc<T> {
    async fn request(&self, request: Request) -> Result<Response, FabricError> {
        (**self).request(request).await
    }

    fn add_event_callback(&self, topic: &str, handler: EventHandler) {
        (**self).add_event_callback(topic, handler);
    }

    fn remove_event_callback(&self, topic: &str, handler: &EventHandler) {
        (**self).remove_event_callback(topic, handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_get_distinct_message_ids() {
        let a = Request::new("/a");
        let b = Request::new("/a");
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn response_correlates_to_request() {
        let request = Request::new("/topic");
        let response = Response::new(&request, b"ok".to_vec());
        assert_eq!(response.request_message_id, request.message_id);
    }

    #[test]
    fn with_json_encodes_payload() {
        let request = Request::new("/topic")
            .with_json(&serde_json::json!({"serviceType": "/svc"}))
            .unwrap();
        assert_eq!(request.payload, br#"{"serviceType":"/svc"}"#);
    }
}
