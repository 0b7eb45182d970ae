//! In-process loopback fabric
//!
//! Routes requests to handlers registered per topic, answers service registry
//! queries from its own registration table and fans events out to
//! subscribers. Every request sent through it is recorded so callers can
//! inspect request volume and payloads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::{Event, EventHandler, Fabric, FabricError, Request, Response};
use crate::registry::{
    COMMANDS_SERVICE_TYPE, EPO_GUID_METADATA_KEY, REMOTE_REQUEST_PREFIX, REMOTE_SERVICE_TYPE,
    SERVICE_REGISTRY_QUERY_TOPIC, ServiceDescriptor,
};

/// Handler answering requests on one topic
pub type RequestHandler = Arc<dyn Fn(&Request) -> Result<Response, FabricError> + Send + Sync>;

/// A service to advertise through the local registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRegistration {
    /// Registered service type
    pub service_type: String,
    /// Advertised metadata
    pub metadata: HashMap<String, Value>,
    /// Topics the service answers requests on
    pub request_channels: Vec<String>,
}

impl ServiceRegistration {
    /// Create a registration for an arbitrary service type
    #[must_use]
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            ..Self::default()
        }
    }

    /// Legacy `remote` service for the ePO server `unique_id`
    #[must_use]
    pub fn remote(unique_id: &str) -> Self {
        Self::new(REMOTE_SERVICE_TYPE)
            .with_request_channel(format!("{REMOTE_REQUEST_PREFIX}{unique_id}"))
    }

    /// `commands` service for the ePO server `unique_id`
    #[must_use]
    pub fn commands(unique_id: &str) -> Self {
        Self::new(COMMANDS_SERVICE_TYPE).with_metadata(EPO_GUID_METADATA_KEY, unique_id)
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a request channel
    #[must_use]
    pub fn with_request_channel(mut self, topic: impl Into<String>) -> Self {
        self.request_channels.push(topic.into());
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryQuery {
    service_type: Option<String>,
}

/// In-process implementation of [`Fabric`]
#[derive(Default)]
pub struct LocalFabric {
    handlers: RwLock<HashMap<String, RequestHandler>>,
    services: RwLock<Vec<(String, ServiceRegistration)>>,
    subscribers: RwLock<HashMap<String, Vec<EventHandler>>>,
    sent: Mutex<Vec<Request>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalFabric {
    /// Create an empty fabric with no services or subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests on `topic` with `handler`, replacing any previous one
    ///
    /// A handler on the registry query topic takes precedence over the
    /// built-in registry.
    pub fn on_request<H>(&self, topic: impl Into<String>, handler: H)
    where
        H: Fn(&Request) -> Result<Response, FabricError> + Send + Sync + 'static,
    {
        write(&self.handlers).insert(topic.into(), Arc::new(handler));
    }

    /// Stop answering requests on `topic`
    pub fn remove_request_handler(&self, topic: &str) -> bool {
        write(&self.handlers).remove(topic).is_some()
    }

    /// Advertise a service through the registry, returning its service ID
    pub fn register_service(&self, registration: ServiceRegistration) -> String {
        let service_id = Uuid::new_v4().to_string();
        tracing::debug!(
            service_id,
            service_type = %registration.service_type,
            "registering local service"
        );
        write(&self.services).push((service_id.clone(), registration));
        service_id
    }

    /// Withdraw a service from the registry
    pub fn unregister_service(&self, service_id: &str) -> bool {
        let mut services = write(&self.services);
        let before = services.len();
        services.retain(|(id, _)| id != service_id);
        services.len() != before
    }

    /// Deliver `event` to every handler subscribed to its topic
    ///
    /// Returns the number of handlers invoked
    pub fn publish_event(&self, event: &Event) -> usize {
        let handlers = read(&self.subscribers)
            .get(&event.topic)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of handlers subscribed to `topic`
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        read(&self.subscribers).get(topic).map_or(0, Vec::len)
    }

    /// Every request sent so far, oldest first
    #[must_use]
    pub fn sent_requests(&self) -> Vec<Request> {
        lock(&self.sent).clone()
    }

    /// Number of requests sent so far
    #[must_use]
    pub fn request_count(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Number of requests sent to `topic` so far
    #[must_use]
    pub fn requests_to(&self, topic: &str) -> usize {
        lock(&self.sent).iter().filter(|r| r.topic == topic).count()
    }

    fn answer_registry_query(&self, request: &Request) -> Result<Response, FabricError> {
        let query: RegistryQuery =
            serde_json::from_slice(&request.payload).map_err(|e| FabricError::ErrorResponse {
                code: 400,
                message: format!("invalid registry query: {e}"),
            })?;

        let services: HashMap<String, ServiceDescriptor> = read(&self.services)
            .iter()
            .filter(|(_, registration)| {
                query
                    .service_type
                    .as_deref()
                    .is_none_or(|wanted| wanted == registration.service_type)
            })
            .map(|(id, registration)| {
                (
                    id.clone(),
                    ServiceDescriptor {
                        service_type: registration.service_type.clone(),
                        metadata: registration.metadata.clone(),
                        request_channels: registration.request_channels.clone(),
                    },
                )
            })
            .collect();

        Response::json(request, &serde_json::json!({ "services": services }))
            .map_err(|e| FabricError::Other(e.to_string()))
    }
}

#[async_trait]
impl Fabric for LocalFabric {
    async fn request(&self, request: Request) -> Result<Response, FabricError> {
        lock(&self.sent).push(request.clone());
        tracing::trace!(
            topic = %request.topic,
            bytes = request.payload.len(),
            "local fabric request"
        );

        // Responses are delivered asynchronously, like a real broker round trip
        tokio::task::yield_now().await;

        let handler = read(&self.handlers).get(&request.topic).cloned();
        match handler {
            Some(handler) => handler(&request),
            None if request.topic == SERVICE_REGISTRY_QUERY_TOPIC => {
                self.answer_registry_query(&request)
            }
            None => Err(FabricError::NoHandler {
                topic: request.topic,
            }),
        }
    }

    fn add_event_callback(&self, topic: &str, handler: EventHandler) {
        write(&self.subscribers)
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    fn remove_event_callback(&self, topic: &str, handler: &EventHandler) {
        let mut subscribers = write(&self.subscribers);
        if let Some(handlers) = subscribers.get_mut(topic) {
            handlers.retain(|existing| !Arc::ptr_eq(existing, handler));
            if handlers.is_empty() {
                subscribers.remove(topic);
            }
        }
    }
}
