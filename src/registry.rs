//! Service registry lookup
//!
//! Queries the DXL service registry for the ePO services of one variant and
//! extracts the unique identifiers of the ePO servers behind them.
//!
//! Identifier extraction depends on the variant:
//! - `commands`: the `epoGuid` entry of the service metadata
//! - `remote`: the suffix of each request channel after
//!   `/mcafee/service/epo/remote/`

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::error::DiscoveryError;
use crate::fabric::{Fabric, Request, codec};

/// Topic answering service registry queries
pub const SERVICE_REGISTRY_QUERY_TOPIC: &str = "/mcafee/service/dxl/svcregistry/query";

/// Service type of the ePO `commands` service
pub const COMMANDS_SERVICE_TYPE: &str = "/mcafee/service/epo/commands";

/// Service type of the legacy ePO `remote` service
pub const REMOTE_SERVICE_TYPE: &str = "/mcafee/service/epo/remote";

/// Request channel prefix of the legacy ePO `remote` service
pub const REMOTE_REQUEST_PREFIX: &str = "/mcafee/service/epo/remote/";

/// Metadata key carrying the ePO unique identifier of a `commands` service
pub const EPO_GUID_METADATA_KEY: &str = "epoGuid";

/// Wire protocol variant used to reach an ePO server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceVariant {
    /// One topic per command under `/mcafee/service/epo/command/<id>/remote/`
    Commands,
    /// Legacy single topic per server with a command envelope payload
    Remote,
}

impl ServiceVariant {
    /// Service type string registered for this variant
    #[must_use]
    pub const fn service_type(self) -> &'static str {
        match self {
            Self::Commands => COMMANDS_SERVICE_TYPE,
            Self::Remote => REMOTE_SERVICE_TYPE,
        }
    }

    /// Short lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commands => "commands",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ServiceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered service instance as reported by the registry
///
/// Every field is optional on the wire; a missing or `null` field reads as
/// empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    /// Registered service type
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_type: String,

    /// Advertised metadata
    #[serde(default, rename = "metaData", deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, Value>,

    /// Topics the service answers requests on
    #[serde(default, deserialize_with = "null_as_default")]
    pub request_channels: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Registry query response body
#[derive(Debug, Default, Deserialize)]
struct RegistryQueryResponse {
    #[serde(default)]
    services: Option<HashMap<String, ServiceDescriptor>>,
}

/// Distinct ePO unique identifiers in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueIdentifierSet {
    ids: Vec<String>,
}

impl UniqueIdentifierSet {
    /// Create an empty set
    #[must_use]
    pub const fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Add `id`, returning false if it was already present
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Whether `id` is in the set
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|existing| existing == id)
    }

    /// Number of identifiers
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate identifiers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Consume the set into its identifiers
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.ids
    }
}

impl<S: Into<String>> FromIterator<S> for UniqueIdentifierSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// Query the registry for every service registered under `service_type`
///
/// An empty or missing `services` map yields an empty list.
///
/// # Errors
///
/// Returns [`DiscoveryError`] if the request fails or the response body is
/// not a valid registry answer
pub async fn lookup_services<F: Fabric + ?Sized>(
    fabric: &F,
    service_type: &str,
) -> Result<Vec<ServiceDescriptor>, DiscoveryError> {
    let query = json!({ "serviceType": service_type });
    let request =
        Request::new(SERVICE_REGISTRY_QUERY_TOPIC).with_payload(query.to_string().into_bytes());

    tracing::debug!(service_type, "querying service registry");
    let response = fabric.request(request).await?;
    let body: RegistryQueryResponse = codec::decode_json(&response.payload)?;

    let services: Vec<ServiceDescriptor> = body
        .services
        .unwrap_or_default()
        .into_values()
        .map(|mut service| {
            if service.service_type.is_empty() {
                service.service_type = service_type.to_string();
            }
            service
        })
        .collect();

    tracing::debug!(service_type, count = services.len(), "service registry answered");
    Ok(services)
}

/// Extract the ePO unique identifiers advertised by `services`
#[must_use]
pub fn extract_identifiers(
    variant: ServiceVariant,
    services: &[ServiceDescriptor],
) -> UniqueIdentifierSet {
    let mut ids = UniqueIdentifierSet::new();
    for service in services {
        match variant {
            ServiceVariant::Commands => {
                if let Some(guid) = service
                    .metadata
                    .get(EPO_GUID_METADATA_KEY)
                    .and_then(Value::as_str)
                {
                    ids.insert(guid);
                }
            }
            ServiceVariant::Remote => {
                for channel in &service.request_channels {
                    if let Some(id) = channel.strip_prefix(REMOTE_REQUEST_PREFIX) {
                        ids.insert(id);
                    }
                }
            }
        }
    }
    ids
}

/// Look up the ePO unique identifiers registered for `variant`
///
/// # Errors
///
/// Returns [`DiscoveryError`] if the registry query fails
pub async fn lookup_service_ids<F: Fabric + ?Sized>(
    fabric: &F,
    variant: ServiceVariant,
) -> Result<UniqueIdentifierSet, DiscoveryError> {
    let services = lookup_services(fabric, variant.service_type()).await?;
    Ok(extract_identifiers(variant, &services))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{FabricError, LocalFabric, Response};

    fn remote_service(channels: &[&str]) -> ServiceDescriptor {
        ServiceDescriptor {
            service_type: REMOTE_SERVICE_TYPE.to_string(),
            metadata: HashMap::new(),
            request_channels: channels.iter().map(ToString::to_string).collect(),
        }
    }

    fn commands_service(guid: Option<&str>) -> ServiceDescriptor {
        let mut metadata = HashMap::new();
        if let Some(guid) = guid {
            metadata.insert(EPO_GUID_METADATA_KEY.to_string(), Value::from(guid));
        }
        ServiceDescriptor {
            service_type: COMMANDS_SERVICE_TYPE.to_string(),
            metadata,
            request_channels: vec![],
        }
    }

    #[test]
    fn remote_ids_come_from_channel_suffix() {
        let services = [remote_service(&[
            "/mcafee/service/epo/remote/epo1",
            "/some/other/topic",
        ])];
        let ids = extract_identifiers(ServiceVariant::Remote, &services);
        assert_eq!(ids.into_vec(), vec!["epo1"]);
    }

    #[test]
    fn commands_ids_come_from_metadata() {
        let services = [commands_service(Some("epo2")), commands_service(None)];
        let ids = extract_identifiers(ServiceVariant::Commands, &services);
        assert_eq!(ids.into_vec(), vec!["epo2"]);
    }

    #[test]
    fn non_string_guid_is_skipped() {
        let mut service = commands_service(None);
        service
            .metadata
            .insert(EPO_GUID_METADATA_KEY.to_string(), json!(42));
        let ids = extract_identifiers(ServiceVariant::Commands, &[service]);
        assert!(ids.is_empty());
    }

    #[test]
    fn duplicate_ids_are_kept_once() {
        let services = [
            remote_service(&["/mcafee/service/epo/remote/epo1"]),
            remote_service(&[
                "/mcafee/service/epo/remote/epo1",
                "/mcafee/service/epo/remote/epo0",
            ]),
        ];
        let ids = extract_identifiers(ServiceVariant::Remote, &services);
        assert_eq!(ids.into_vec(), vec!["epo1", "epo0"]);
    }

    #[test]
    fn unique_set_insert_reports_duplicates() {
        let mut ids = UniqueIdentifierSet::new();
        assert!(ids.insert("a"));
        assert!(!ids.insert("a"));
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn empty_registry_is_not_an_error() {
        let fabric = LocalFabric::new();
        let ids = lookup_service_ids(&fabric, ServiceVariant::Commands)
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn null_services_map_is_empty() {
        let fabric = LocalFabric::new();
        fabric.on_request(SERVICE_REGISTRY_QUERY_TOPIC, |request| {
            Ok(Response::new(request, br#"{"services": null}"#.to_vec()))
        });
        let services = lookup_services(&fabric, REMOTE_SERVICE_TYPE).await.unwrap();
        assert!(services.is_empty());
    }

    #[tokio::test]
    async fn null_and_loose_fields_keep_valid_ids() {
        let fabric = LocalFabric::new();
        fabric.on_request(SERVICE_REGISTRY_QUERY_TOPIC, |request| {
            let body = json!({"services": {
                "svc-1": {"metaData": {"epoGuid": "epo1", "port": 8443}, "requestChannels": null},
                "svc-2": {"metaData": null, "requestChannels": ["/mcafee/service/epo/remote/epo2"]},
                "svc-3": {"serviceType": null, "metaData": null, "requestChannels": null}
            }});
            Response::json(request, &body).map_err(|e| FabricError::Other(e.to_string()))
        });

        let commands = lookup_service_ids(&fabric, ServiceVariant::Commands)
            .await
            .unwrap();
        assert_eq!(commands.into_vec(), vec!["epo1"]);

        let remote = lookup_service_ids(&fabric, ServiceVariant::Remote)
            .await
            .unwrap();
        assert_eq!(remote.into_vec(), vec!["epo2"]);
    }

    #[tokio::test]
    async fn query_carries_service_type() {
        let fabric = LocalFabric::new();
        lookup_services(&fabric, REMOTE_SERVICE_TYPE).await.unwrap();

        let sent = fabric.sent_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, SERVICE_REGISTRY_QUERY_TOPIC);
        let body: serde_json::Value = codec::decode_json(&sent[0].payload).unwrap();
        assert_eq!(body, serde_json::json!({"serviceType": REMOTE_SERVICE_TYPE}));
    }

    #[tokio::test]
    async fn malformed_response_is_discovery_error() {
        let fabric = LocalFabric::new();
        fabric.on_request(SERVICE_REGISTRY_QUERY_TOPIC, |request| {
            Ok(Response::new(request, b"<html>".to_vec()))
        });
        let err = lookup_services(&fabric, REMOTE_SERVICE_TYPE)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Malformed(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_discovery_error() {
        let fabric = LocalFabric::new();
        fabric.on_request(SERVICE_REGISTRY_QUERY_TOPIC, |_| Err(FabricError::Disconnected));
        let err = lookup_services(&fabric, REMOTE_SERVICE_TYPE)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Fabric(FabricError::Disconnected)));
    }
}
