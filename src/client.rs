//! ePO client facade
//!
//! [`EpoClient`] ties resolution and dispatch together. The target server is
//! resolved on first use (or up front with [`EpoClient::connect`]) and cached
//! for the lifetime of the client; there is no refresh path, so a server that
//! changes identity needs a new client.
//!
//! Calls made while the client is unresolved each run their own resolution.
//! Concurrent first calls therefore issue duplicate registry queries; the
//! first successful resolution is kept.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::{EpoClientConfig, ResolutionMode};
use crate::dispatch::{self, CommandOutput, OutputFormat, RunOptions};
use crate::error::{Error, Result};
use crate::fabric::{Event, EventHandler, Fabric, codec};
use crate::registry::ServiceVariant;
use crate::resolver::{self, ResolvedTarget};

/// Default topic ePO publishes threat events on
pub const DEFAULT_THREAT_EVENT_TOPIC: &str = "/mcafee/event/epo/threat/response";

/// Command listing every remote command the server offers
pub const HELP_COMMAND: &str = "core.help";

/// Separator used to join help entries
#[cfg(windows)]
pub const LINE_SEPARATOR: &str = "\r\n";

/// Separator used to join help entries
#[cfg(not(windows))]
pub const LINE_SEPARATOR: &str = "\n";

/// Callback receiving each threat event as decoded JSON plus the raw event
pub type ThreatEventCallback = Arc<dyn Fn(&Value, &Event) + Send + Sync>;

/// Which ePO server the client talks to, once known
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionState {
    target: Option<ResolvedTarget>,
    last_error: Option<String>,
}

impl ResolutionState {
    /// Unresolved state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State after a successful resolution
    #[must_use]
    pub fn succeed(self, target: ResolvedTarget) -> Self {
        Self {
            target: Some(target),
            last_error: None,
        }
    }

    /// State after a failed resolution; a resolved state is left untouched
    #[must_use]
    pub fn fail(self, error: &Error) -> Self {
        if self.is_resolved() {
            return self;
        }
        Self {
            target: None,
            last_error: Some(error.to_string()),
        }
    }

    /// Whether a target has been resolved
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.target.is_some()
    }

    /// The resolved target
    #[must_use]
    pub const fn target(&self) -> Option<&ResolvedTarget> {
        self.target.as_ref()
    }

    /// Description of the most recent failed resolution
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// A registered threat event callback and the fabric handler wrapping it
struct ThreatSubscription {
    topic: String,
    callback: ThreatEventCallback,
    handler: EventHandler,
}

/// Client for invoking remote commands on an ePO server over DXL
pub struct EpoClient<F> {
    fabric: F,
    unique_id: Option<String>,
    threat_event_topic: String,
    state: RwLock<ResolutionState>,
    threat_subscriptions: Mutex<Vec<ThreatSubscription>>,
}

impl<F: Fabric> EpoClient<F> {
    /// Create a client that resolves its target on first use
    #[must_use]
    pub fn new(fabric: F, config: &EpoClientConfig) -> Self {
        Self {
            fabric,
            unique_id: config.unique_id.clone(),
            threat_event_topic: config.threat_event_topic.clone(),
            state: RwLock::new(ResolutionState::new()),
            threat_subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Create a client and resolve its target before returning
    ///
    /// Use [`EpoClient::new`] followed by [`EpoClient::resolve`] to keep the
    /// client when resolution fails.
    ///
    /// # Errors
    ///
    /// Returns the resolution error, see [`EpoClient::resolve`]
    pub async fn connect(fabric: F, config: &EpoClientConfig) -> Result<Self> {
        let client = Self::new(fabric, config);
        client.resolve().await?;
        Ok(client)
    }

    /// Create a client honoring `config.resolution`
    ///
    /// # Errors
    ///
    /// Returns the resolution error when resolution is eager
    pub async fn from_config(fabric: F, config: &EpoClientConfig) -> Result<Self> {
        match config.resolution {
            ResolutionMode::Lazy => Ok(Self::new(fabric, config)),
            ResolutionMode::Eager => Self::connect(fabric, config).await,
        }
    }

    /// The underlying fabric
    #[must_use]
    pub const fn fabric(&self) -> &F {
        &self.fabric
    }

    /// Resolve the target server, reusing a previous successful resolution
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`], [`Error::NoService`],
    /// [`Error::AmbiguousService`] or [`Error::NotFound`]; a later call
    /// tries again
    pub async fn resolve(&self) -> Result<ResolvedTarget> {
        if let Some(target) = self.state.read().await.target() {
            return Ok(target.clone());
        }

        let outcome = resolver::resolve(&self.fabric, self.unique_id.as_deref()).await;

        let mut state = self.state.write().await;
        let current = std::mem::take(&mut *state);
        match (outcome, current.target().cloned()) {
            // Another call may have resolved first; keep its answer
            (Ok(_), Some(existing)) => {
                *state = current;
                Ok(existing)
            }
            (Ok(target), None) => {
                tracing::debug!(
                    unique_id = %target.unique_id,
                    variant = %target.variant,
                    "ePO client resolved"
                );
                *state = current.succeed(target.clone());
                Ok(target)
            }
            (Err(e), _) => {
                *state = current.fail(&e);
                Err(e)
            }
        }
    }

    /// Invoke the remote command `command`
    ///
    /// # Errors
    ///
    /// Returns any resolution error, [`Error::Transport`] if the request
    /// fails and [`Error::Decode`] if the response cannot be decoded
    pub async fn run_command(&self, command: &str, options: RunOptions) -> Result<CommandOutput> {
        let target = self.resolve().await?;
        dispatch::invoke(
            &self.fabric,
            &target,
            command,
            &options.params,
            options.output_format,
        )
        .await
    }

    /// List the remote commands the server offers, one per line
    ///
    /// # Errors
    ///
    /// Fails like [`EpoClient::run_command`]; [`Error::Decode`] if the
    /// server does not answer with a list of strings
    pub async fn help(&self) -> Result<String> {
        let output = self
            .run_command(
                HELP_COMMAND,
                RunOptions::new().output_format(OutputFormat::Structured),
            )
            .await?;
        let value = output.into_structured().unwrap_or(Value::Null);
        let entries: Vec<String> = serde_json::from_value(value).map_err(Error::Decode)?;
        Ok(entries.join(LINE_SEPARATOR))
    }

    /// Invoke `callback` for every threat event on `topic`
    ///
    /// Defaults to the configured threat event topic. Events whose payload
    /// is not JSON are dropped.
    pub fn add_threat_event_callback(&self, callback: ThreatEventCallback, topic: Option<&str>) {
        let topic = topic.unwrap_or(&self.threat_event_topic).to_string();
        let user_callback = callback.clone();
        let handler: EventHandler =
            Arc::new(
                move |event: &Event| match codec::decode_json::<Value>(&event.payload) {
                    Ok(payload) => user_callback(&payload, event),
                    Err(e) => tracing::warn!(
                        topic = %event.topic,
                        error = %e,
                        "dropping threat event with undecodable payload"
                    ),
                },
            );

        self.fabric.add_event_callback(&topic, handler.clone());
        self.subscriptions().push(ThreatSubscription {
            topic,
            callback,
            handler,
        });
    }

    /// Stop invoking `callback` for threat events on `topic`
    ///
    /// `callback` must be the same `Arc` passed to
    /// [`EpoClient::add_threat_event_callback`]
    pub fn remove_threat_event_callback(&self, callback: &ThreatEventCallback, topic: Option<&str>) {
        let topic = topic.unwrap_or(&self.threat_event_topic);
        let removed: Vec<ThreatSubscription> = {
            let mut subscriptions = self.subscriptions();
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *subscriptions)
                .into_iter()
                .partition(|s| s.topic == topic && Arc::ptr_eq(&s.callback, callback));
            *subscriptions = kept;
            removed
        };

        for subscription in removed {
            self.fabric
                .remove_event_callback(&subscription.topic, &subscription.handler);
        }
    }

    /// Every ePO unique identifier registered on `fabric`, sorted
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if a registry query fails
    pub async fn lookup_epo_unique_identifiers(fabric: &F) -> Result<Vec<String>> {
        Ok(resolver::lookup_all_identifiers(fabric).await?.identifiers)
    }

    /// Snapshot of the resolution state
    pub async fn resolution_state(&self) -> ResolutionState {
        self.state.read().await.clone()
    }

    /// Resolved ePO unique identifier, if any
    pub async fn unique_id(&self) -> Option<String> {
        self.state
            .read()
            .await
            .target()
            .map(|t| t.unique_id.clone())
    }

    /// Resolved service variant, if any
    pub async fn variant(&self) -> Option<ServiceVariant> {
        self.state.read().await.target().map(|t| t.variant)
    }

    /// Description of the most recent failed resolution
    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error().map(str::to_string)
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<ThreatSubscription>> {
        self.threat_subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{LocalFabric, ServiceRegistration};

    #[test]
    fn failure_does_not_clear_resolution() {
        let target = ResolvedTarget::new("epo1", ServiceVariant::Remote);
        let state = ResolutionState::new()
            .succeed(target.clone())
            .fail(&Error::NoService);
        assert_eq!(state.target(), Some(&target));
        assert_eq!(state.last_error(), None);
    }

    #[test]
    fn failure_records_last_error() {
        let state = ResolutionState::new().fail(&Error::NoService);
        assert!(!state.is_resolved());
        assert_eq!(
            state.last_error(),
            Some("No ePO DXL services are registered with the DXL fabric")
        );
    }

    #[tokio::test]
    async fn new_client_is_unresolved_until_used() {
        let fabric = Arc::new(LocalFabric::new());
        fabric.register_service(ServiceRegistration::commands("epo1"));

        let client = EpoClient::new(fabric.clone(), &EpoClientConfig::default());
        assert_eq!(fabric.request_count(), 0);
        assert_eq!(client.unique_id().await, None);

        client.resolve().await.unwrap();
        assert_eq!(client.unique_id().await.as_deref(), Some("epo1"));
        assert_eq!(client.variant().await, Some(ServiceVariant::Commands));
    }

    #[tokio::test]
    async fn resolution_failure_is_retried() {
        let fabric = Arc::new(LocalFabric::new());
        let client = EpoClient::new(fabric.clone(), &EpoClientConfig::default());

        assert!(matches!(client.resolve().await, Err(Error::NoService)));
        assert!(client.last_error().await.is_some());

        fabric.register_service(ServiceRegistration::remote("epo1"));
        let target = client.resolve().await.unwrap();
        assert_eq!(target, ResolvedTarget::new("epo1", ServiceVariant::Remote));
        assert_eq!(client.last_error().await, None);
    }
}
