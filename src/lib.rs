//! ePO DXL Client - invoke remote ePO commands over the DXL fabric
//!
//! This library lets callers run named ePO remote commands (e.g.
//! `system.find`) without building DXL topics or payloads by hand:
//! - Service discovery through the DXL service registry
//! - Resolution of the target ePO server and its service variant
//! - Command dispatch for both the `commands` and legacy `remote` services
//! - Threat event subscription
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    EpoClient                         │
//! │   run_command  │  help  │  threat event callbacks   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │        Resolver          │        Dispatcher         │
//! │  which server, variant   │  topic + payload, decode  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │             Fabric (DXL transport)                   │
//! │   request/response  │  event callbacks              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! # async fn example(fabric: epo_dxl_client::LocalFabric) -> epo_dxl_client::Result<()> {
//! use epo_dxl_client::{EpoClient, EpoClientConfig, RunOptions};
//!
//! let client = EpoClient::new(fabric, &EpoClientConfig::default());
//! let systems = client
//!     .run_command("system.find", RunOptions::new().param("searchText", "broker"))
//!     .await?;
//! println!("{systems:?}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fabric;
pub mod registry;
pub mod resolver;

pub use client::{EpoClient, ResolutionState, ThreatEventCallback};
pub use config::{EpoClientConfig, ResolutionMode};
pub use dispatch::{CommandOutput, OutputFormat, Params, RunOptions};
pub use error::{DiscoveryError, Error, Result};
pub use fabric::{
    Event, EventHandler, Fabric, FabricError, LocalFabric, Request, Response,
    ServiceRegistration,
};
pub use registry::{ServiceDescriptor, ServiceVariant, UniqueIdentifierSet};
pub use resolver::{IdentifierLookup, ResolvedTarget};
