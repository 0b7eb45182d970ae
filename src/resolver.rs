//! ePO server identifier resolution
//!
//! Combines registry lookups for both service variants to decide which ePO
//! server a client talks to and which wire protocol reaches it. The legacy
//! `remote` variant is always queried first and wins whenever it is present.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::fabric::Fabric;
use crate::registry::{ServiceVariant, lookup_service_ids};

/// An ePO server identifier paired with the variant that reaches it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedTarget {
    /// ePO unique identifier
    pub unique_id: String,
    /// Wire protocol variant
    pub variant: ServiceVariant,
}

impl ResolvedTarget {
    /// Create a resolved target
    #[must_use]
    pub fn new(unique_id: impl Into<String>, variant: ServiceVariant) -> Self {
        Self {
            unique_id: unique_id.into(),
            variant,
        }
    }
}

/// Every ePO identifier found across both variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierLookup {
    /// Merged identifiers, deduplicated and sorted ascending
    pub identifiers: Vec<String>,
    /// True when no `remote` service was found, so `commands` is preferred
    pub prefer_commands: bool,
}

impl IdentifierLookup {
    /// Merge the identifiers found for each variant
    #[must_use]
    pub fn merge<'a>(
        remote: impl IntoIterator<Item = &'a str>,
        commands: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let remote: BTreeSet<&str> = remote.into_iter().collect();
        let prefer_commands = remote.is_empty();
        let identifiers = remote
            .into_iter()
            .chain(commands)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        Self {
            identifiers,
            prefer_commands,
        }
    }

    /// Variant implied by the lookup
    #[must_use]
    pub const fn preferred_variant(&self) -> ServiceVariant {
        if self.prefer_commands {
            ServiceVariant::Commands
        } else {
            ServiceVariant::Remote
        }
    }

    /// Pick the single available server
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoService`] when nothing was found and
    /// [`Error::AmbiguousService`] when more than one server was found
    pub fn into_single_target(self) -> Result<ResolvedTarget> {
        let variant = self.preferred_variant();
        let mut identifiers = self.identifiers;
        match identifiers.len() {
            0 => Err(Error::NoService),
            1 => Ok(ResolvedTarget::new(identifiers.remove(0), variant)),
            _ => Err(Error::AmbiguousService(identifiers)),
        }
    }
}

/// Look up every ePO identifier registered under either variant
///
/// A failed `remote` lookup is returned immediately without querying the
/// `commands` variant.
///
/// # Errors
///
/// Returns [`Error::Discovery`] if either registry query fails
pub async fn lookup_all_identifiers<F: Fabric + ?Sized>(fabric: &F) -> Result<IdentifierLookup> {
    let remote = lookup_service_ids(fabric, ServiceVariant::Remote).await?;
    let commands = lookup_service_ids(fabric, ServiceVariant::Commands).await?;

    let lookup = IdentifierLookup::merge(remote.iter(), commands.iter());
    tracing::debug!(
        remote = remote.len(),
        commands = commands.len(),
        merged = lookup.identifiers.len(),
        "looked up ePO identifiers"
    );
    Ok(lookup)
}

/// Determine which variant serves the explicitly named `unique_id`
///
/// # Errors
///
/// Returns [`Error::Discovery`] if a registry query fails and
/// [`Error::NotFound`] if neither variant advertises `unique_id`
pub async fn resolve_by_identifier<F: Fabric + ?Sized>(
    fabric: &F,
    unique_id: &str,
) -> Result<ServiceVariant> {
    for variant in [ServiceVariant::Remote, ServiceVariant::Commands] {
        let ids = lookup_service_ids(fabric, variant).await?;
        if ids.contains(unique_id) {
            tracing::debug!(unique_id, %variant, "resolved ePO service variant");
            return Ok(variant);
        }
    }
    Err(Error::NotFound(unique_id.to_string()))
}

/// Find the only ePO server on the fabric
///
/// # Errors
///
/// Returns [`Error::Discovery`] if a registry query fails,
/// [`Error::NoService`] if no server is registered and
/// [`Error::AmbiguousService`] if more than one is
pub async fn resolve_automatic<F: Fabric + ?Sized>(fabric: &F) -> Result<ResolvedTarget> {
    let target = lookup_all_identifiers(fabric).await?.into_single_target()?;
    tracing::debug!(
        unique_id = %target.unique_id,
        variant = %target.variant,
        "resolved ePO server"
    );
    Ok(target)
}

/// Resolve `unique_id` if given, otherwise find the only server
///
/// # Errors
///
/// See [`resolve_by_identifier`] and [`resolve_automatic`]
pub async fn resolve<F: Fabric + ?Sized>(
    fabric: &F,
    unique_id: Option<&str>,
) -> Result<ResolvedTarget> {
    match unique_id {
        Some(id) => {
            let variant = resolve_by_identifier(fabric, id).await?;
            Ok(ResolvedTarget::new(id, variant))
        }
        None => resolve_automatic(fabric).await,
    }
}
