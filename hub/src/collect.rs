use crate::worker::Worker;
use covhub_profile::Profile;
use covhub_profile::ProfileError;
use covhub_profile::filter_profiles;
use covhub_profile::merge_profile_sets;
use covhub_profile::parse_profiles;
use covhub_profile::skip_profiles;
use futures::future::join_all;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(
        "use 'service' flag and 'address' flag at the same time may cause ambiguity, please use them separately"
    )]
    AmbiguousSelection,

    #[error("service [{0}] not found")]
    ServiceNotFound(String),

    #[error("address [{0}] not found")]
    AddressNotFound(String),

    #[error("failed to get profile from {address}, error {reason}")]
    Upstream { address: String, reason: String },

    #[error("no profiles")]
    NoProfiles,

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Resolves a service/address selection to concrete agent addresses
/// against a registry snapshot.
///
/// Selecting by service and by address at once is ambiguous and rejected.
/// An unknown name or address fails the request unless `force`, which
/// downgrades it to a warning. An empty selection means everything.
pub fn resolve_addresses(
    services: &[String],
    addresses: &[String],
    force: bool,
    all: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, CollectError> {
    if !services.is_empty() && !addresses.is_empty() {
        return Err(CollectError::AmbiguousSelection);
    }

    let known: Vec<&String> = all.values().flatten().collect();
    let mut resolved = Vec::new();
    for name in services {
        match all.get(name) {
            Some(addrs) => resolved.extend(addrs.iter().cloned()),
            None if force => warn!("service [{name}] not found"),
            None => return Err(CollectError::ServiceNotFound(name.clone())),
        }
    }
    for address in addresses {
        if known.iter().any(|a| *a == address) {
            resolved.push(address.clone());
        } else if force {
            warn!("address [{address}] not found");
        } else {
            return Err(CollectError::AddressNotFound(address.clone()));
        }
    }

    if services.is_empty() && addresses.is_empty() {
        resolved = known.into_iter().cloned().collect();
    }
    Ok(resolved)
}

/// Pulls the profile of every agent in parallel, merges the results, and
/// applies the coverfile/skipfile patterns.
pub async fn collect_profiles(
    addresses: &[String],
    force: bool,
    coverfile: &[String],
    skipfile: &[String],
) -> Result<Vec<Profile>, CollectError> {
    let fetches = addresses.iter().map(|address| async move {
        let result = Worker::new(address).profile().await;
        (address, result)
    });

    let mut sets = Vec::new();
    for (address, result) in join_all(fetches).await {
        match result {
            Ok(text) => sets.push(parse_profiles(&text)?),
            Err(err) if force => warn!("get profile from [{address}] failed, error: {err:#}"),
            Err(err) => {
                return Err(CollectError::Upstream {
                    address: address.clone(),
                    reason: format!("{err:#}"),
                });
            }
        }
    }

    if sets.is_empty() {
        return Err(CollectError::NoProfiles);
    }
    let mut merged = merge_profile_sets(sets)?;
    if !coverfile.is_empty() {
        merged = filter_profiles(coverfile, merged)?;
    }
    if !skipfile.is_empty() {
        merged = skip_profiles(skipfile, merged)?;
    }
    Ok(merged)
}
