//! Errors surfaced by the fetch-or-fail accessors.

use thiserror::Error;

/// Returned by [`ChainedHashMap::at`](crate::ChainedHashMap::at) and
/// [`ChainedHashMap::at_mut`](crate::ChainedHashMap::at_mut) when the key is
/// absent. Lookups never insert, so the map is unchanged.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("key not found in map")]
pub struct KeyNotFoundError;
