use crate::error::{Result, VectorStoreError};
use std::collections::HashMap;

/// Bijection between dense index ordinals `0..N` and catalog identities.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrdinalMap {
    identities: Vec<String>,
    ordinals: HashMap<String, usize>,
}

impl OrdinalMap {
    /// `identities[i]` becomes ordinal `i`. Duplicate identities break the
    /// bijection and are rejected.
    pub fn from_identities(identities: Vec<String>) -> Result<Self> {
        let mut ordinals = HashMap::with_capacity(identities.len());
        for (ordinal, identity) in identities.iter().enumerate() {
            if let Some(previous) = ordinals.insert(identity.clone(), ordinal) {
                return Err(VectorStoreError::IndexCorruption(format!(
                    "identity '{identity}' is mapped to ordinals {previous} and {ordinal}"
                )));
            }
        }
        Ok(Self {
            identities,
            ordinals,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    #[must_use]
    pub fn identity(&self, ordinal: usize) -> Option<&str> {
        self.identities.get(ordinal).map(String::as_str)
    }

    #[must_use]
    pub fn ordinal(&self, identity: &str) -> Option<usize> {
        self.ordinals.get(identity).copied()
    }

    /// Identities in ordinal order.
    #[must_use]
    pub fn identities(&self) -> &[String] {
        &self.identities
    }
}
