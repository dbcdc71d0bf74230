use super::ids::LocationId;
use crate::error::{CarpoolError, Result};
use serde::{Deserialize, Serialize};

/// A pickup point, shared between requests that name the same place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub address: String,
    pub postal_code: String,
}

/// Normalized (address, postal code) pair used to deduplicate locations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationKey {
    pub address: String,
    pub postal_code: String,
}

impl LocationKey {
    /// Validates and normalizes raw pickup input.
    pub fn parse(address: &str, postal_code: &str) -> Result<Self> {
        if address.trim().is_empty() {
            return Err(CarpoolError::Validation(
                "pickup address is required".to_string(),
            ));
        }
        if postal_code.trim().is_empty() {
            return Err(CarpoolError::Validation(
                "postal code is required".to_string(),
            ));
        }
        Ok(Self {
            address: address.trim().to_lowercase(),
            postal_code: postal_code.trim().to_lowercase(),
        })
    }
}

impl Location {
    /// Builds a new location keeping the caller's casing, trimmed.
    pub fn new(address: &str, postal_code: &str) -> Self {
        Self {
            id: LocationId::new(),
            address: address.trim().to_string(),
            postal_code: postal_code.trim().to_string(),
        }
    }

    pub fn key(&self) -> LocationKey {
        LocationKey {
            address: self.address.to_lowercase(),
            postal_code: self.postal_code.to_lowercase(),
        }
    }
}
