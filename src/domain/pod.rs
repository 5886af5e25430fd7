// Point of delivery domain model
use super::error::{PortalError, PortalResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STABLE_ID_MIN_LEN: usize = 16;
pub const STABLE_ID_MAX_LEN: usize = 20;

/// A metering point as listed by the portal.
///
/// `text` is the descriptor shown to the user (e.g. `"99XXX1234560000G (Home)"`),
/// `value` is the identifier the portal expects in queries during the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointOfDelivery {
    pub text: String,
    pub value: String,
}

impl PointOfDelivery {
    pub fn new(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: value.into(),
        }
    }

    pub fn stable_id(&self) -> PortalResult<String> {
        extract_stable_id(&self.text)
    }
}

/// Extract the durable identifier embedded at the start of a descriptor.
///
/// The leading run of uppercase ASCII letters and digits is taken, capped at
/// 20 characters. Runs shorter than 16 characters are rejected. A descriptor
/// that is itself a bare 16-20 character identifier comes back unchanged.
pub fn extract_stable_id(descriptor: &str) -> PortalResult<String> {
    let run = descriptor
        .chars()
        .take_while(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .count();

    if run >= STABLE_ID_MIN_LEN {
        // ASCII only, so char count equals byte offset
        let end = run.min(STABLE_ID_MAX_LEN);
        return Ok(descriptor[..end].to_string());
    }

    Err(PortalError::InvalidPodIdentifier(format!(
        "could not extract a {}-{} character ID from '{}' (length: {})",
        STABLE_ID_MIN_LEN,
        STABLE_ID_MAX_LEN,
        descriptor,
        descriptor.len()
    )))
}

pub fn is_stable_id(candidate: &str) -> bool {
    matches!(extract_stable_id(candidate), Ok(id) if id == candidate)
}

/// Snapshot of the portal's POD list keyed by stable id.
#[derive(Debug, Clone, Default)]
pub struct PodRegistry {
    pods: BTreeMap<String, PointOfDelivery>,
}

impl PodRegistry {
    /// Build a registry, dropping entries without an extractable stable id.
    pub fn from_pods(pods: Vec<PointOfDelivery>) -> Self {
        let mut registry = BTreeMap::new();
        for pod in pods {
            match pod.stable_id() {
                Ok(stable_id) => {
                    registry.insert(stable_id, pod);
                }
                Err(e) => {
                    tracing::warn!("Skipping POD with invalid ID format: {} - {}", pod.text, e);
                }
            }
        }
        Self { pods: registry }
    }

    pub fn get(&self, stable_id: &str) -> Option<&PointOfDelivery> {
        self.pods.get(stable_id)
    }

    pub fn contains(&self, stable_id: &str) -> bool {
        self.pods.contains_key(stable_id)
    }

    pub fn session_value(&self, stable_id: &str) -> Option<&str> {
        self.pods.get(stable_id).map(|p| p.value.as_str())
    }

    pub fn descriptor_text(&self, stable_id: &str) -> Option<&str> {
        self.pods.get(stable_id).map(|p| p.text.as_str())
    }

    pub fn stable_ids(&self) -> Vec<String> {
        self.pods.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PointOfDelivery)> {
        self.pods.iter()
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}

/// Turn a user supplied name into something safe for entity names.
pub fn sanitize_friendly_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' };
        if c == '_' && sanitized.ends_with('_') {
            continue;
        }
        sanitized.push(c);
    }
    sanitized.trim_matches('_').to_string()
}
