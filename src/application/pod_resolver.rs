// Stable ID resolver - maps durable POD ids onto the current session's values
use crate::application::metering_portal::{MeteringPortal, PodQuery};
use crate::domain::error::{PortalError, PortalResult};
use crate::domain::pod::PodRegistry;
use parking_lot::RwLock;
use std::sync::Arc;

struct Snapshot {
    registry: Arc<PodRegistry>,
    generation: u64,
}

/// Keeps the latest POD registry and answers stable id lookups against it.
///
/// The registry is replaced wholesale on every discovery, so readers see
/// either the previous complete snapshot or the new one. A snapshot taken
/// under an older login is treated as empty.
pub struct PodResolver {
    portal: Arc<dyn MeteringPortal>,
    snapshot: RwLock<Snapshot>,
}

impl PodResolver {
    pub fn new(portal: Arc<dyn MeteringPortal>) -> Self {
        Self {
            portal,
            snapshot: RwLock::new(Snapshot {
                registry: Arc::new(PodRegistry::default()),
                generation: 0,
            }),
        }
    }

    /// Fetch the POD list and rebuild the registry.
    pub async fn discover_pods(&self) -> PortalResult<Arc<PodRegistry>> {
        let generation = self.portal.session_generation();
        let pods = self.portal.points_of_delivery().await.map_err(|e| {
            tracing::error!("Error discovering PODs: {}", e);
            e
        })?;

        if pods.is_empty() {
            return Err(PortalError::NoPodsFound);
        }

        tracing::debug!(
            "Raw PODs from API: {:?}",
            pods.iter().map(|p| (&p.text, &p.value)).collect::<Vec<_>>()
        );

        let registry = Arc::new(PodRegistry::from_pods(pods));
        tracing::info!("Discovered {} PODs", registry.len());

        *self.snapshot.write() = Snapshot {
            registry: registry.clone(),
            generation,
        };
        Ok(registry)
    }

    /// Snapshot usable under the current login, discovering first if needed.
    pub async fn ensure_registry(&self) -> PortalResult<Arc<PodRegistry>> {
        let current = self.portal.session_generation();
        {
            let snapshot = self.snapshot.read();
            if !snapshot.registry.is_empty() && snapshot.generation == current {
                return Ok(snapshot.registry.clone());
            }
        }
        tracing::debug!("POD registry empty or from an older session, refreshing");
        self.discover_pods().await
    }

    pub async fn session_value(&self, stable_id: &str) -> PortalResult<Option<String>> {
        let registry = self.ensure_registry().await?;
        Ok(registry.session_value(stable_id).map(str::to_string))
    }

    pub async fn descriptor_text(&self, stable_id: &str) -> PortalResult<Option<String>> {
        let registry = self.ensure_registry().await?;
        Ok(registry.descriptor_text(stable_id).map(str::to_string))
    }

    /// Everything a portal query needs for one POD, or `PodNotFound`.
    pub async fn resolve(&self, stable_id: &str) -> PortalResult<PodQuery> {
        let session_value = self
            .session_value(stable_id)
            .await?
            .ok_or_else(|| PortalError::PodNotFound(stable_id.to_string()))?;
        let descriptor_text = self
            .descriptor_text(stable_id)
            .await?
            .ok_or_else(|| PortalError::PodNotFound(stable_id.to_string()))?;

        Ok(PodQuery {
            stable_id: stable_id.to_string(),
            session_value,
            descriptor_text,
        })
    }
}
