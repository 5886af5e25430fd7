// Migration - Rewrites stored POD selections to stable ids
use crate::application::metering_portal::MeteringPortal;
use crate::domain::account::Credentials;
use crate::domain::error::PortalError;
use crate::domain::pod::{is_stable_id, PodRegistry};
use std::sync::Arc;
use thiserror::Error;

/// Configuration version written once stored POD ids are stable ids.
pub const CURRENT_CONFIG_VERSION: u32 = 2;

/// Stored ids longer than this are treated as old session tokens.
pub const DEFAULT_LEGACY_ID_MIN_LENGTH: usize = 50;

/// Where the POD selection is persisted.
pub trait PodSelectionStore: Send + Sync {
    fn config_version(&self) -> anyhow::Result<u32>;

    fn selected_pods(&self) -> anyhow::Result<Vec<String>>;

    fn save_selected_pods(&self, pods: &[String], version: u32) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to authenticate during migration")]
    AuthFailed,

    #[error("POD discovery failed during migration: {0}")]
    Discovery(#[from] PortalError),

    #[error("Configuration storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Stored configuration already at the current version.
    UpToDate,
    /// Version bumped; ids were already stable.
    VersionBumped,
    Migrated { pods: Vec<String>, dropped: Vec<String> },
}

pub struct MigrationService {
    portal: Arc<dyn MeteringPortal>,
    store: Arc<dyn PodSelectionStore>,
    legacy_id_min_length: usize,
}

impl MigrationService {
    pub fn new(
        portal: Arc<dyn MeteringPortal>,
        store: Arc<dyn PodSelectionStore>,
        legacy_id_min_length: usize,
    ) -> Self {
        Self {
            portal,
            store,
            legacy_id_min_length,
        }
    }

    fn is_legacy_session_id(&self, id: &str) -> bool {
        id.len() > self.legacy_id_min_length
    }

    pub async fn migrate(
        &self,
        credentials: &Credentials,
    ) -> Result<MigrationOutcome, MigrationError> {
        let version = self.store.config_version()?;
        if version >= CURRENT_CONFIG_VERSION {
            return Ok(MigrationOutcome::UpToDate);
        }

        let stored = self.store.selected_pods()?;
        let needs_conversion = stored
            .iter()
            .any(|id| self.is_legacy_session_id(id) || !is_stable_id(id));

        if !needs_conversion {
            self.store.save_selected_pods(&stored, CURRENT_CONFIG_VERSION)?;
            tracing::info!("Configuration upgraded to version {}", CURRENT_CONFIG_VERSION);
            return Ok(MigrationOutcome::VersionBumped);
        }

        tracing::info!("Migrating stored POD identifiers to stable POD IDs");
        if !self.portal.is_authenticated()
            && !self
                .portal
                .authenticate(&credentials.username, &credentials.password)
                .await
        {
            tracing::error!("Failed to authenticate during migration");
            return Err(MigrationError::AuthFailed);
        }

        let registry = PodRegistry::from_pods(self.portal.points_of_delivery().await?);
        tracing::debug!("Available PODs for migration: {:?}", registry.stable_ids());

        let mut migrated: Vec<String> = Vec::new();
        let mut dropped = Vec::new();
        for id in &stored {
            match self.convert(id, &registry) {
                Some(stable_id) => {
                    if !migrated.contains(&stable_id) {
                        migrated.push(stable_id);
                    }
                }
                None => {
                    tracing::warn!("Stored POD {} not found in current PODs, removing", id);
                    dropped.push(id.clone());
                }
            }
        }

        self.store
            .save_selected_pods(&migrated, CURRENT_CONFIG_VERSION)?;
        tracing::info!("Configuration migration completed");
        Ok(MigrationOutcome::Migrated {
            pods: migrated,
            dropped,
        })
    }

    fn convert(&self, stored: &str, registry: &PodRegistry) -> Option<String> {
        if is_stable_id(stored) {
            return registry.contains(stored).then(|| stored.to_string());
        }

        if self.is_legacy_session_id(stored) {
            let found = registry
                .iter()
                .find(|(_, pod)| pod.value == stored)
                .map(|(stable_id, _)| stable_id.clone());
            if let Some(stable_id) = &found {
                tracing::info!("Migrated session POD ID {} to stable ID {}", stored, stable_id);
            }
            return found;
        }

        if let Some((stable_id, _)) = registry.iter().find(|(_, pod)| pod.text == stored) {
            tracing::info!("Converted POD text {} to stable ID {}", stored, stable_id);
            return Some(stable_id.clone());
        }

        // Descriptor label changed; match on the leading POD number instead
        let number: String = stored
            .chars()
            .take_while(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            .collect();
        if number.is_empty() {
            tracing::warn!("Could not extract POD number from {}", stored);
            return None;
        }
        let found = registry
            .iter()
            .find(|(_, pod)| pod.text.starts_with(&number))
            .map(|(stable_id, _)| stable_id.clone());
        if let Some(stable_id) = &found {
            tracing::info!("Updated POD from {} to stable ID {}", stored, stable_id);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fake_portal::FakePortal;
    use crate::domain::pod::PointOfDelivery;
    use parking_lot::Mutex;

    struct MemoryStore {
        version: Mutex<u32>,
        pods: Mutex<Vec<String>>,
        saves: Mutex<usize>,
    }

    impl MemoryStore {
        fn new(version: u32, pods: &[&str]) -> Self {
            Self {
                version: Mutex::new(version),
                pods: Mutex::new(pods.iter().map(|s| s.to_string()).collect()),
                saves: Mutex::new(0),
            }
        }
    }

    impl PodSelectionStore for MemoryStore {
        fn config_version(&self) -> anyhow::Result<u32> {
            Ok(*self.version.lock())
        }

        fn selected_pods(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.pods.lock().clone())
        }

        fn save_selected_pods(&self, pods: &[String], version: u32) -> anyhow::Result<()> {
            *self.pods.lock() = pods.to_vec();
            *self.version.lock() = version;
            *self.saves.lock() += 1;
            Ok(())
        }
    }

    fn legacy_token(tag: char) -> String {
        std::iter::repeat(tag).take(64).collect()
    }

    fn creds() -> Credentials {
        Credentials::new("test_user", "test_pass")
    }

    #[tokio::test]
    async fn test_session_tokens_become_stable_ids() {
        let token_a = legacy_token('a');
        let token_gone = legacy_token('z');
        let portal = Arc::new(FakePortal::new(vec![
            PointOfDelivery::new("99XXX1234560000G (Home)", token_a.clone()),
            PointOfDelivery::new("24ZSS1234567890123AB (Garage)", legacy_token('b')),
        ]));
        let store = Arc::new(MemoryStore::new(1, &[&token_a, &token_gone]));
        let service = MigrationService::new(
            portal.clone(),
            store.clone(),
            DEFAULT_LEGACY_ID_MIN_LENGTH,
        );

        let outcome = service.migrate(&creds()).await.unwrap();

        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                pods: vec!["99XXX1234560000G".to_string()],
                dropped: vec![token_gone],
            }
        );
        assert_eq!(*store.pods.lock(), vec!["99XXX1234560000G".to_string()]);
        assert_eq!(*store.version.lock(), CURRENT_CONFIG_VERSION);
        assert_eq!(portal.login_calls(), 1);
    }

    #[tokio::test]
    async fn test_descriptor_texts_become_stable_ids() {
        let portal = Arc::new(FakePortal::new(vec![
            PointOfDelivery::new("99XXX1234560000G (Rodinný dom)", "v1"),
            PointOfDelivery::new("24ZSS1234567890123AB (Garage)", "v2"),
        ]));
        let store = Arc::new(MemoryStore::new(
            1,
            &["99XXX1234560000G (Rodinný dom)", "24ZSS1234567890123AB (Old label)", "Cottage"],
        ));
        let service = MigrationService::new(portal, store.clone(), DEFAULT_LEGACY_ID_MIN_LENGTH);

        let outcome = service.migrate(&creds()).await.unwrap();

        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                pods: vec!["99XXX1234560000G".to_string(), "24ZSS1234567890123AB".to_string()],
                dropped: vec!["Cottage".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_already_stable_ids_only_bump_version() {
        let portal = Arc::new(FakePortal::new(vec![]));
        let store = Arc::new(MemoryStore::new(1, &["99XXX1234560000G"]));
        let service = MigrationService::new(
            portal.clone(),
            store.clone(),
            DEFAULT_LEGACY_ID_MIN_LENGTH,
        );

        assert_eq!(service.migrate(&creds()).await.unwrap(), MigrationOutcome::VersionBumped);
        assert_eq!(*store.version.lock(), CURRENT_CONFIG_VERSION);
        assert_eq!(portal.login_calls(), 0);
    }

    #[tokio::test]
    async fn test_current_version_is_left_alone() {
        let portal = Arc::new(FakePortal::new(vec![]));
        let store = Arc::new(MemoryStore::new(CURRENT_CONFIG_VERSION, &["whatever"]));
        let service = MigrationService::new(portal, store.clone(), DEFAULT_LEGACY_ID_MIN_LENGTH);

        assert_eq!(service.migrate(&creds()).await.unwrap(), MigrationOutcome::UpToDate);
        assert_eq!(*store.saves.lock(), 0);
    }

    #[tokio::test]
    async fn test_login_failure_is_fatal() {
        let portal = Arc::new(FakePortal::new(vec![]));
        portal.reject_logins();
        let store = Arc::new(MemoryStore::new(1, &["99XXX1234560000G (Home)"]));
        let service = MigrationService::new(portal, store.clone(), DEFAULT_LEGACY_ID_MIN_LENGTH);

        let err = service.migrate(&creds()).await.unwrap_err();
        assert!(matches!(err, MigrationError::AuthFailed));
        assert_eq!(*store.saves.lock(), 0);
        assert_eq!(*store.version.lock(), 1);
    }

    #[tokio::test]
    async fn test_threshold_is_configurable() {
        let portal = Arc::new(FakePortal::new(vec![PointOfDelivery::new(
            "99XXX1234560000G (Home)",
            "short-session-value-123",
        )]));
        let store = Arc::new(MemoryStore::new(1, &["short-session-value-123"]));
        let service = MigrationService::new(portal, store.clone(), 10);

        service.migrate(&creds()).await.unwrap();
        assert_eq!(*store.pods.lock(), vec!["99XXX1234560000G".to_string()]);
    }
}
