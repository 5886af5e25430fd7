// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use ims_poller::application::metering_portal::MeteringPortal;
use ims_poller::application::migration_service::{MigrationOutcome, MigrationService};
use ims_poller::application::poll_service::PollService;
use ims_poller::application::scheduler::{PollScheduler, SchedulerHandle};
use ims_poller::application::throttle::{RequestThrottle, SystemClock};
use ims_poller::infrastructure::config::{AppConfig, ConfigStore, DEFAULT_CONFIG_PATH};
use ims_poller::infrastructure::ims_repository::ImsRepository;
use ims_poller::infrastructure::session_client::{PortalEndpoints, SessionClient};
use ims_poller::presentation::app_state::{AppState, SensorStore};
use ims_poller::presentation::router;
use tracing_subscriber::EnvFilter;

fn config_path() -> PathBuf {
    std::env::var_os("IMS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let path = config_path();
    let mut config = AppConfig::load(&path)?;
    tracing::info!("Loaded configuration from {}", path.display());

    // Portal adapter (infrastructure layer)
    let session = SessionClient::new(
        PortalEndpoints::new(config.portal.base_url.clone()),
        config.request_timeout(),
    )?;
    let portal: Arc<dyn MeteringPortal> = Arc::new(ImsRepository::new(Arc::new(session)));

    // Rewrite stored POD ids from older configuration versions
    let migration = MigrationService::new(
        portal.clone(),
        Arc::new(ConfigStore::new(&path)),
        config.migration.legacy_id_min_length,
    );
    match migration.migrate(&config.credentials()).await? {
        MigrationOutcome::UpToDate => {}
        outcome => {
            tracing::info!("Configuration migrated: {:?}", outcome);
            config = AppConfig::load(&path)?;
        }
    }

    // Poll orchestration (application layer)
    let service = Arc::new(PollService::new(
        portal,
        config.poll_settings()?,
        config.periods(),
        RequestThrottle::tokio(config.delay_policy()),
        Arc::new(SystemClock),
    ));
    let store = Arc::new(SensorStore::new());
    let scheduler = PollScheduler::new(service, store.clone(), config.poll_interval());
    let handle = scheduler.handle();
    tokio::spawn(scheduler.run());

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(path.clone(), handle.clone()));

    // Build router (presentation layer)
    let state = Arc::new(AppState {
        store,
        scheduler: handle,
    });
    let app = router(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid server.bind address '{}'", config.server.bind))?;
    tracing::info!("Starting ims-poller on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}

/// Re-read the configuration on SIGHUP and hand the result to the scheduler.
#[cfg(unix)]
async fn reload_on_hangup(path: PathBuf, handle: SchedulerHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Configuration reload disabled: {}", e);
            return;
        }
    };

    while hangups.recv().await.is_some() {
        tracing::info!("Reloading configuration from {}", path.display());
        let reloaded = AppConfig::load(&path).and_then(|config| {
            let settings = config.poll_settings()?;
            Ok((settings, config.poll_interval()))
        });
        match reloaded {
            Ok((settings, interval)) => handle.reconfigure(settings, interval),
            Err(e) => tracing::error!("Keeping previous configuration: {:#}", e),
        }
    }
}
