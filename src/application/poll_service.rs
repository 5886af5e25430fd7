// Poll orchestrator - One full pass over configured PODs and periods
use crate::application::metering_portal::MeteringPortal;
use crate::application::metering_service::MeteringService;
use crate::application::pod_resolver::PodResolver;
use crate::application::throttle::{Clock, RequestThrottle};
use crate::domain::account::Credentials;
use crate::domain::error::{PortalError, PortalResult};
use crate::domain::metering::{aggregate_period, AggregatedData, ChartData, EnabledCategories};
use crate::domain::period::TimePeriods;
use crate::domain::pod::sanitize_friendly_name;
use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub credentials: Credentials,
    /// Stable ids to poll; empty means every discovered POD.
    pub selected_pods: Vec<String>,
    pub friendly_names: HashMap<String, String>,
    pub enabled: EnabledCategories,
    pub timezone: Tz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Discovering,
    Fetching { pod: String, period: &'static str },
    Aggregating,
    Done,
    AuthFailed,
}

#[derive(Debug, Error)]
pub enum PollError {
    /// The account needs re-authorization; retrying will not help.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Error updating data: {0}")]
    UpdateFailed(String),
}

impl PollError {
    fn from_portal(error: PortalError) -> Self {
        if error.is_auth_failure() {
            PollError::AuthFailed(error.to_string())
        } else {
            PollError::UpdateFailed(error.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodSnapshot {
    pub session_pod_id: String,
    pub pod_text: String,
    pub friendly_name: String,
    pub aggregated_data: AggregatedData,
    pub last_update: DateTime<FixedOffset>,
}

/// A POD or POD/period pair that was left out of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    pub pod_id: String,
    pub period: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle_timestamp: DateTime<FixedOffset>,
    pub pods: BTreeMap<String, PodSnapshot>,
    pub skipped: Vec<SkippedItem>,
}

pub struct PollService {
    portal: Arc<dyn MeteringPortal>,
    metering: MeteringService,
    throttle: RequestThrottle,
    clock: Arc<dyn Clock>,
    periods: TimePeriods,
    settings: RwLock<PollSettings>,
    state: Mutex<CycleState>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl PollService {
    pub fn new(
        portal: Arc<dyn MeteringPortal>,
        settings: PollSettings,
        periods: TimePeriods,
        throttle: RequestThrottle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = Arc::new(PodResolver::new(portal.clone()));
        Self {
            metering: MeteringService::new(portal.clone(), resolver),
            portal,
            throttle,
            clock,
            periods,
            settings: RwLock::new(settings),
            state: Mutex::new(CycleState::Idle),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state.lock().clone()
    }

    pub fn settings(&self) -> PollSettings {
        self.settings.read().clone()
    }

    /// Swap in new settings. Returns true when the published values change
    /// shape and a refresh should run right away.
    pub fn update_settings(&self, new_settings: PollSettings) -> bool {
        let mut settings = self.settings.write();
        let refresh_needed = settings.enabled != new_settings.enabled
            || settings.selected_pods != new_settings.selected_pods
            || settings.friendly_names != new_settings.friendly_names;
        if settings.credentials != new_settings.credentials {
            tracing::info!("Credentials changed, dropping current session");
            self.portal.logout();
        }
        *settings = new_settings;
        refresh_needed
    }

    fn transition(&self, next: CycleState) {
        tracing::trace!("Cycle state -> {:?}", next);
        *self.state.lock() = next;
    }

    /// Run one poll cycle. Cycles never overlap; a second caller waits.
    pub async fn run_cycle(&self) -> Result<CycleReport, PollError> {
        let _cycle = self.cycle_lock.lock().await;
        let result = self.poll().await;
        match &result {
            Ok(report) => {
                self.transition(CycleState::Done);
                tracing::info!(
                    "Data update completed successfully for {} PODs",
                    report.pods.len()
                );
            }
            Err(PollError::AuthFailed(reason)) => {
                self.transition(CycleState::AuthFailed);
                tracing::error!("Authentication error detected, stopping data update: {}", reason);
            }
            Err(PollError::UpdateFailed(reason)) => {
                self.transition(CycleState::Idle);
                tracing::error!("Error updating data: {}", reason);
            }
        }
        result
    }

    async fn poll(&self) -> Result<CycleReport, PollError> {
        let settings = self.settings();
        tracing::info!("Starting data update");

        self.ensure_session(&settings.credentials).await?;

        self.transition(CycleState::Discovering);
        let pod_ids = self
            .active_pod_ids(&settings)
            .await
            .map_err(PollError::from_portal)?;

        let now = self.clock.now().with_timezone(&settings.timezone);
        let mut report = CycleReport {
            cycle_timestamp: now.fixed_offset(),
            pods: BTreeMap::new(),
            skipped: Vec::new(),
        };

        for (pod_index, pod_id) in pod_ids.iter().enumerate() {
            tracing::debug!("Processing POD: {}", pod_id);
            match self.poll_pod(pod_id, now, &settings, &mut report.skipped).await {
                Ok(snapshot) => {
                    report.pods.insert(pod_id.clone(), snapshot);
                }
                Err(e) if e.is_auth_failure() => {
                    tracing::error!("Error fetching data for POD {}: {}", pod_id, e);
                    return Err(PollError::AuthFailed(e.to_string()));
                }
                Err(e) => {
                    tracing::error!("Error fetching data for POD {}: {}", pod_id, e);
                    report.skipped.push(SkippedItem {
                        pod_id: pod_id.clone(),
                        period: None,
                        reason: e.to_string(),
                    });
                }
            }

            if pod_index + 1 < pod_ids.len() {
                self.throttle.pause("processing next POD").await;
            }
        }

        Ok(report)
    }

    async fn ensure_session(&self, credentials: &Credentials) -> Result<(), PollError> {
        if self.portal.is_authenticated() {
            return Ok(());
        }
        tracing::info!("No active session, logging in as {}", credentials.username);
        if self
            .portal
            .authenticate(&credentials.username, &credentials.password)
            .await
        {
            Ok(())
        } else {
            Err(PollError::AuthFailed(format!(
                "authentication failed for user {}",
                credentials.username
            )))
        }
    }

    async fn active_pod_ids(&self, settings: &PollSettings) -> PortalResult<Vec<String>> {
        // Session values can rotate without a new login, so every cycle
        // starts from a fresh POD list.
        let registry = self.metering.resolver().discover_pods().await?;

        if settings.selected_pods.is_empty() {
            let ids = registry.stable_ids();
            tracing::info!("No PODs configured, using discovered PODs: {:?}", ids);
            return Ok(ids);
        }

        tracing::info!("Using configured PODs: {:?}", settings.selected_pods);
        let (available, missing): (Vec<String>, Vec<String>) = settings
            .selected_pods
            .iter()
            .cloned()
            .partition(|id| registry.contains(id));

        if !missing.is_empty() {
            tracing::warn!("Some configured PODs not found: {:?}", missing);
            tracing::debug!("Available PODs: {:?}", registry.stable_ids());
        }
        Ok(available)
    }

    async fn poll_pod(
        &self,
        pod_id: &str,
        now: DateTime<Tz>,
        settings: &PollSettings,
        skipped: &mut Vec<SkippedItem>,
    ) -> PortalResult<PodSnapshot> {
        let pod = self.metering.resolver().resolve(pod_id).await?;
        let mut charts: HashMap<&'static str, ChartData> = HashMap::new();

        for (period_index, period) in self.periods.iter().enumerate() {
            if period_index > 0 {
                self.throttle
                    .pause(&format!("fetching {} data for POD {}", period.key, pod_id))
                    .await;
            }
            self.transition(CycleState::Fetching {
                pod: pod_id.to_string(),
                period: period.key,
            });

            let Some((start, end)) = period.window(now) else {
                tracing::error!("Error calculating date range for period {}", period.key);
                skipped.push(SkippedItem {
                    pod_id: pod_id.to_string(),
                    period: Some(period.key.to_string()),
                    reason: "date range could not be computed".to_string(),
                });
                continue;
            };

            tracing::debug!(
                "Fetching {} data for POD {} ({} to {})",
                period.key,
                pod_id,
                start,
                end
            );
            match self.metering.get_chart_data(pod_id, start, end).await {
                Ok(chart) => {
                    tracing::debug!(
                        "{} data for POD {}: metering_datetime count={}, sum_actual_consumption={}",
                        period.display_name,
                        pod_id,
                        chart.metering_datetime.len(),
                        chart.sum_actual_consumption
                    );
                    charts.insert(period.key, chart);
                }
                Err(e) if e.is_auth_failure() => return Err(e),
                Err(e) => {
                    tracing::error!("Error fetching {} data for POD {}: {}", period.key, pod_id, e);
                    skipped.push(SkippedItem {
                        pod_id: pod_id.to_string(),
                        period: Some(period.key.to_string()),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.transition(CycleState::Aggregating);
        let aggregated_data: AggregatedData = self
            .periods
            .iter()
            .map(|period| {
                let chart = charts.get(period.key);
                if chart.is_none() {
                    tracing::warn!(
                        "No {} chart data available, setting {} values to 0",
                        period.display_name,
                        period.key
                    );
                }
                (period.key.to_string(), aggregate_period(chart, settings.enabled))
            })
            .collect();
        tracing::debug!("Aggregated data for POD {}: {:?}", pod_id, aggregated_data);

        let friendly_name = settings
            .friendly_names
            .get(pod_id)
            .map(|name| sanitize_friendly_name(name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| pod_id.to_string());

        Ok(PodSnapshot {
            session_pod_id: pod.session_value,
            pod_text: pod.descriptor_text,
            friendly_name,
            aggregated_data,
            last_update: now.fixed_offset(),
        })
    }
}
