// Metering service - Chart and detail data by stable POD id
use crate::application::metering_portal::{MeteringPortal, PageRequest};
use crate::application::pod_resolver::PodResolver;
use crate::domain::error::PortalResult;
use crate::domain::metering::{ChartData, MeteringRow};
use chrono::DateTime;
use chrono_tz::Tz;
use std::sync::Arc;

#[derive(Clone)]
pub struct MeteringService {
    portal: Arc<dyn MeteringPortal>,
    resolver: Arc<PodResolver>,
}

impl MeteringService {
    pub fn new(portal: Arc<dyn MeteringPortal>, resolver: Arc<PodResolver>) -> Self {
        Self { portal, resolver }
    }

    pub fn resolver(&self) -> &Arc<PodResolver> {
        &self.resolver
    }

    pub async fn get_chart_data(
        &self,
        stable_id: &str,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> PortalResult<ChartData> {
        let pod = self.resolver.resolve(stable_id).await?;
        let chart = self.portal.chart_data(&pod, from, to).await?;

        if chart.is_empty() {
            tracing::warn!(
                "No metering data found for POD {} in period {} to {}",
                stable_id,
                from,
                to
            );
        } else {
            tracing::debug!(
                "Retrieved chart data for POD {}, period {} to {} ({} points)",
                stable_id,
                from,
                to,
                chart.metering_datetime.len()
            );
        }
        Ok(chart)
    }

    pub async fn get_metering_data(
        &self,
        stable_id: &str,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
        page: PageRequest,
    ) -> PortalResult<Vec<MeteringRow>> {
        let pod = self.resolver.resolve(stable_id).await?;
        let rows = self.portal.metering_rows(&pod, from, to, page).await?;
        tracing::debug!(
            "Retrieved {} metering data points for POD {}",
            rows.len(),
            stable_id
        );
        Ok(rows)
    }
}
