// IMS portal adapter implementing the metering portal port
use crate::application::metering_portal::{MeteringPortal, PageRequest, PodQuery};
use crate::domain::error::{PortalError, PortalResult};
use crate::domain::metering::{ChartData, MeteringRow};
use crate::domain::pod::PointOfDelivery;
use crate::infrastructure::portal_models::{
    chart_query, metering_query, parse_chart_data, parse_metering_rows,
};
use crate::infrastructure::session_client::SessionClient;
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use reqwest::Method;
use std::sync::Arc;

pub struct ImsRepository {
    session: Arc<SessionClient>,
}

impl ImsRepository {
    pub fn new(session: Arc<SessionClient>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl MeteringPortal for ImsRepository {
    async fn authenticate(&self, username: &str, password: &str) -> bool {
        self.session.authenticate(username, password).await
    }

    fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    fn session_generation(&self) -> u64 {
        self.session.generation()
    }

    fn logout(&self) {
        self.session.logout();
    }

    async fn points_of_delivery(&self) -> PortalResult<Vec<PointOfDelivery>> {
        let url = self.session.endpoints().points_of_delivery();
        let body = self.session.request_json(Method::GET, &url, None).await?;
        let pods: Vec<PointOfDelivery> = serde_json::from_value(body)
            .map_err(|e| PortalError::Decode(format!("points of delivery: {}", e)))?;
        tracing::debug!("Retrieved {} points of delivery", pods.len());
        Ok(pods)
    }

    async fn chart_data(
        &self,
        pod: &PodQuery,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> PortalResult<ChartData> {
        let url = self.session.endpoints().chart_data();
        let payload = chart_query(pod, from, to);
        let body = self
            .session
            .request_json(Method::POST, &url, Some(&payload))
            .await?;

        tracing::debug!(
            "Chart data response keys: {:?}",
            body.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>())
        );

        parse_chart_data(&body).map_err(|e| {
            tracing::error!(
                "Chart data validation failed for POD {} ({} to {}): {}",
                pod.stable_id,
                from,
                to,
                e
            );
            e
        })
    }

    async fn metering_rows(
        &self,
        pod: &PodQuery,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
        page: PageRequest,
    ) -> PortalResult<Vec<MeteringRow>> {
        let url = self.session.endpoints().profile_data();
        let payload = metering_query(pod, from, to, page);
        let body = self
            .session
            .request_json(Method::POST, &url, Some(&payload))
            .await?;
        let rows = parse_metering_rows(body)?;
        tracing::debug!(
            "Retrieved {} metering data points for POD {}",
            rows.len(),
            pod.stable_id
        );
        Ok(rows)
    }
}
