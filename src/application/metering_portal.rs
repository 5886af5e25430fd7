// Port for the metering portal backend
use crate::domain::error::PortalResult;
use crate::domain::metering::{ChartData, MeteringRow};
use crate::domain::pod::PointOfDelivery;
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;

/// Session scoped coordinates of a POD, as the portal expects them in queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodQuery {
    pub stable_id: String,
    pub session_value: String,
    pub descriptor_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 100,
        }
    }
}

#[async_trait]
pub trait MeteringPortal: Send + Sync {
    /// Log in; failures of any kind collapse to `false`.
    async fn authenticate(&self, username: &str, password: &str) -> bool;

    fn is_authenticated(&self) -> bool;

    /// Incremented on every successful login. Session scoped POD values
    /// obtained under an older generation must not be reused.
    fn session_generation(&self) -> u64;

    fn logout(&self);

    /// Raw POD list as returned by the portal
    async fn points_of_delivery(&self) -> PortalResult<Vec<PointOfDelivery>>;

    /// Summary series and running sums for a date window
    async fn chart_data(
        &self,
        pod: &PodQuery,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> PortalResult<ChartData>;

    /// Paginated detail rows for a date window
    async fn metering_rows(
        &self,
        pod: &PodQuery,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
        page: PageRequest,
    ) -> PortalResult<Vec<MeteringRow>>;
}
