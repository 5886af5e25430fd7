// In-memory portal used by application tests
use crate::application::metering_portal::{MeteringPortal, PageRequest, PodQuery};
use crate::domain::error::{PortalError, PortalResult};
use crate::domain::metering::{ChartData, MeteringRow};
use crate::domain::pod::PointOfDelivery;
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub enum ChartOutcome {
    Data(ChartData),
    Fail(fn() -> PortalError),
}

#[derive(Debug, Clone)]
pub struct ChartCall {
    pub stable_id: String,
    pub session_value: String,
    pub from: DateTime<Tz>,
    pub to: DateTime<Tz>,
}

pub struct FakePortal {
    authenticated: AtomicBool,
    accept_login: AtomicBool,
    generation: AtomicU64,
    login_calls: AtomicUsize,
    pod_list_calls: AtomicUsize,
    pods: Mutex<Vec<PointOfDelivery>>,
    pod_list_error: Mutex<Option<fn() -> PortalError>>,
    chart_scripts: Mutex<HashMap<String, VecDeque<ChartOutcome>>>,
    chart_calls: Mutex<Vec<ChartCall>>,
    rows: Mutex<Vec<MeteringRow>>,
    row_queries: Mutex<Vec<(PodQuery, PageRequest)>>,
}

impl FakePortal {
    pub fn new(pods: Vec<PointOfDelivery>) -> Self {
        Self {
            authenticated: AtomicBool::new(false),
            accept_login: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            login_calls: AtomicUsize::new(0),
            pod_list_calls: AtomicUsize::new(0),
            pods: Mutex::new(pods),
            pod_list_error: Mutex::new(None),
            chart_scripts: Mutex::new(HashMap::new()),
            chart_calls: Mutex::new(Vec::new()),
            rows: Mutex::new(Vec::new()),
            row_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn logged_in(pods: Vec<PointOfDelivery>) -> Self {
        let portal = Self::new(pods);
        portal.authenticated.store(true, Ordering::SeqCst);
        portal.generation.store(1, Ordering::SeqCst);
        portal
    }

    pub fn reject_logins(&self) {
        self.accept_login.store(false, Ordering::SeqCst);
    }

    pub fn set_pods(&self, pods: Vec<PointOfDelivery>) {
        *self.pods.lock() = pods;
    }

    pub fn fail_pod_list(&self, error: fn() -> PortalError) {
        *self.pod_list_error.lock() = Some(error);
    }

    pub fn script_chart(&self, stable_id: &str, outcomes: Vec<ChartOutcome>) {
        self.chart_scripts
            .lock()
            .insert(stable_id.to_string(), outcomes.into());
    }

    pub fn set_rows(&self, rows: Vec<MeteringRow>) {
        *self.rows.lock() = rows;
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn pod_list_calls(&self) -> usize {
        self.pod_list_calls.load(Ordering::SeqCst)
    }

    pub fn chart_calls(&self) -> Vec<ChartCall> {
        self.chart_calls.lock().clone()
    }

    pub fn row_queries(&self) -> Vec<(PodQuery, PageRequest)> {
        self.row_queries.lock().clone()
    }

    /// Simulate the portal rotating the session behind our back.
    pub fn rotate_session(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MeteringPortal for FakePortal {
    async fn authenticate(&self, _username: &str, _password: &str) -> bool {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let accepted = self.accept_login.load(Ordering::SeqCst);
        self.authenticated.store(accepted, Ordering::SeqCst);
        if accepted {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        accepted
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn session_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn logout(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
    }

    async fn points_of_delivery(&self) -> PortalResult<Vec<PointOfDelivery>> {
        self.pod_list_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_authenticated() {
            return Err(PortalError::NotAuthenticated);
        }
        if let Some(error) = *self.pod_list_error.lock() {
            return Err(error());
        }
        Ok(self.pods.lock().clone())
    }

    async fn chart_data(
        &self,
        pod: &PodQuery,
        from: DateTime<Tz>,
        to: DateTime<Tz>,
    ) -> PortalResult<ChartData> {
        self.chart_calls.lock().push(ChartCall {
            stable_id: pod.stable_id.clone(),
            session_value: pod.session_value.clone(),
            from,
            to,
        });
        if !self.is_authenticated() {
            return Err(PortalError::NotAuthenticated);
        }
        let next = self
            .chart_scripts
            .lock()
            .get_mut(&pod.stable_id)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(ChartOutcome::Data(chart)) => Ok(chart),
            Some(ChartOutcome::Fail(error)) => Err(error()),
            None => Ok(ChartData::empty()),
        }
    }

    async fn metering_rows(
        &self,
        pod: &PodQuery,
        _from: DateTime<Tz>,
        _to: DateTime<Tz>,
        page: PageRequest,
    ) -> PortalResult<Vec<MeteringRow>> {
        self.row_queries.lock().push((pod.clone(), page));
        if !self.is_authenticated() {
            return Err(PortalError::NotAuthenticated);
        }
        Ok(self.rows.lock().clone())
    }
}
