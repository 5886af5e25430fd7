// Metering data domain models
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Measurement categories reported by the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorCategory {
    ActualConsumption,
    ActualSupply,
    IdleConsumption,
    IdleSupply,
}

impl SensorCategory {
    pub fn key(&self) -> &'static str {
        match self {
            SensorCategory::ActualConsumption => "actual_consumption",
            SensorCategory::ActualSupply => "actual_supply",
            SensorCategory::IdleConsumption => "idle_consumption",
            SensorCategory::IdleSupply => "idle_supply",
        }
    }
}

impl fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Which categories a poll cycle publishes. Active consumption is always on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledCategories {
    pub supply: bool,
    pub idle: bool,
}

impl EnabledCategories {
    pub fn new(supply: bool, idle: bool) -> Self {
        Self { supply, idle }
    }

    pub fn categories(&self) -> Vec<SensorCategory> {
        let mut enabled = vec![SensorCategory::ActualConsumption];
        if self.supply {
            enabled.push(SensorCategory::ActualSupply);
        }
        if self.idle {
            enabled.push(SensorCategory::IdleConsumption);
            enabled.push(SensorCategory::IdleSupply);
        }
        enabled
    }
}

/// Summary time series for one POD over one date window.
///
/// Every non-empty series has one entry per timestamp; `None` marks a slot
/// the portal reported as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartData {
    pub metering_datetime: Vec<String>,
    pub actual_consumption: Vec<Option<f64>>,
    pub actual_supply: Vec<Option<f64>>,
    pub idle_consumption: Vec<Option<f64>>,
    pub idle_supply: Vec<Option<f64>>,
    pub sum_actual_consumption: f64,
    pub sum_actual_supply: f64,
    pub sum_idle_consumption: f64,
    pub sum_idle_supply: f64,
}

impl ChartData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.metering_datetime.is_empty()
    }

    pub fn sum(&self, category: SensorCategory) -> f64 {
        match category {
            SensorCategory::ActualConsumption => self.sum_actual_consumption,
            SensorCategory::ActualSupply => self.sum_actual_supply,
            SensorCategory::IdleConsumption => self.sum_idle_consumption,
            SensorCategory::IdleSupply => self.sum_idle_supply,
        }
    }
}

/// One quarter-hour row from the detail query. Absent measurements stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeteringRow {
    pub metering_datetime: DateTime<FixedOffset>,
    pub period: i64,
    pub actual_consumption: Option<f64>,
    pub actual_supply: Option<f64>,
    pub idle_consumption: Option<f64>,
    pub idle_supply: Option<f64>,
}

pub type PeriodValues = BTreeMap<SensorCategory, f64>;

/// period key -> category -> value
pub type AggregatedData = BTreeMap<String, PeriodValues>;

/// Reduce one period's chart data to the enabled category sums.
///
/// Missing chart data yields an explicit zero for every enabled category.
pub fn aggregate_period(chart: Option<&ChartData>, enabled: EnabledCategories) -> PeriodValues {
    enabled
        .categories()
        .into_iter()
        .map(|category| (category, chart.map(|c| c.sum(category)).unwrap_or(0.0)))
        .collect()
}
