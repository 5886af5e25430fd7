// Time period definitions for aggregated sensors
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone};
use chrono_tz::Tz;

pub type DateWindow = (DateTime<Tz>, DateTime<Tz>);

/// A named lookback window computed from "now".
#[derive(Debug, Clone, Copy)]
pub struct TimePeriod {
    pub key: &'static str,
    pub display_name: &'static str,
    pub range: fn(DateTime<Tz>) -> Option<DateWindow>,
}

impl TimePeriod {
    pub fn window(&self, now: DateTime<Tz>) -> Option<DateWindow> {
        (self.range)(now)
    }
}

pub const YESTERDAY: TimePeriod = TimePeriod {
    key: "yesterday",
    display_name: "Yesterday",
    range: |now| days_ending_today(now, 1),
};

pub const LAST_2_DAYS: TimePeriod = TimePeriod {
    key: "last_2_days",
    display_name: "Last 2 Days",
    range: |now| days_ending_today(now, 2),
};

pub const LAST_3_DAYS: TimePeriod = TimePeriod {
    key: "last_3_days",
    display_name: "Last 3 Days",
    range: |now| days_ending_today(now, 3),
};

pub const LAST_7_DAYS: TimePeriod = TimePeriod {
    key: "last_7_days",
    display_name: "Last 7 Days",
    range: |now| days_ending_today(now, 7),
};

pub const THIS_WEEK: TimePeriod = TimePeriod {
    key: "this_week",
    display_name: "This Week",
    range: this_week,
};

pub const THIS_MONTH: TimePeriod = TimePeriod {
    key: "this_month",
    display_name: "This Month",
    range: this_month,
};

pub const LAST_30_DAYS: TimePeriod = TimePeriod {
    key: "last_30_days",
    display_name: "Last 30 Days",
    range: |now| days_ending_today(now, 30),
};

/// Ordered set of periods polled each cycle.
#[derive(Debug, Clone)]
pub struct TimePeriods {
    periods: Vec<TimePeriod>,
}

impl TimePeriods {
    pub fn standard() -> Self {
        Self {
            periods: vec![
                YESTERDAY,
                LAST_2_DAYS,
                LAST_3_DAYS,
                LAST_7_DAYS,
                THIS_WEEK,
                THIS_MONTH,
                LAST_30_DAYS,
            ],
        }
    }

    /// Keep only the given keys, in registration order. Unknown keys are ignored.
    pub fn select(keys: &[String]) -> Self {
        let standard = Self::standard();
        if keys.is_empty() {
            return standard;
        }
        for key in keys {
            if standard.get(key).is_none() {
                tracing::warn!("Ignoring unknown time period '{}'", key);
            }
        }
        Self {
            periods: standard
                .periods
                .into_iter()
                .filter(|p| keys.iter().any(|k| k == p.key))
                .collect(),
        }
    }

    pub fn register(&mut self, period: TimePeriod) {
        self.periods.retain(|p| p.key != period.key);
        self.periods.push(period);
    }

    pub fn get(&self, key: &str) -> Option<&TimePeriod> {
        self.periods.iter().find(|p| p.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimePeriod> {
        self.periods.iter()
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

fn local_midnight(tz: &Tz, date: NaiveDate) -> Option<DateTime<Tz>> {
    let naive = date.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&naive).earliest()
}

/// `days` full days ending at today's midnight.
fn days_ending_today(now: DateTime<Tz>, days: i64) -> Option<DateWindow> {
    let tz = now.timezone();
    let today = now.date_naive();
    let end = local_midnight(&tz, today)?;
    let start = local_midnight(&tz, today - Duration::days(days))?;
    Some((start, end))
}

/// Monday midnight until midnight two days ahead.
fn this_week(now: DateTime<Tz>) -> Option<DateWindow> {
    let tz = now.timezone();
    let today = now.date_naive();
    let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let start = local_midnight(&tz, monday)?;
    let end = local_midnight(&tz, today + Duration::days(2))?;
    Some((start, end))
}

/// First of the month until midnight two days ahead.
fn this_month(now: DateTime<Tz>) -> Option<DateWindow> {
    let tz = now.timezone();
    let today = now.date_naive();
    let start = local_midnight(&tz, today.with_day(1)?)?;
    let end = local_midnight(&tz, today + Duration::days(2))?;
    Some((start, end))
}
