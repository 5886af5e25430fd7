// Wire models and response mapping for the IMS portal
use crate::application::metering_portal::{PageRequest, PodQuery};
use crate::domain::error::{PortalError, PortalResult};
use crate::domain::metering::{ChartData, MeteringRow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Map, Value};

const SERIES_FIELDS: [&str; 4] = [
    "actualConsumption",
    "actualSupply",
    "idleConsumption",
    "idleSupply",
];

const SUM_FIELDS: [&str; 4] = [
    "sumActualConsumption",
    "sumActualSupply",
    "sumIdleConsumption",
    "sumIdleSupply",
];

const TIMESTAMP_FIELD: &str = "meteringDatetime";

/// Detail rows shorter than this are ignored.
pub const MIN_ROW_VALUES: usize = 10;

const MAX_SAMPLE_SIZE: usize = 20;
const MAX_LISTED_PROBLEMS: usize = 10;
const MAX_PROBLEM_WINDOWS: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: i64,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub created_on: DateTime<Utc>,
    pub changed_on: DateTime<Utc>,
}

/// Login response body; only its shape is checked.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user_profile: UserProfile,
    pub user_actions: Vec<i64>,
    pub password_expiration_date: DateTime<Utc>,
    pub show_password_change_warning: bool,
}

#[derive(Debug, Deserialize)]
pub struct MeteringDataRow {
    pub values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct MeteringDataResponse {
    pub columns: Vec<Map<String, Value>>,
    pub rows: Vec<MeteringDataRow>,
    #[serde(default)]
    pub page: Option<Map<String, Value>>,
}

pub fn chart_query(pod: &PodQuery, from: DateTime<Tz>, to: DateTime<Tz>) -> Value {
    json!({
        "pointOfDeliveryId": pod.session_value,
        "validFromDate": from.to_rfc3339(),
        "validToDate": to.to_rfc3339(),
        "pointOfDeliveryText": pod.descriptor_text,
    })
}

pub fn metering_query(
    pod: &PodQuery,
    from: DateTime<Tz>,
    to: DateTime<Tz>,
    page: PageRequest,
) -> Value {
    json!({
        "page": {
            "totalRows": 96,
            "currentPage": page.page,
            "pageSize": page.page_size,
        },
        "filters": [
            {
                "member": "pointOfDeliveryId",
                "operator": "Equals",
                "type": "Int",
                "value": pod.session_value,
            },
            {
                "member": TIMESTAMP_FIELD,
                "operator": "Greater",
                "type": "DateTimeMilliseconds",
                "value": from.to_rfc3339(),
                "rangeOperator": "LowerOrEquals",
                "rangeValue": to.to_rfc3339(),
            },
        ],
        "sort": [{ "member": TIMESTAMP_FIELD, "sortOrder": "asc" }],
        "isExport": false,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Numbers and numeric strings convert; anything else does not.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn render(values: &[Value]) -> String {
    let items: Vec<String> = values.iter().map(Value::to_string).collect();
    format!("[{}]", items.join(", "))
}

/// Bounded description of a raw field for diagnostics.
pub fn describe_field(data: &Map<String, Value>, field: &str) -> String {
    let items = match data.get(field) {
        None => return format!("Field '{}' not found in data", field),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return format!(
                "Field '{}' is not a list: {} = {}",
                field,
                type_name(other),
                other
            )
        }
    };
    if items.is_empty() {
        return format!("Field '{}' is empty list", field);
    }

    let problems: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, v)| match v {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Number(_) => false,
            _ => true,
        })
        .map(|(i, _)| i)
        .collect();

    let total = items.len();
    let mut info = format!("length={}", total);
    if problems.is_empty() {
        let size = total.min(MAX_SAMPLE_SIZE);
        info.push_str(&format!(", sample={}", render(&items[..size])));
        if total > size {
            info.push_str("...");
        }
        return info;
    }

    let listed: Vec<String> = problems
        .iter()
        .take(MAX_LISTED_PROBLEMS)
        .map(usize::to_string)
        .collect();
    info.push_str(&format!(", problems_at=[{}]", listed.join(", ")));
    if problems.len() > MAX_LISTED_PROBLEMS {
        info.push_str(&format!("+{}more", problems.len() - MAX_LISTED_PROBLEMS));
    }
    let windows: Vec<String> = problems
        .iter()
        .take(MAX_PROBLEM_WINDOWS)
        .map(|&idx| {
            let start = idx.saturating_sub(2);
            let end = (idx + 3).min(total);
            format!("[{}:{}]={}", start, end, render(&items[start..end]))
        })
        .collect();
    info.push_str(&format!(", samples={}", windows.join("; ")));
    info
}

fn parse_series(data: &Map<String, Value>, field: &str) -> Result<Vec<Option<f64>>, String> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Null => Ok(None),
                other => as_number(other).map(Some).ok_or_else(|| {
                    format!(
                        "at index {}: cannot convert {} ({}) to a number",
                        i,
                        other,
                        type_name(other)
                    )
                }),
            })
            .collect(),
        // A scalar stands in for a one element series
        Some(single) => as_number(single).map(|v| vec![Some(v)]).ok_or_else(|| {
            format!(
                "expected list or numeric value, got {}: {}",
                type_name(single),
                single
            )
        }),
    }
}

fn parse_sum(data: &Map<String, Value>, field: &str) -> Result<f64, String> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(0.0),
        Some(value) => as_number(value).ok_or_else(|| {
            format!(
                "cannot convert {} ({}) to a number",
                value,
                type_name(value)
            )
        }),
    }
}

fn parse_timestamps(data: &Map<String, Value>) -> Result<Vec<String>, String> {
    match data.get(TIMESTAMP_FIELD) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        format!("at index {}: expected string, got {}", i, type_name(item))
                    })
            })
            .collect(),
        Some(other) => Err(format!("expected list, got {}", type_name(other))),
    }
}

struct FieldProblems<'a> {
    data: &'a Map<String, Value>,
    fields: Vec<String>,
    details: Vec<String>,
}

impl<'a> FieldProblems<'a> {
    fn new(data: &'a Map<String, Value>) -> Self {
        Self {
            data,
            fields: Vec::new(),
            details: Vec::new(),
        }
    }

    fn add(&mut self, field: &str, message: String, with_sample: bool) {
        let detail = if with_sample {
            format!("{}: {} ({})", field, message, describe_field(self.data, field))
        } else {
            format!("{}: {}", field, message)
        };
        self.fields.push(field.to_string());
        self.details.push(detail);
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn into_error(self) -> PortalError {
        PortalError::ChartDataInvalid {
            fields: self.fields,
            detail: self.details.join("; "),
        }
    }
}

/// Validate and convert a chart-data response body.
///
/// A body without timestamps is a valid empty result. Every problem found is
/// reported together, each with a bounded sample of the offending field.
pub fn parse_chart_data(body: &Value) -> PortalResult<ChartData> {
    let data = body.as_object().ok_or_else(|| PortalError::ChartDataInvalid {
        fields: vec!["<body>".to_string()],
        detail: format!("expected object, got {}", type_name(body)),
    })?;

    let mut problems = FieldProblems::new(data);

    let timestamps = match parse_timestamps(data) {
        Ok(timestamps) => timestamps,
        Err(message) => {
            problems.add(TIMESTAMP_FIELD, message, true);
            Vec::new()
        }
    };

    if problems.is_empty() && timestamps.is_empty() {
        return Ok(ChartData::empty());
    }

    let mut series: [Vec<Option<f64>>; 4] = Default::default();
    for (slot, field) in series.iter_mut().zip(SERIES_FIELDS) {
        match parse_series(data, field) {
            Ok(values)
                if !values.is_empty()
                    && !timestamps.is_empty()
                    && values.len() != timestamps.len() =>
            {
                problems.add(
                    field,
                    format!(
                        "length {} does not match {} timestamps",
                        values.len(),
                        timestamps.len()
                    ),
                    true,
                );
            }
            Ok(values) => *slot = values,
            Err(message) => problems.add(field, message, true),
        }
    }

    let mut sums = [0.0; 4];
    for (slot, field) in sums.iter_mut().zip(SUM_FIELDS) {
        match parse_sum(data, field) {
            Ok(value) => *slot = value,
            Err(message) => problems.add(field, message, false),
        }
    }

    if !problems.is_empty() {
        return Err(problems.into_error());
    }

    let [actual_consumption, actual_supply, idle_consumption, idle_supply] = series;
    let [sum_actual_consumption, sum_actual_supply, sum_idle_consumption, sum_idle_supply] = sums;
    Ok(ChartData {
        metering_datetime: timestamps,
        actual_consumption,
        actual_supply,
        idle_consumption,
        idle_supply,
        sum_actual_consumption,
        sum_actual_supply,
        sum_idle_consumption,
        sum_idle_supply,
    })
}

fn optional_measurement(value: &Value) -> Option<f64> {
    match value {
        Value::Null => None,
        other => {
            let parsed = as_number(other);
            if parsed.is_none() {
                tracing::debug!("Ignoring non-numeric measurement {}", other);
            }
            parsed
        }
    }
}

/// Map one positional detail row. Rows that are too short or carry no
/// parseable timestamp are dropped.
pub fn map_metering_row(values: &[Value]) -> Option<MeteringRow> {
    if values.len() < MIN_ROW_VALUES {
        return None;
    }
    let timestamp = values[0].as_str()?;
    let metering_datetime = match DateTime::parse_from_rfc3339(timestamp) {
        Ok(dt) => dt,
        Err(e) => {
            tracing::warn!("Skipping metering row with bad timestamp {}: {}", timestamp, e);
            return None;
        }
    };
    let period = values[1].as_i64().or_else(|| as_number(&values[1]).map(|v| v as i64))?;

    Some(MeteringRow {
        metering_datetime,
        period,
        actual_consumption: optional_measurement(&values[2]),
        actual_supply: optional_measurement(&values[4]),
        idle_consumption: optional_measurement(&values[6]),
        idle_supply: optional_measurement(&values[8]),
    })
}

pub fn parse_metering_rows(body: Value) -> PortalResult<Vec<MeteringRow>> {
    let response: MeteringDataResponse = serde_json::from_value(body)
        .map_err(|e| PortalError::Decode(format!("metering data response: {}", e)))?;
    Ok(response
        .rows
        .iter()
        .filter_map(|row| map_metering_row(&row.values))
        .collect())
}
