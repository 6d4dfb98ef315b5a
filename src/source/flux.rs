//! Flux query construction for the InfluxDB telemetry store
//!
//! Every value interpolated into a query goes through [`string_literal`], so
//! device ids and field names cannot break out of their string context.

use crate::observation::MetricSelector;
use std::time::Duration;

/// Fields the devices report for bookkeeping only
pub const EXCLUDED_FIELDS: [&str; 2] = ["Seq", "__t"];

/// Message type of commands sent *to* devices, which are not observations
pub const COMMAND_MSGTYPE: &str = "NCMD";

/// Columns the engine reads back from query results
const KEPT_COLUMNS: [&str; 6] = [
    "device",
    "component",
    "_field",
    "_value",
    "_time",
    "_measurement",
];

/// Quote and escape a Flux string literal
pub fn string_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '$' => quoted.push_str("\\$"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Render a duration as a Flux duration literal, e.g. `1h30m` or `45s`
///
/// Sub-second precision is dropped; zero renders as `0s`.
pub fn duration_literal(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let mut literal = String::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        let count = secs / size;
        if count > 0 {
            literal.push_str(&format!("{}{}", count, unit));
            secs %= size;
        }
    }
    literal
}

fn keep_clause() -> String {
    let columns: Vec<String> = KEPT_COLUMNS.iter().map(|c| string_literal(c)).collect();
    format!(" |> keep(columns: [{}])", columns.join(", "))
}

/// Latest value of every field reported by a device within `lookback`
pub fn latest_properties_query(bucket: &str, device_id: &str, lookback: Duration) -> String {
    let excluded: Vec<String> = EXCLUDED_FIELDS
        .iter()
        .map(|f| format!("r[\"_field\"] != {}", string_literal(f)))
        .collect();

    format!(
        "from(bucket: {bucket}) \
         |> range(start: -{lookback}) \
         |> filter(fn: (r) => r[\"device\"] == {device}) \
         |> filter(fn: (r) => r[\"msgtype\"] != {msgtype}) \
         |> filter(fn: (r) => {excluded}) \
         |> last(){keep}",
        bucket = string_literal(bucket),
        lookback = duration_literal(lookback),
        device = string_literal(device_id),
        msgtype = string_literal(COMMAND_MSGTYPE),
        excluded = excluded.join(" and "),
        keep = keep_clause(),
    )
}

/// Mean-aggregated buckets of one series, ending at a shared `stop` instant
///
/// All selectors of one call use the same `stop_unix_seconds`, so the bucket
/// boundaries of different series line up.
pub fn selected_metric_query(
    bucket: &str,
    device_id: &str,
    metric: &MetricSelector,
    lookback: Duration,
    bucket_width: Duration,
    stop_unix_seconds: i64,
) -> String {
    let component_filter = match &metric.component {
        Some(component) => format!(
            "filter(fn: (r) => r[\"component\"] == {})",
            string_literal(component)
        ),
        None => "filter(fn: (r) => not exists r[\"component\"])".to_string(),
    };

    format!(
        "from(bucket: {bucket}) \
         |> range(start: -{lookback}, stop: {stop}) \
         |> filter(fn: (r) => r[\"msgtype\"] != {msgtype}) \
         |> filter(fn: (r) => r[\"_measurement\"] == {model}) \
         |> filter(fn: (r) => r[\"_field\"] == {field}) \
         |> filter(fn: (r) => r[\"device\"] == {device}) \
         |> {component_filter} \
         |> aggregateWindow(every: {every}, fn: mean, createEmpty: false) \
         |> yield(name: \"mean\")",
        bucket = string_literal(bucket),
        lookback = duration_literal(lookback),
        stop = stop_unix_seconds,
        msgtype = string_literal(COMMAND_MSGTYPE),
        model = string_literal(&metric.model),
        field = string_literal(&metric.field),
        device = string_literal(device_id),
        component_filter = component_filter,
        every = duration_literal(bucket_width),
    )
}
