use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::structs::HistoryPoint;

/// Timestamp layout used by the provider for intraday keys.
pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Intraday history, always ordered oldest first.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct TimeSeries {
    data: Vec<HistoryPoint>,
}

impl TimeSeries {
    pub fn new(mut data: Vec<HistoryPoint>) -> Self {
        data.sort_by(chronological);
        Self { data }
    }

    pub fn data(&self) -> &[HistoryPoint] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl FromIterator<HistoryPoint> for TimeSeries {
    fn from_iter<I: IntoIterator<Item = HistoryPoint>>(iter: I) -> Self {
        TimeSeries::new(iter.into_iter().collect())
    }
}

// Unparseable keys go last, ordered by their raw text.
fn chronological(a: &HistoryPoint, b: &HistoryPoint) -> Ordering {
    let parsed_a = NaiveDateTime::parse_from_str(&a.time, FORMAT).ok();
    let parsed_b = NaiveDateTime::parse_from_str(&b.time, FORMAT).ok();
    match (parsed_a, parsed_b) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.time.cmp(&b.time)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.time.cmp(&b.time),
    }
}

#[test]
pub fn test_series_is_sorted_oldest_first() {
    let series = TimeSeries::new(vec![
        HistoryPoint::new("2024-01-01 09:15:00", 3498.0),
        HistoryPoint::new("2024-01-01 09:05:00", 3496.0),
        HistoryPoint::new("2024-01-01 09:10:00", 3497.5),
    ]);
    let times: Vec<&str> = series.data().iter().map(|p| p.time.as_str()).collect();
    assert_eq!(
        times,
        vec!["2024-01-01 09:05:00", "2024-01-01 09:10:00", "2024-01-01 09:15:00"]
    );
}

#[test]
pub fn test_unparseable_keys_sort_last() {
    let series: TimeSeries = vec![
        HistoryPoint::new("not a time", 9.0),
        HistoryPoint::new("2024-01-01 09:10:00", 1.0),
    ]
    .into_iter()
    .collect();
    assert_eq!(series.data()[0].time, "2024-01-01 09:10:00");
    assert_eq!(series.data()[1].time, "not a time");
    assert_eq!(series.len(), 2);
}

#[test]
pub fn test_serializes_as_plain_array() {
    let series = TimeSeries::new(vec![HistoryPoint::new("2024-01-01 09:10:00", 3497.5)]);
    let json = serde_json::to_value(&series).unwrap();
    assert_eq!(
        json,
        serde_json::json!([{ "time": "2024-01-01 09:10:00", "price": 3497.5 }])
    );
}
