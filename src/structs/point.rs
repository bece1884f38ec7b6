use serde::{Deserialize, Serialize};

/// One intraday sample: the provider's timestamp key and the close price at it.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct HistoryPoint {
    pub time: String,
    pub price: f64,
}

impl HistoryPoint {
    pub fn new(time: impl Into<String>, price: f64) -> Self {
        Self {
            time: time.into(),
            price,
        }
    }
}
