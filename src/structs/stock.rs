use serde::{Deserialize, Serialize};

use crate::structs::{Quote, TimeSeries};

/// Response body of `GET /stock/{symbol}`.
#[derive(Deserialize, Serialize, Debug, PartialEq)]
pub struct StockSnapshot {
    symbol: String,
    #[serde(rename = "currentPrice")]
    current_price: f64,
    history: TimeSeries,
}

impl StockSnapshot {
    pub fn new(quote: Quote, history: TimeSeries) -> Self {
        Self {
            symbol: quote.symbol,
            current_price: quote.current_price,
            history,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    pub fn history(&self) -> &TimeSeries {
        &self.history
    }
}
