use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Quote {
    pub symbol: String,
    #[serde(rename = "currentPrice")]
    pub current_price: f64,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, current_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            current_price,
        }
    }
}
