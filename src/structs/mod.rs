mod point;
mod quote;
mod stock;
mod time_series;

pub use point::HistoryPoint;
pub use quote::Quote;
pub use stock::StockSnapshot;
pub use time_series::{TimeSeries, FORMAT};
