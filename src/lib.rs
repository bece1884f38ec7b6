pub mod config;
pub mod dashboard;
pub mod error;
pub mod external;
pub mod metrics;
pub mod routes;
pub mod structs;

pub use routes::{router, AppState};
