pub mod config;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use services::AppState;
