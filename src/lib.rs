pub mod catalog;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;

// Ports consumed by the pipeline and the store adapters behind them
pub mod app;
pub mod infra;
