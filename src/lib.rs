pub mod config;
pub mod cron;
pub mod karma;
pub mod store;
pub mod telemetry;
pub mod titles;
