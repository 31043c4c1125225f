pub mod app;
pub mod capability;
pub mod config;
pub mod middleware;
pub mod sampling;
pub mod service;
pub mod streaming;
pub mod telemetry;
pub mod tls;
