pub mod auth;
pub mod config;
pub mod error;
pub mod feed;
pub mod geo;
pub mod models;
pub mod openapi;
pub mod rate_limit; // per-user sliding windows
pub mod repo;
pub mod routes;
pub mod service;

// Re-export commonly used items for tests / external users
pub use config::AppConfig;
pub use routes::{config, AppState};
