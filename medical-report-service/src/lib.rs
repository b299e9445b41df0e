pub mod config;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use service::{AppState, RemoteServices, build_router, create_app, spawn_idle_sweep};
