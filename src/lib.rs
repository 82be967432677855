pub mod auth;
pub mod autorespond;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod moderation;
pub mod openapi;
pub mod repo;
pub mod retry;
pub mod routes;
pub mod service;

// Re-export commonly used items for tests / external users
pub use config::AppConfig;
pub use routes::{config, AppState};
pub use service::BlogService;
