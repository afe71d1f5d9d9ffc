pub mod analytics;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod interfaces;
pub mod logging;
pub mod planning;
pub mod providers;
pub mod rag;
pub mod runtime_paths;
pub mod services;
pub mod users;

pub type Result<T> = std::result::Result<T, error::PlanoraError>;
