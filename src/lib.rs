pub mod api;
pub mod assistant;
pub mod auth;
pub mod config;
pub mod insights;
pub mod persist;
pub mod world;
