//! Vigil daemon library - the alert lifecycle engine and its HTTP surface.

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod dispatcher;
pub mod engine;
pub mod registry;
pub mod routes;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod store;

pub use config::Config;
pub use engine::Engine;
