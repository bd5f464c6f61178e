//! HTTP API handlers for canticle-classifier

pub mod classify;
pub mod health;
pub mod info;

pub use classify::classify_routes;
pub use health::health_routes;
pub use info::info_routes;
