//! HTTP front door.
//!
//! - Transfer submission and status
//! - Settlement webhooks
//! - Health checks and Prometheus scraping

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
