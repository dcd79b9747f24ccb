pub mod config;
pub mod error;
pub mod event;
pub mod loader;
pub mod logging;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{build_router, serve};
pub use state::{AppState, ModelSlot};
