//! HTTP archive ingest-and-serve service for the Emporium artifact
//! repository.

pub mod catalog;
pub mod diagram;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod routes;
pub mod search;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
