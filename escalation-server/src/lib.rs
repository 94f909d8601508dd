pub mod error;
pub mod routes;
pub mod webhook;

pub use error::ApiError;
pub use routes::router;
