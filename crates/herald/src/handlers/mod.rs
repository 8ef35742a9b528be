//! HTTP request handlers.

mod admin;
pub(crate) mod api_auth;
mod health;
pub mod problem_details;
pub mod v1;
mod version;

pub use admin::shutdown;
pub use health::{livez, readyz};
pub use version::version;
