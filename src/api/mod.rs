//! Public HTTP control surface for the virtuous cycle (spec §6).

mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::build_router;
