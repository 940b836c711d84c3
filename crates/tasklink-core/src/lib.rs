pub mod api;
pub mod error;
pub mod hook;
pub mod io;
pub mod paths;
pub mod plan;
pub mod store;
pub mod types;

pub use error::{Result, TasklinkError};
