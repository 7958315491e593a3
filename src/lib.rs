// Library entry point for dwitter-graph
// Exposes modules for the maintenance binary and for testing

pub mod cascade;
pub mod config;
pub mod error;
pub mod feed;
pub mod intersect;
pub mod media;
pub mod models;
pub mod posts;
pub mod relations;
pub mod store;
pub mod users;
pub mod validate;
pub mod views;

pub use error::{GraphError, GraphResult};
