//! Core business logic for habitgraph.

pub mod services;

pub use services::*;
