//! Composition of the habitgraph engine.

pub mod services;
