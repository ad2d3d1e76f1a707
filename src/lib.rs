//! mapforge: a backend for user-defined map documents that renders them into
//! static artifacts (PNG, SVG, PDF) through an external cartographic engine.
//!
//! Rendering is CPU-bound and slow, so every render request becomes an
//! asynchronous job: deduplicated by render target, tracked through a strict
//! state machine, and resolved against an immutable versioned artifact store.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod render;
