//! Axum middleware wiring the interceptors into a router.

pub mod scan;
