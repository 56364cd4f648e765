//! Scanning services: stream tee, metadata codec, multipart extraction,
//! clamd client, policy and the interceptors that orchestrate them.

pub mod clamd;
pub mod interceptor;
pub mod metadata;
pub mod multipart;
pub mod observer;
pub mod policy;
pub mod registry;
pub mod tee;
