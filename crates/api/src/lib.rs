//! HTTP front door: job intake, job status, inbound SMS webhook.

pub mod app;
pub mod context;
pub mod middleware;
