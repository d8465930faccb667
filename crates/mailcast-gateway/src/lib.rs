//! # Mailcast Gateway
//! HTTP surface for scheduling, execution, and job control.

pub mod routes;
pub mod server;

pub use server::{AppState, serve};
