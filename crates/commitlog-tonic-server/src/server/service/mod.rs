//! gRPC service implementation and per-call dispatch.
//!
//! This module contains the logic that turns an authenticated gRPC call into
//! an authorized log operation. The middleware pipeline runs before any of it
//! and has already attached the caller's subject to the request.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`LogService`).
//! - [`dispatch`] - authorization gate and unary append/read.
//! - [`context`] - the explicit per-call context threaded through handlers.

pub mod context;
pub mod dispatch;
pub mod handler;
