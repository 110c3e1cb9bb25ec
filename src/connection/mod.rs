// src/connection/mod.rs

//! The connection: owns the sessions created through it, the routing of
//! inbound messages to consumers, and the executor that delivers them.

// Declare the private sub-modules of the `connection` module.
mod core;
mod dispatch;

// Publicly re-export the primary types from the sub-modules.
pub use self::core::Connection;
