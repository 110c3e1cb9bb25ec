// src/core/mod.rs

//! The central module containing the session layer and the building blocks it
//! relies on.

pub mod concurrent;
pub mod connector;
pub mod errors;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod session;

pub use errors::{CmsError, CmsResult};
