// src/core/listener.rs

//! Callback traits for asynchronous message delivery and error reporting.

use crate::core::errors::CmsError;
use crate::core::message::Message;

/// Receives messages delivered to a consumer.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: Message);
}

/// Receives failures that have no caller to return to, such as an async send
/// that the connector rejected.
pub trait ExceptionListener: Send + Sync {
    fn on_exception(&self, error: &CmsError);
}

impl<F> MessageListener for F
where
    F: Fn(Message) + Send + Sync,
{
    fn on_message(&self, message: Message) {
        self(message)
    }
}

impl<F> ExceptionListener for F
where
    F: Fn(&CmsError) + Send + Sync,
{
    fn on_exception(&self, error: &CmsError) {
        self(error)
    }
}
