// src/core/session/temporary.rs

//! Session-scoped temporary destinations.

use super::{Closeable, Session};
use crate::core::concurrent::AtomicBoolean;
use crate::core::connector::ConnectorResource;
use crate::core::errors::CmsResult;
use crate::core::message::Destination;
use std::sync::{Arc, Weak};

/// A temporary queue or topic that lives until it is closed or its session closes.
pub struct TemporaryDestination {
    destination: Destination,
    session: Weak<Session>,
    closed: AtomicBoolean,
}

impl TemporaryDestination {
    pub(crate) fn new(destination: Destination, session: Weak<Session>) -> Arc<Self> {
        Arc::new(Self {
            destination,
            session,
            closed: AtomicBoolean::new(false),
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Closeable for TemporaryDestination {
    fn close(&self) -> CmsResult<()> {
        if self.closed.get_and_set(true) {
            return Ok(());
        }
        match self.session.upgrade() {
            Some(session) => session.on_destroy_session_resource(&self.connector_resource()),
            None => Ok(()),
        }
    }

    fn connector_resource(&self) -> ConnectorResource {
        ConnectorResource::TemporaryDestination(self.destination.clone())
    }
}
