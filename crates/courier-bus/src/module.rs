//! # Bus Modules
//!
//! A module is a unit of functionality that plugs into a bus: it registers its
//! subscriptions in `attach`, may begin background work in `start`, and tears
//! everything down in `stop` and `unattach`.
//!
//! ## Lifecycle
//!
//! ```text
//! add_module ──► attach ──► start ──► (running) ──► stop ──► unattach
//! ```
//!
//! On bus disposal every module is stopped in reverse registration order, then
//! unattached in reverse order.

use crate::bus::{BusCore, MessageBus};
use crate::error::BusError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A pluggable bus extension.
pub trait BusModule: Send + Sync + 'static {
    /// Unique name of this module on a bus.
    fn name(&self) -> &str;

    /// Register subscriptions, routes, workers.
    fn attach(&self, _bus: &MessageBus) -> Result<(), BusError> {
        Ok(())
    }

    /// Begin active work. Called once `attach` succeeded.
    fn start(&self) -> Result<(), BusError> {
        Ok(())
    }

    /// Stop active work.
    fn stop(&self) {}

    /// Release everything acquired in `attach`.
    fn unattach(&self) {}
}

pub(crate) struct ModuleEntry {
    pub(crate) id: u64,
    pub(crate) module: Arc<dyn BusModule>,
}

/// Stops and unattaches a module when disposed or dropped.
#[must_use = "the module is removed when the token is dropped"]
pub struct ModuleToken {
    id: u64,
    name: String,
    bus: Weak<BusCore>,
    disposed: AtomicBool,
}

impl ModuleToken {
    pub(crate) fn new(id: u64, name: String, bus: Weak<BusCore>) -> Self {
        Self {
            id,
            name,
            bus,
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stop and unattach the module. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_module(self.id);
        }
    }
}

impl Drop for ModuleToken {
    fn drop(&mut self) {
        self.dispose();
    }
}
