//! ==============================================================================
//! store.rs - latest reading per sensor, shared by every task
//! ==============================================================================
//!
//! purpose:
//!     the one piece of mutable state in the node. sensor tasks write into
//!     it, the display renderer and the http responder read snapshots.
//!
//! why no lock:
//!     every task runs on the same thread (see runtime.rs), and none of the
//!     methods below awaits. a `set` therefore completes between two
//!     suspension points and a reader can never see half of it. the handle is
//!     `Rc`, so the compiler refuses to move it to another thread.
//!
//! ==============================================================================

use crate::domain::SensorReading;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// point-in-time copy of the whole store
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, SensorReading>);

impl Snapshot {
    pub fn get(&self, id: &str) -> Option<&SensorReading> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Cloneable handle to the shared map of sensor id -> latest reading.
#[derive(Clone, Default)]
pub struct SharedStateStore {
    inner: Rc<RefCell<BTreeMap<String, SensorReading>>>,
}

impl SharedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<SensorReading> {
        self.inner.borrow().get(id).cloned()
    }

    /// Replaces whatever was stored under `id`. Fields are never merged.
    pub fn set(&self, id: impl Into<String>, reading: SensorReading) {
        self.inner.borrow_mut().insert(id.into(), reading);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.inner.borrow().clone())
    }
}

impl std::fmt::Debug for SharedStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.inner.borrow().iter()).finish()
    }
}
