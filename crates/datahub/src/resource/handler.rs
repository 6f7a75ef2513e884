// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Push handler registrations.
//!
//! Handlers subscribe per data type and are invoked synchronously, in
//! registration order, on the acceptance path of a push. Dispatch looks
//! each handler up by its sequence number immediately before invocation,
//! so a registration removed between two invocations of the same dispatch
//! is simply skipped.

use crate::sample::{DataType, Value};

/// Callback invoked with the timestamp and value of an accepted sample.
pub type PushCallback = Box<dyn FnMut(f64, &Value)>;

/// One registered push handler.
pub struct HandlerSlot {
    seq: u64,
    data_type: DataType,
    callback: PushCallback,
}

impl std::fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("seq", &self.seq)
            .field("data_type", &self.data_type)
            .finish_non_exhaustive()
    }
}

/// Ordered list of push handlers attached to one resource.
#[derive(Debug, Default)]
pub struct HandlerList {
    next_seq: u64,
    slots: Vec<HandlerSlot>,
}

impl HandlerList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; returns its sequence number within this list.
    pub fn add(&mut self, data_type: DataType, callback: PushCallback) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.push(HandlerSlot {
            seq,
            data_type,
            callback,
        });
        seq
    }

    /// Remove a handler by sequence number. Unknown numbers are ignored.
    pub fn remove(&mut self, seq: u64) {
        self.slots.retain(|slot| slot.seq != seq);
    }

    /// Sequence numbers of the handlers subscribed to `data_type`, in
    /// registration order.
    #[must_use]
    pub fn matching(&self, data_type: DataType) -> Vec<u64> {
        self.slots
            .iter()
            .filter(|slot| slot.data_type == data_type)
            .map(|slot| slot.seq)
            .collect()
    }

    /// Invoke the handler with the given sequence number, if it still
    /// exists.
    pub fn invoke(&mut self, seq: u64, timestamp: f64, value: &Value) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.seq == seq) {
            (slot.callback)(timestamp, value);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
