// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Administrative surface: observations, routes, overrides, defaults,
//! filter parameters and tree-change notifications.
//!
//! Admin operations address resources by absolute path. Settings applied
//! to a path with no concrete resource create a placeholder; the settings
//! migrate onto the real input or output when it appears.

use crate::hub::DataHub;
use crate::resource::Resource;
use crate::sample::{DataType, Sample, Value};
use crate::tree::{EntryId, EntryKind};
use crate::{Error, Result};
use std::rc::Rc;

/// Operation reported to tree-change handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeChangeOp {
    Added,
    Removed,
}

/// Opaque reference to a registered tree-change handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeChangeHandlerId(u64);

type TreeChangeCallback = Box<dyn FnMut(&str, EntryKind, TreeChangeOp)>;

/// Registered tree-change handlers, dispatched like push handlers: each is
/// looked up by sequence number immediately before invocation.
#[derive(Default)]
pub(crate) struct TreeChangeHandlers {
    next_seq: u64,
    slots: Vec<(u64, TreeChangeCallback)>,
}

impl TreeChangeHandlers {
    fn add(&mut self, callback: TreeChangeCallback) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.push((seq, callback));
        seq
    }

    fn remove(&mut self, seq: u64) {
        self.slots.retain(|(s, _)| *s != seq);
    }

    pub(crate) fn seqs(&self) -> Vec<u64> {
        self.slots.iter().map(|(seq, _)| *seq).collect()
    }

    pub(crate) fn invoke(&mut self, seq: u64, path: &str, kind: EntryKind, op: TreeChangeOp) {
        if let Some((_, callback)) = self.slots.iter_mut().find(|(s, _)| *s == seq) {
            callback(path, kind, op);
        }
    }
}

/// Snapshot of one resource for the admin tools.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub path: String,
    pub kind: EntryKind,
    pub data_type: DataType,
    pub units: String,
    pub mandatory: bool,
    /// Timestamp and value of the current sample, if any.
    pub current: Option<(f64, Value)>,
    /// Path of the configured source, if routed.
    pub source: Option<String>,
}

impl DataHub {
    // ------------------------------------------------------------------
    // Observations
    // ------------------------------------------------------------------

    /// Create an observation at `path`. Idempotent; a placeholder is
    /// upgraded in place, keeping its admin settings.
    ///
    /// If a buffer backup file exists for the path, its contents are
    /// restored into the observation's ring.
    ///
    /// # Errors
    ///
    /// [`Error::Duplicate`] if the path carries an input or output;
    /// [`Error::NotFound`] for a malformed path.
    pub fn create_observation(&mut self, path: &str) -> Result<()> {
        if self.update_paused() {
            match self.tree.find(path).map(|id| self.tree.entry(id).kind()) {
                Some(EntryKind::Input | EntryKind::Output) => return Err(Error::Duplicate),
                _ => {}
            }
            let path = path.to_owned();
            self.defer_structural(move |hub| {
                if let Err(err) = hub.create_observation(&path) {
                    log::warn!("deferred observation creation at {path} failed: {err}");
                }
            });
            return Ok(());
        }

        let id = self.tree.resolve(path)?;
        match self.tree.entry(id).kind() {
            EntryKind::Observation => return Ok(()),
            EntryKind::Input | EntryKind::Output => return Err(Error::Duplicate),
            EntryKind::Namespace | EntryKind::Placeholder => {}
        }

        let entry = self.tree.entry_mut(id);
        let mut fresh = Resource::new_observation();
        if let Some(mut old) = entry.resource.take() {
            fresh.adopt_admin_settings(&mut old);
        }
        entry.resource = Some(fresh);
        entry.touch();

        let backup = self.backup_file(id);
        if backup.exists() {
            if let Some(obs) = self
                .tree
                .entry_mut(id)
                .resource
                .as_mut()
                .and_then(Resource::observation_mut)
            {
                match obs.restore_backup(&backup) {
                    Ok(count) => {
                        log::debug!("restored {count} buffered samples for {path}");
                    }
                    Err(err) => log::warn!("backup restore for {path} failed: {err}"),
                }
            }
        }

        log::debug!("created observation at {path}");
        self.notify_tree_change(id, EntryKind::Observation, TreeChangeOp::Added);
        Ok(())
    }

    /// Delete the observation at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name an
    /// observation.
    pub fn delete_observation(&mut self, path: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        if self.tree.entry(id).kind() != EntryKind::Observation {
            return Err(Error::NotFound);
        }
        self.delete_resource(path)
    }

    fn with_observation<T>(
        &mut self,
        path: &str,
        apply: impl FnOnce(&mut crate::resource::Observation) -> T,
    ) -> Result<T> {
        let id = self.find_resource(path)?;
        let obs = self
            .tree
            .entry_mut(id)
            .resource
            .as_mut()
            .and_then(Resource::observation_mut)
            .ok_or(Error::NotFound)?;
        Ok(apply(obs))
    }

    /// Set the minimum period between samples accepted by an observation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name an
    /// observation.
    pub fn set_min_period(&mut self, path: &str, seconds: f64) -> Result<()> {
        self.with_observation(path, |obs| obs.set_min_period(seconds))
    }

    /// Set the lowest accepted value. `NaN` unsets the limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name an
    /// observation.
    pub fn set_low_limit(&mut self, path: &str, limit: f64) -> Result<()> {
        self.with_observation(path, |obs| obs.set_low_limit(limit))
    }

    /// Set the highest accepted value. `NaN` unsets the limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name an
    /// observation.
    pub fn set_high_limit(&mut self, path: &str, limit: f64) -> Result<()> {
        self.with_observation(path, |obs| obs.set_high_limit(limit))
    }

    /// Set the magnitude a new value must differ from the current one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name an
    /// observation.
    pub fn set_change_by(&mut self, path: &str, magnitude: f64) -> Result<()> {
        self.with_observation(path, |obs| obs.set_change_by(magnitude))
    }

    /// Set the observation's FIFO ring capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name an
    /// observation.
    pub fn set_buffer_max_count(&mut self, path: &str, count: u32) -> Result<()> {
        self.with_observation(path, |obs| obs.set_buffer_max_count(count))
    }

    /// Set the minimum seconds between buffer backups; 0 disables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name an
    /// observation.
    pub fn set_buffer_backup_period(&mut self, path: &str, seconds: u32) -> Result<()> {
        self.with_observation(path, |obs| obs.set_backup_period(seconds))
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Set or clear the source route of the resource at `dst`.
    ///
    /// Both endpoints are created as placeholders if they do not exist
    /// yet. Adding an edge that already exists is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::Duplicate`] if the route would introduce a cycle.
    /// - [`Error::NotFound`] for a malformed path.
    pub fn set_source(&mut self, dst: &str, src: Option<&str>) -> Result<()> {
        if self.update_paused() {
            // Endpoint creation is structural; validate the cycle against
            // the tree as it stands and replay on resume.
            if let (Some(dst_id), Some(src_id)) =
                (self.tree.find(dst), src.and_then(|s| self.tree.find(s)))
            {
                self.check_cycle(dst_id, src_id)?;
            }
            let dst = dst.to_owned();
            let src = src.map(str::to_owned);
            self.defer_structural(move |hub| {
                if let Err(err) = hub.set_source(&dst, src.as_deref()) {
                    log::warn!("deferred route change for {dst} failed: {err}");
                }
            });
            return Ok(());
        }

        let dst_id = self.resolve_admin(dst)?;
        let Some(src_path) = src else {
            self.clear_source(dst_id);
            log::debug!("cleared source of {dst}");
            return Ok(());
        };

        let src_id = self.resolve_admin(src_path)?;
        self.check_cycle(dst_id, src_id)?;

        let current = self
            .tree
            .entry(dst_id)
            .resource
            .as_ref()
            .and_then(|res| res.source);
        if current == Some(src_id) {
            return Ok(()); // Edge already present.
        }
        self.clear_source(dst_id);

        if let Some(res) = self.tree.entry_mut(dst_id).resource.as_mut() {
            res.source = Some(src_id);
        }
        if let Some(res) = self.tree.entry_mut(src_id).resource.as_mut() {
            res.destinations.push(dst_id);
        }
        log::debug!("routed {src_path} -> {dst}");
        Ok(())
    }

    /// Walking upstream from `src` via source pointers must never reach
    /// `dst`; the destination graph stays a DAG.
    fn check_cycle(&self, dst_id: EntryId, src_id: EntryId) -> Result<()> {
        let mut cursor = Some(src_id);
        while let Some(node) = cursor {
            if node == dst_id {
                return Err(Error::Duplicate);
            }
            cursor = self
                .tree
                .get(node)
                .and_then(|entry| entry.resource.as_ref())
                .and_then(|res| res.source);
        }
        Ok(())
    }

    fn clear_source(&mut self, dst_id: EntryId) {
        let old = self
            .tree
            .entry_mut(dst_id)
            .resource
            .as_mut()
            .and_then(|res| res.source.take());
        if let Some(old_src) = old {
            if let Some(entry) = self.tree.get_mut(old_src) {
                if let Some(res) = entry.resource.as_mut() {
                    res.destinations.retain(|d| *d != dst_id);
                }
            }
        }
    }

    /// Path of the configured source of `path`, if routed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn source_of(&self, path: &str) -> Result<Option<String>> {
        let id = self.find_resource(path)?;
        Ok(self
            .tree
            .entry(id)
            .resource
            .as_ref()
            .and_then(|res| res.source)
            .map(|src| self.tree.path_of(src)))
    }

    // ------------------------------------------------------------------
    // Overrides, defaults and other per-resource settings
    // ------------------------------------------------------------------

    /// Install an override on the resource at `path`.
    ///
    /// The override is retained even when its type does not match an
    /// input's or output's declared type; it only takes effect while the
    /// types agree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a malformed path.
    pub fn set_override(&mut self, path: &str, value: Sample) -> Result<()> {
        let id = self.resolve_admin(path)?;
        if let Some(res) = self.tree.entry_mut(id).resource.as_mut() {
            res.set_override(value.data_type(), Rc::new(value));
        }
        Ok(())
    }

    /// Remove any override on the resource at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn remove_override(&mut self, path: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        if let Some(res) = self.tree.entry_mut(id).resource.as_mut() {
            res.remove_override();
        }
        Ok(())
    }

    /// Whether an override is currently in effect at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn is_overridden(&self, path: &str) -> Result<bool> {
        let id = self.find_resource(path)?;
        Ok(self
            .tree
            .entry(id)
            .resource
            .as_ref()
            .is_some_and(Resource::is_overridden))
    }

    /// Set the default value of the resource at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a malformed path.
    pub fn set_default(&mut self, path: &str, value: Sample) -> Result<()> {
        let id = self.resolve_admin(path)?;
        if let Some(res) = self.tree.entry_mut(id).resource.as_mut() {
            res.set_default(value.data_type(), Rc::new(value));
        }
        Ok(())
    }

    /// Remove any default value on the resource at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn remove_default(&mut self, path: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        if let Some(res) = self.tree.entry_mut(id).resource.as_mut() {
            res.remove_default();
        }
        Ok(())
    }

    /// Configure scalar JSON extraction for pushes arriving at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a malformed path.
    pub fn set_json_extraction(&mut self, path: &str, spec: Option<&str>) -> Result<()> {
        let id = self.resolve_admin(path)?;
        if let Some(res) = self.tree.entry_mut(id).resource.as_mut() {
            res.set_json_extraction(spec.map(str::to_owned));
        }
        Ok(())
    }

    /// Flag the resource at `path` as mandatory (reported in snapshots).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a malformed path.
    pub fn set_mandatory(&mut self, path: &str, mandatory: bool) -> Result<()> {
        let id = self.resolve_admin(path)?;
        if let Some(res) = self.tree.entry_mut(id).resource.as_mut() {
            res.set_mandatory(mandatory);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tree-change notifications
    // ------------------------------------------------------------------

    /// Register a handler invoked whenever a concrete resource is added
    /// to or removed from the tree.
    pub fn add_tree_change_handler(
        &mut self,
        callback: impl FnMut(&str, EntryKind, TreeChangeOp) + 'static,
    ) -> TreeChangeHandlerId {
        TreeChangeHandlerId(self.tree_change_handlers.add(Box::new(callback)))
    }

    /// Remove a tree-change handler. Unknown references are ignored.
    pub fn remove_tree_change_handler(&mut self, handler: TreeChangeHandlerId) {
        self.tree_change_handlers.remove(handler.0);
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    /// Describe the resource at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn describe(&self, path: &str) -> Result<ResourceInfo> {
        let id = self.find_resource(path)?;
        Ok(self.info_for(id))
    }

    /// Describe every concrete resource in the subtree rooted at `path`,
    /// in depth-first insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not resolve.
    pub fn list(&self, path: &str) -> Result<Vec<ResourceInfo>> {
        let root = self.tree.find(path).ok_or(Error::NotFound)?;
        let mut out = Vec::new();
        self.collect_info(root, &mut out);
        Ok(out)
    }

    fn collect_info(&self, id: EntryId, out: &mut Vec<ResourceInfo>) {
        if self.tree.entry(id).resource.is_some() {
            out.push(self.info_for(id));
        }
        let mut child = self.tree.first_child(id, false);
        while let Some(c) = child {
            self.collect_info(c, out);
            child = self.tree.next_sibling(c, false);
        }
    }

    fn info_for(&self, id: EntryId) -> ResourceInfo {
        let entry = self.tree.entry(id);
        let res = entry.resource.as_ref();
        ResourceInfo {
            path: self.tree.path_of(id),
            kind: entry.kind(),
            data_type: res.map_or(DataType::Trigger, Resource::current_type),
            units: res.map_or_else(String::new, |r| r.units().to_owned()),
            mandatory: res.is_some_and(Resource::is_mandatory),
            current: res.and_then(Resource::current).map(|sample| {
                (sample.timestamp(), sample.value().clone())
            }),
            source: res
                .and_then(|r| r.source)
                .map(|src| self.tree.path_of(src)),
        }
    }
}
