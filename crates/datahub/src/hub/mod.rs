// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The hub facade: resource lifecycle, push delivery and the cooperative
//! task queue.
//!
//! A [`DataHub`] owns the resource tree and a FIFO of deferred tasks. All
//! state lives in one cooperative domain; there are no locks and no worker
//! threads. Pushes run synchronously inside the caller's turn, while
//! snapshot steps, observation backups and completion callbacks are
//! deferred onto the queue and drained by [`DataHub::run_until_idle`].

mod admin;
mod push;


use crate::config::{HubConfig, MAX_UNITS_BYTES};
use crate::resource::Resource;
use crate::sample::{DataType, Sample, Timestamp, Value};
use crate::snapshot::ActiveSnapshot;
use crate::tree::{EntryId, EntryKind, ResourceTree};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;

pub use admin::{ResourceInfo, TreeChangeHandlerId, TreeChangeOp};

/// Opaque reference to a registered push handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId {
    entry: EntryId,
    seq: u64,
}

/// A unit of deferred work on the hub's cooperative queue.
pub(crate) type Task = Box<dyn FnOnce(&mut DataHub)>;

/// The in-process data clearinghouse.
pub struct DataHub {
    pub(crate) tree: ResourceTree,
    pub(crate) config: HubConfig,
    deferred: VecDeque<Task>,
    update_pause_depth: u32,
    pending_updates: Vec<Task>,
    pub(crate) deletions_tracked: bool,
    pub(crate) active_snapshot: Option<Box<ActiveSnapshot>>,
    pub(crate) tree_change_handlers: admin::TreeChangeHandlers,
}

impl Default for DataHub {
    fn default() -> Self {
        Self::new()
    }
}

impl DataHub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with the given configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            tree: ResourceTree::new(),
            config,
            deferred: VecDeque::new(),
            update_pause_depth: 0,
            pending_updates: Vec::new(),
            deletions_tracked: false,
            active_snapshot: None,
            tree_change_handlers: admin::TreeChangeHandlers::default(),
        }
    }

    /// Read-only view of the resource tree.
    #[must_use]
    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    /// The hub's runtime configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Cooperative task queue
    // ------------------------------------------------------------------

    /// Queue a task for deferred execution.
    pub(crate) fn defer(&mut self, task: impl FnOnce(&mut DataHub) + 'static) {
        self.deferred.push_back(Box::new(task));
    }

    /// Run one deferred task, if any. Returns whether one ran.
    pub fn pump(&mut self) -> bool {
        match self.deferred.pop_front() {
            Some(task) => {
                task(self);
                true
            }
            None => false,
        }
    }

    /// Drain the deferred task queue.
    ///
    /// Long operations re-queue themselves in small steps, so this runs
    /// until the hub is genuinely idle (an in-flight snapshot completes
    /// within the call, waiting on the sink as needed).
    pub fn run_until_idle(&mut self) {
        while self.pump() {}
    }

    // ------------------------------------------------------------------
    // Structural-update pausing
    // ------------------------------------------------------------------

    /// Pause structural mutation of the tree (snapshot in progress).
    pub(crate) fn start_update(&mut self) {
        self.update_pause_depth += 1;
    }

    /// Resume structural mutation, replaying deferred operations.
    pub(crate) fn end_update(&mut self) {
        debug_assert!(self.update_pause_depth > 0);
        self.update_pause_depth -= 1;
        if self.update_pause_depth == 0 && !self.pending_updates.is_empty() {
            let pending = std::mem::take(&mut self.pending_updates);
            log::debug!("replaying {} deferred structural updates", pending.len());
            for task in pending {
                task(self);
            }
        }
    }

    pub(crate) fn update_paused(&self) -> bool {
        self.update_pause_depth > 0
    }

    /// Queue a structural operation for replay at `end_update`. A replay
    /// that has become impossible logs and is dropped; the caller already
    /// validated it against the tree as it stood.
    pub(crate) fn defer_structural(&mut self, task: impl FnOnce(&mut DataHub) + 'static) {
        self.pending_updates.push(Box::new(task));
    }

    // ------------------------------------------------------------------
    // Producer / consumer API
    // ------------------------------------------------------------------

    /// Create an input resource at `path` with a fixed data type and
    /// units.
    ///
    /// Idempotent for an identical shape; a placeholder at the path is
    /// upgraded, keeping its admin settings.
    ///
    /// # Errors
    ///
    /// - [`Error::Duplicate`] if the path carries a resource of a
    ///   different shape.
    /// - [`Error::NotFound`] for a malformed path.
    /// - [`Error::Overflow`] if `units` is too long.
    pub fn create_input(&mut self, path: &str, data_type: DataType, units: &str) -> Result<()> {
        self.create_io(path, data_type, units, true)
    }

    /// Create an output resource at `path`. See [`DataHub::create_input`].
    ///
    /// # Errors
    ///
    /// Same as [`DataHub::create_input`].
    pub fn create_output(&mut self, path: &str, data_type: DataType, units: &str) -> Result<()> {
        self.create_io(path, data_type, units, false)
    }

    fn create_io(
        &mut self,
        path: &str,
        data_type: DataType,
        units: &str,
        is_input: bool,
    ) -> Result<()> {
        if units.len() > MAX_UNITS_BYTES {
            return Err(Error::Overflow);
        }
        if self.update_paused() {
            self.validate_io_shape(path, data_type, units, is_input)?;
            let path = path.to_owned();
            let units = units.to_owned();
            self.defer_structural(move |hub| {
                if let Err(err) = hub.create_io(&path, data_type, &units, is_input) {
                    log::warn!("deferred resource creation at {path} failed: {err}");
                }
            });
            return Ok(());
        }

        let wanted = if is_input {
            EntryKind::Input
        } else {
            EntryKind::Output
        };

        enum Plan {
            Attach,
            Upgrade,
            Idempotent,
        }

        let id = self.tree.resolve(path)?;
        let plan = match &self.tree.entry(id).resource {
            None => Plan::Attach,
            Some(res) if res.entry_kind() == EntryKind::Placeholder => Plan::Upgrade,
            Some(res)
                if res.entry_kind() == wanted
                    && res.declared_type() == Some(data_type)
                    && res.units() == units =>
            {
                Plan::Idempotent
            }
            Some(_) => return Err(Error::Duplicate),
        };

        let entry = self.tree.entry_mut(id);
        match plan {
            Plan::Idempotent => return Ok(()),
            Plan::Attach => {
                entry.resource = Some(Self::fresh_io(data_type, units, is_input));
                entry.touch();
            }
            Plan::Upgrade => {
                let mut fresh = Self::fresh_io(data_type, units, is_input);
                if let Some(mut old) = entry.resource.take() {
                    fresh.adopt_admin_settings(&mut old);
                }
                entry.resource = Some(fresh);
                entry.touch();
            }
        }

        let kind = wanted;
        log::debug!("created {kind:?} at {path} ({})", data_type.name());
        self.notify_tree_change(id, kind, TreeChangeOp::Added);
        Ok(())
    }

    fn fresh_io(data_type: DataType, units: &str, is_input: bool) -> Resource {
        if is_input {
            Resource::new_input(data_type, units)
        } else {
            Resource::new_output(data_type, units)
        }
    }

    /// Validation half of resource creation, used while structural updates
    /// are paused.
    fn validate_io_shape(
        &self,
        path: &str,
        data_type: DataType,
        units: &str,
        is_input: bool,
    ) -> Result<()> {
        let Some(id) = self.tree.find(path) else {
            return Ok(());
        };
        let Some(existing) = &self.tree.entry(id).resource else {
            return Ok(());
        };
        let wanted = if is_input {
            EntryKind::Input
        } else {
            EntryKind::Output
        };
        match existing.entry_kind() {
            EntryKind::Placeholder => Ok(()),
            kind if kind == wanted
                && existing.declared_type() == Some(data_type)
                && existing.units() == units =>
            {
                Ok(())
            }
            _ => Err(Error::Duplicate),
        }
    }

    /// Remove the resource at `path`.
    ///
    /// If admin settings survive, the entry is demoted to a placeholder;
    /// otherwise the entry is released (retained as a deletion record when
    /// tracking is enabled) and emptied ancestors are collected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a concrete
    /// resource.
    pub fn delete_resource(&mut self, path: &str) -> Result<()> {
        let id = self
            .tree
            .find(path)
            .filter(|id| self.tree.entry(*id).resource.is_some())
            .ok_or(Error::NotFound)?;
        let kind = self.tree.entry(id).kind();
        if kind == EntryKind::Placeholder {
            return Err(Error::NotFound);
        }

        if self.update_paused() {
            let path = path.to_owned();
            self.defer_structural(move |hub| {
                if let Err(err) = hub.delete_resource(&path) {
                    log::warn!("deferred resource deletion at {path} failed: {err}");
                }
            });
            return Ok(());
        }

        self.notify_tree_change(id, kind, TreeChangeOp::Removed);

        let entry = self.tree.entry_mut(id);
        let mut removed = match entry.resource.take() {
            Some(res) => res,
            None => return Err(Error::NotFound),
        };
        entry.touch();

        if removed.has_admin_settings() {
            let mut placeholder = Resource::new_placeholder();
            placeholder.adopt_admin_settings(&mut removed);
            self.tree.entry_mut(id).resource = Some(placeholder);
            log::debug!("demoted {path} to placeholder");
            return Ok(());
        }

        // Unhook the routing graph from both sides before the entry goes.
        let destinations = std::mem::take(&mut removed.destinations);
        for dest in destinations {
            if let Some(dest_entry) = self.tree.get_mut(dest) {
                if let Some(dest_res) = dest_entry.resource.as_mut() {
                    if dest_res.source == Some(id) {
                        dest_res.source = None;
                    }
                }
            }
        }
        if let Some(src) = removed.source {
            if let Some(src_entry) = self.tree.get_mut(src) {
                if let Some(src_res) = src_entry.resource.as_mut() {
                    src_res.destinations.retain(|d| *d != id);
                }
            }
        }

        if self.tree.first_child(id, true).is_some() {
            // Children remain; the entry lives on as a namespace.
            return Ok(());
        }

        if self.deletions_tracked {
            self.tree.mark_deleted(id);
            log::debug!("recorded deletion of {path}");
        } else {
            self.tree.release_and_collect(id);
        }
        Ok(())
    }

    /// Push a sample to the resource at `path`.
    ///
    /// Coercion failures, units mismatches and filter rejections drop the
    /// sample silently; they are intermediation, not errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn push(&mut self, path: &str, sample: Sample) -> Result<()> {
        let id = self
            .tree
            .find(path)
            .filter(|id| self.tree.entry(*id).resource.is_some())
            .ok_or(Error::NotFound)?;
        self.deliver(id, "", Rc::new(sample));
        Ok(())
    }

    /// Push a trigger sample. See [`DataHub::push`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn push_trigger(&mut self, path: &str, ts: impl Into<Timestamp>) -> Result<()> {
        self.push(path, Sample::trigger(ts))
    }

    /// Push a boolean sample. See [`DataHub::push`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn push_boolean(
        &mut self,
        path: &str,
        ts: impl Into<Timestamp>,
        value: bool,
    ) -> Result<()> {
        self.push(path, Sample::boolean(ts, value))
    }

    /// Push a numeric sample. See [`DataHub::push`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn push_numeric(
        &mut self,
        path: &str,
        ts: impl Into<Timestamp>,
        value: f64,
    ) -> Result<()> {
        self.push(path, Sample::numeric(ts, value))
    }

    /// Push a string sample. See [`DataHub::push`].
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown path, [`Error::Overflow`] for an
    /// oversized string.
    pub fn push_string(
        &mut self,
        path: &str,
        ts: impl Into<Timestamp>,
        value: &str,
    ) -> Result<()> {
        self.push(path, Sample::string(ts, value)?)
    }

    /// Push a JSON sample. See [`DataHub::push`].
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown path, [`Error::Overflow`] for an
    /// oversized value.
    pub fn push_json(
        &mut self,
        path: &str,
        ts: impl Into<Timestamp>,
        value: &str,
    ) -> Result<()> {
        self.push(path, Sample::json(ts, value)?)
    }

    // ------------------------------------------------------------------
    // Push handlers
    // ------------------------------------------------------------------

    /// Register a push handler on the resource at `path`.
    ///
    /// The handler is invoked synchronously, in registration order, for
    /// every accepted sample whose type matches `data_type`. If the
    /// resource has no current value but a type-matching default, the
    /// default is delivered immediately as a synthetic push stamped now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the path does not name a resource.
    pub fn add_push_handler(
        &mut self,
        path: &str,
        data_type: DataType,
        callback: impl FnMut(f64, &Value) + 'static,
    ) -> Result<HandlerId> {
        let id = self
            .tree
            .find(path)
            .filter(|id| self.tree.entry(*id).resource.is_some())
            .ok_or(Error::NotFound)?;

        let (seq, synthetic) = {
            let res = self
                .tree
                .entry_mut(id)
                .resource
                .as_mut()
                .ok_or(Error::NotFound)?;
            let seq = res.handlers.add(data_type, Box::new(callback));
            let synthetic = if res.current().is_none() {
                res.active_default()
                    .map(|(_, value)| Sample::from_value(Timestamp::Now, value.value().clone()))
            } else {
                None
            };
            (seq, synthetic)
        };

        if let Some(sample) = synthetic {
            self.deliver(id, "", Rc::new(sample));
        }
        Ok(HandlerId { entry: id, seq })
    }

    /// Remove a push handler. Unknown or stale references are ignored.
    pub fn remove_push_handler(&mut self, handler: HandlerId) {
        if let Some(entry) = self.tree.get_mut(handler.entry) {
            if let Some(res) = entry.resource.as_mut() {
                res.handlers.remove(handler.seq);
            }
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers shared with the admin surface
    // ------------------------------------------------------------------

    /// Resolve a path for an admin operation, attaching a placeholder if
    /// no resource exists there yet.
    pub(crate) fn resolve_admin(&mut self, path: &str) -> Result<EntryId> {
        let id = self.tree.resolve(path)?;
        let entry = self.tree.entry_mut(id);
        if entry.resource.is_none() {
            entry.resource = Some(Resource::new_placeholder());
            entry.touch();
            log::debug!("created placeholder at {path}");
        }
        Ok(id)
    }

    /// Look up an existing resource-bearing entry.
    pub(crate) fn find_resource(&self, path: &str) -> Result<EntryId> {
        self.tree
            .find(path)
            .filter(|id| self.tree.entry(*id).resource.is_some())
            .ok_or(Error::NotFound)
    }

    pub(crate) fn notify_tree_change(&mut self, id: EntryId, kind: EntryKind, op: TreeChangeOp) {
        let path = self.tree.path_of(id);
        let seqs = self.tree_change_handlers.seqs();
        for seq in seqs {
            self.tree_change_handlers.invoke(seq, &path, kind, op);
        }
    }

    /// Backup file for the observation at `id`, under the configured
    /// backup directory.
    pub(crate) fn backup_file(&self, id: EntryId) -> PathBuf {
        let path = self.tree.path_of(id);
        let flat: String = path.trim_start_matches('/').replace('/', ".");
        self.config.backup_dir.join(format!("{flat}.jsonl"))
    }
}
