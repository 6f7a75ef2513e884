// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The snapshot engine: a cooperative, streamed tree walker.
//!
//! A snapshot captures a consistent view of a subtree and streams its
//! encoded form through a non-blocking sink. Two state machines cooperate:
//! the outer tree walk (`NodeBegin -> {NodeChildren | NodeEnd} ->
//! NodeSibling -> {NodeBegin | NodeEnd | TreeEnd}`) and the formatter's
//! internal micro-machine. Every outer transition is deferred through the
//! hub's task queue, and the formatter only advances once its previously
//! buffered bytes have drained, so the engine never holds the event loop
//! while waiting on I/O.
//!
//! While a snapshot runs, structural mutation of the tree is paused
//! (deferred and replayed on completion); value pushes continue and are
//! reflected live in the emitted values.

mod formatter;
mod json;
mod sink;

#[cfg(test)]
mod tests;

pub use formatter::{filter, FormatCtx, SnapshotFormatter};
pub use json::JsonFormatter;
pub use sink::{MemoryHandle, MemorySink, SinkStatus, SnapshotSink};

#[cfg(unix)]
pub use sink::PipeSink;

use crate::config::MAX_SNAPSHOT_PASSES;
use crate::hub::DataHub;
use crate::sample::wall_clock;
use crate::tree::EntryId;
use crate::{Error, Result};
use sink::OutBuffer;
use std::io;

/// Flag: physically release all deletion records covered by the snapshot
/// once they have been reported.
pub const FLUSH_DELETIONS: u32 = 0x1;

/// Snapshot output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotFormat {
    Json,
}

impl SnapshotFormat {
    /// Parse a format name as accepted by the CLI tools.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for an unknown name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(SnapshotFormat::Json),
            _ => Err(Error::Unsupported),
        }
    }
}

/// Parameters of a snapshot request.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    /// Output encoding.
    pub format: SnapshotFormat,
    /// Flag bits ([`FLUSH_DELETIONS`]).
    pub flags: u32,
    /// Absolute path of the subtree to capture.
    pub root: String,
    /// Only include entries modified after this time stamp; 0 requests
    /// the full tree.
    pub since: f64,
}

impl SnapshotRequest {
    /// A full-tree JSON snapshot rooted at `root`.
    #[must_use]
    pub fn new(root: &str) -> Self {
        Self {
            format: SnapshotFormat::Json,
            flags: 0,
            root: root.to_owned(),
            since: 0.0,
        }
    }
}

/// Completion callback for a snapshot request.
pub(crate) type SnapshotCallback = Box<dyn FnOnce(Result<()>)>;

/// States of the tree-walk state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    /// Begin processing a new tree node.
    NodeBegin,
    /// Begin processing children of a tree node.
    NodeChildren,
    /// Finish processing the current tree node.
    NodeEnd,
    /// Begin processing the next sibling of a tree node.
    NodeSibling,
    /// Done processing all tree nodes.
    TreeEnd,
}

/// Formatter callbacks the engine can issue.
enum FormatterEvent {
    StartTree,
    BeginNode,
    EndNode,
    EndTree,
    Resume,
}

/// State of the snapshot currently in progress.
pub struct ActiveSnapshot {
    flags: u32,
    pub(crate) since: f64,
    pub(crate) timestamp: f64,
    passes: u32,
    state: WalkState,
    pub(crate) node: EntryId,
    pub(crate) root: EntryId,
    parents: Vec<EntryId>,
    pub(crate) has_deletions: bool,
    formatter: Option<Box<dyn SnapshotFormatter>>,
    sink: Box<dyn SnapshotSink>,
    pub(crate) out: OutBuffer,
    pub(crate) step_requested: bool,
    callback: Option<SnapshotCallback>,
}

impl DataHub {
    /// Capture a snapshot of the resource tree, streaming through the
    /// provided sink.
    ///
    /// The completion status (including `Busy`, `NotFound` and transport
    /// failures) is reported exclusively through `callback`, which is
    /// always invoked from the deferred task queue. Drive the hub with
    /// [`DataHub::run_until_idle`] until it fires.
    pub fn take_snapshot_with_sink(
        &mut self,
        request: &SnapshotRequest,
        sink: Box<dyn SnapshotSink>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        let formatter: Box<dyn SnapshotFormatter> = match request.format {
            SnapshotFormat::Json => Box::new(JsonFormatter::new()),
        };
        self.snapshot_begin(request, formatter, sink, Box::new(callback));
    }

    fn snapshot_begin(
        &mut self,
        request: &SnapshotRequest,
        formatter: Box<dyn SnapshotFormatter>,
        sink: Box<dyn SnapshotSink>,
        callback: SnapshotCallback,
    ) {
        if self.active_snapshot.is_some() {
            log::debug!("snapshot refused: one already in progress");
            self.defer(move |_| callback(Err(Error::Busy)));
            return;
        }

        // Pause structural updates to the tree while the scan runs.
        self.start_update();

        let Some(root) = self.tree.find(&request.root) else {
            self.end_update();
            self.defer(move |_| callback(Err(Error::NotFound)));
            return;
        };

        let snap = Box::new(ActiveSnapshot {
            flags: request.flags,
            since: request.since,
            timestamp: wall_clock(),
            passes: 0,
            state: WalkState::NodeBegin,
            node: root,
            root,
            parents: Vec::new(),
            has_deletions: self.tree.subtree_has_deletions(root),
            formatter: Some(formatter),
            sink,
            out: OutBuffer::new(),
            step_requested: false,
            callback: Some(callback),
        });
        let wants_scan = snap.formatter.as_ref().is_some_and(|f| f.scan());
        self.active_snapshot = Some(snap);

        if wants_scan {
            self.snapshot_start_pass();
        } else {
            self.snapshot_end(Err(Error::Unsupported));
        }
    }

    /// Capture a snapshot streamed through an anonymous pipe.
    ///
    /// Returns the read end of the pipe; the encoded bytes appear there as
    /// the engine runs, and EOF marks the end of the stream. `None` is
    /// returned when no stream could be set up (the callback still fires
    /// with the failure).
    #[cfg(unix)]
    pub fn take_snapshot(
        &mut self,
        request: &SnapshotRequest,
        callback: impl FnOnce(Result<()>) + 'static,
    ) -> Option<io::PipeReader> {
        if self.active_snapshot.is_some() {
            self.defer(move |_| callback(Err(Error::Busy)));
            return None;
        }
        match PipeSink::new() {
            Ok((pipe_sink, reader)) => {
                self.take_snapshot_with_sink(request, Box::new(pipe_sink), callback);
                Some(reader)
            }
            Err(err) => {
                log::warn!("snapshot pipe setup failed: {err}");
                self.defer(move |_| callback(Err(Error::Fault)));
                None
            }
        }
    }

    /// Control whether deletion records are maintained.
    ///
    /// While enabled, deleting a resource retains its entry for inclusion
    /// in snapshots. Disabling tracking flushes all records immediately.
    pub fn track_deletions(&mut self, on: bool) {
        self.deletions_tracked = on;
        if !on {
            if self.update_paused() {
                self.defer_structural(DataHub::flush_all_deletions);
            } else {
                self.flush_all_deletions();
            }
        }
    }

    /// Whether deletion records are currently maintained.
    #[must_use]
    pub fn deletions_tracked(&self) -> bool {
        self.deletions_tracked
    }

    fn flush_all_deletions(&mut self) {
        let root = self.tree.root();
        self.tree.flush_deletion_records(root);
    }

    // ------------------------------------------------------------------
    // Pass management
    // ------------------------------------------------------------------

    fn snapshot_start_pass(&mut self) {
        let (root, pass_filter) = {
            let Some(snap) = self.active_snapshot.as_mut() else {
                return;
            };
            snap.passes += 1;
            snap.node = snap.root;
            snap.state = WalkState::NodeBegin;
            log::debug!("starting snapshot pass {}", snap.passes);
            let pass_filter = snap
                .formatter
                .as_ref()
                .map_or(filter::LIVE, |f| f.filter());
            (snap.root, pass_filter)
        };
        self.update_relevance(root, pass_filter);
        self.snapshot_call(FormatterEvent::StartTree);
    }

    /// Recursively annotate `node` and its descendants with the relevance
    /// bit for the coming pass. A node is relevant if it matches the
    /// filter on its own, or if any descendant does (preserving the path
    /// from root to every reported node).
    fn update_relevance(&mut self, node: EntryId, pass_filter: u32) -> bool {
        let own = {
            let Some(snap) = self.active_snapshot.as_ref() else {
                return false;
            };
            let entry = self.tree.entry(node);
            if node == snap.root {
                // Always include the root node.
                true
            } else if pass_filter & filter::CREATED != 0 && entry.is_new() {
                true
            } else if pass_filter & filter::DELETED != 0 && entry.is_deleted() {
                true
            } else {
                pass_filter & filter::LIVE != 0 && entry.last_modified() > snap.since
            }
        };

        let mut relevant = own;
        let mut child = self.tree.first_child(node, true);
        while let Some(c) = child {
            relevant = self.update_relevance(c, pass_filter) || relevant;
            child = self.tree.next_sibling(c, true);
        }

        self.tree.entry_mut(node).set_relevant(relevant);
        relevant
    }

    // ------------------------------------------------------------------
    // Tree-walk state machine
    // ------------------------------------------------------------------

    /// Queue the next outer-state transition through the deferred queue.
    fn snapshot_queue_step(&mut self) {
        self.defer(DataHub::snapshot_step);
    }

    fn snapshot_step(&mut self) {
        let Some(snap) = self.active_snapshot.as_ref() else {
            return;
        };
        let state = snap.state;
        log::debug!("snapshot transition -> {state:?}");
        match state {
            WalkState::NodeBegin => self.walk_node_begin(),
            WalkState::NodeChildren => self.walk_node_children(),
            WalkState::NodeEnd => self.walk_node_end(),
            WalkState::NodeSibling => self.walk_node_sibling(),
            WalkState::TreeEnd => self.walk_tree_end(),
        }
    }

    fn pass_includes_deleted(&self) -> bool {
        self.active_snapshot
            .as_ref()
            .and_then(|snap| snap.formatter.as_ref())
            .is_some_and(|f| f.filter() & filter::DELETED != 0)
    }

    fn walk_node_begin(&mut self) {
        let include_deleted = self.pass_includes_deleted();
        let Some(snap) = self.active_snapshot.as_mut() else {
            return;
        };
        let node = snap.node;

        if self.tree.entry(node).is_relevant() {
            // Deletion records have no live children to descend into.
            let child = if self.tree.entry(node).is_deleted() {
                None
            } else {
                self.tree.first_child(node, include_deleted)
            };
            let next = if child.is_none() {
                WalkState::NodeEnd
            } else {
                WalkState::NodeChildren
            };
            if let Some(snap) = self.active_snapshot.as_mut() {
                snap.state = next;
            }
            self.snapshot_call(FormatterEvent::BeginNode);
        } else {
            snap.state = WalkState::NodeEnd;
            self.snapshot_queue_step();
        }
    }

    fn walk_node_children(&mut self) {
        let include_deleted = self.pass_includes_deleted();
        let Some(snap) = self.active_snapshot.as_mut() else {
            return;
        };
        let parent = snap.node;
        snap.parents.push(parent);

        // We only get here after NodeBegin already saw a child.
        let child = match self.tree.first_child(parent, include_deleted) {
            Some(child) => child,
            None => unreachable!("node lost its children mid-walk"),
        };
        if let Some(snap) = self.active_snapshot.as_mut() {
            snap.node = child;
            snap.state = WalkState::NodeBegin;
        }
        self.snapshot_queue_step();
    }

    fn walk_node_end(&mut self) {
        let Some(snap) = self.active_snapshot.as_mut() else {
            return;
        };
        let node = snap.node;
        snap.state = WalkState::NodeSibling;
        if self.tree.entry(node).is_relevant() {
            self.snapshot_call(FormatterEvent::EndNode);
            // A completed visit consumes the node's newness.
            if let Some(entry) = self.tree.get_mut(node) {
                entry.clear_newness();
            }
        } else {
            self.snapshot_queue_step();
        }
    }

    fn walk_node_sibling(&mut self) {
        let include_deleted = self.pass_includes_deleted();
        let Some(snap) = self.active_snapshot.as_ref() else {
            return;
        };
        let node = snap.node;
        let flush = snap.flags & FLUSH_DELETIONS != 0;

        let next = self.tree.next_sibling(node, include_deleted);
        if flush && self.tree.entry(node).is_deleted() {
            // Flushing as we go: drop the reported deletion record.
            self.tree.release(node);
        }

        let Some(snap) = self.active_snapshot.as_mut() else {
            return;
        };
        match next {
            Some(sibling) => {
                snap.node = sibling;
                snap.state = WalkState::NodeBegin;
            }
            None => match snap.parents.pop() {
                Some(parent) => {
                    snap.node = parent;
                    snap.state = WalkState::NodeEnd;
                }
                None => {
                    snap.state = WalkState::TreeEnd;
                    self.snapshot_call(FormatterEvent::EndTree);
                    return;
                }
            },
        }
        self.snapshot_queue_step();
    }

    fn walk_tree_end(&mut self) {
        let Some(snap) = self.active_snapshot.as_ref() else {
            return;
        };
        assert!(snap.parents.is_empty(), "parents left on the walk stack");

        let scan = snap.formatter.as_ref().is_some_and(|f| f.scan());
        let passes = snap.passes;
        if scan && passes < MAX_SNAPSHOT_PASSES {
            self.snapshot_start_pass();
        } else if passes >= MAX_SNAPSHOT_PASSES {
            self.snapshot_end(Err(Error::OutOfRange));
        } else {
            self.snapshot_end(Ok(()));
        }
    }

    // ------------------------------------------------------------------
    // Formatter driving and output draining
    // ------------------------------------------------------------------

    fn snapshot_call(&mut self, event: FormatterEvent) {
        let Some(mut snap) = self.active_snapshot.take() else {
            return;
        };
        let Some(mut fmt) = snap.formatter.take() else {
            self.active_snapshot = Some(snap);
            return;
        };
        {
            let mut ctx = FormatCtx {
                tree: &self.tree,
                snap: &mut *snap,
            };
            match event {
                FormatterEvent::StartTree => fmt.start_tree(&mut ctx),
                FormatterEvent::BeginNode => fmt.begin_node(&mut ctx),
                FormatterEvent::EndNode => fmt.end_node(&mut ctx),
                FormatterEvent::EndTree => fmt.end_tree(&mut ctx),
                FormatterEvent::Resume => fmt.resume(&mut ctx),
            }
        }
        snap.formatter = Some(fmt);
        self.active_snapshot = Some(snap);
        self.snapshot_pump();
    }

    /// Drive the formatter/sink cycle: drain buffered bytes, then either
    /// advance the tree walk (if the formatter asked for a step) or resume
    /// the formatter's micro-machine.
    fn snapshot_pump(&mut self) {
        loop {
            let Some(snap) = self.active_snapshot.as_mut() else {
                return;
            };

            if !snap.out.is_empty() {
                match snap.sink.try_write(snap.out.pending()) {
                    Ok(count) => {
                        snap.out.consume(count);
                        continue;
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        // Park until the sink drains; the wait itself runs
                        // as a deferred task so queued pushes stay ahead
                        // of it.
                        self.defer(DataHub::snapshot_wait_writable);
                        return;
                    }
                    Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                        self.snapshot_end(Err(Error::Closed));
                        return;
                    }
                    Err(err) => {
                        log::warn!("snapshot stream fault: {err}");
                        self.snapshot_end(Err(Error::Fault));
                        return;
                    }
                }
            }

            if snap.step_requested {
                snap.step_requested = false;
                self.snapshot_queue_step();
                return;
            }

            self.snapshot_call(FormatterEvent::Resume);
            return;
        }
    }

    /// Deferred task: block until the sink is writable, then continue
    /// draining.
    fn snapshot_wait_writable(&mut self) {
        let Some(snap) = self.active_snapshot.as_mut() else {
            return;
        };
        match snap.sink.wait_writable() {
            Ok(SinkStatus::Ready) => self.snapshot_pump(),
            Ok(SinkStatus::Closed) => self.snapshot_end(Err(Error::Closed)),
            Err(err) => {
                log::warn!("snapshot stream poll fault: {err}");
                self.snapshot_end(Err(Error::Fault));
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// End the snapshot and tidy up: close the formatter, drop the sink
    /// (closing the engine's pipe end), resume tree updates and queue the
    /// result callback.
    fn snapshot_end(&mut self, status: Result<()>) {
        let Some(mut snap) = self.active_snapshot.take() else {
            return;
        };
        match &status {
            Ok(()) => log::debug!("snapshot completed"),
            Err(err) => log::debug!("snapshot ended: {err}"),
        }

        if let Some(mut fmt) = snap.formatter.take() {
            fmt.close();
        }
        let flushed = snap.flags & FLUSH_DELETIONS != 0;
        let root = snap.root;
        let callback = snap.callback.take();
        drop(snap); // Drops the sink; a pipe reader sees EOF.

        if flushed {
            // Zombies released during the walk may have left empty
            // namespaces behind.
            self.tree.sweep_empty(root);
        }

        self.end_update();
        if let Some(callback) = callback {
            self.defer(move |_| callback(status));
        }
    }
}
