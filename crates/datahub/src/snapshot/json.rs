// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Snapshot formatter producing JSON output.
//!
//! Emits `{"ts":<T>,"root":"<P>","upserted":<tree>[,"deleted":<tree>]}`.
//! The live tree is written in a first pass; if deletion records exist, a
//! second pass with the deleted filter appends the `"deleted"` section.
//!
//! Output is produced through a micro-state machine so that every buffered
//! chunk stays within one sample's worth of text: node names, punctuation
//! and value bodies each drain before the next state runs.

use crate::sample::{format_numeric, DataType};
use crate::snapshot::formatter::{filter, FormatCtx, SnapshotFormatter};
use crate::tree::EntryKind;

/// Internal formatter states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing produced yet.
    Start,
    /// Hand control back to the tree walk.
    SnapshotStep,
    /// Output the node name.
    NodeName,
    /// Output the node opening.
    NodeOpen,
    /// Output the node data fields.
    NodeValues,
    /// Output the node value body (string/JSON types).
    NodeValueBody,
}

/// JSON snapshot formatter.
pub struct JsonFormatter {
    state: State,
    needs_comma: bool,
    is_root: bool,
    scan: bool,
    filter: u32,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Start,
            needs_comma: false,
            is_root: true,
            scan: true,
            filter: filter::LIVE,
        }
    }

    /// Buffer `text`, prepending a comma when the previous item asked for
    /// one.
    fn emit(&mut self, ctx: &mut FormatCtx<'_>, prepend_comma: bool, text: &str) {
        if prepend_comma {
            ctx.write(",");
        }
        ctx.write(text);
    }

    fn node_name(&mut self, ctx: &mut FormatCtx<'_>) {
        let name = ctx.node_name().to_owned();
        log::debug!("output node name: '{name}'");
        self.emit(ctx, false, &name);
        self.needs_comma = false;
        self.state = State::NodeOpen;
    }

    fn node_open(&mut self, ctx: &mut FormatCtx<'_>) {
        // A non-root node is preceded by `"<name>`, so close that off and
        // open the node object.
        let opener = if self.is_root { "{" } else { "\":{" };
        self.emit(ctx, false, opener);
        self.is_root = false;
        self.needs_comma = false;

        let has_values = ctx.node_kind() != EntryKind::Namespace
            && self.filter & filter::LIVE != 0
            && ctx.node_is_timely()
            && ctx.node_current().is_some();
        self.state = if has_values {
            State::NodeValues
        } else {
            // Nothing further on this node; it is only being transited.
            State::SnapshotStep
        };
    }

    fn node_values(&mut self, ctx: &mut FormatCtx<'_>) {
        let Some((data_type, sample)) = ctx.node_current() else {
            self.state = State::SnapshotStep;
            return;
        };
        let fields = format!(
            "\"type\":{},\"ts\":{},\"mandatory\":{},\"new\":{}",
            data_type.as_u32(),
            format_numeric(sample.timestamp()),
            ctx.node_is_mandatory(),
            ctx.node_is_new(),
        );
        self.emit(ctx, false, &fields);
        self.needs_comma = true;

        match data_type {
            DataType::Trigger => self.state = State::SnapshotStep,
            DataType::Boolean | DataType::Numeric => {
                self.emit(ctx, true, "\"value\":");
                ctx.write(&sample.to_json_text());
                self.needs_comma = true;
                self.state = State::SnapshotStep;
            }
            DataType::String | DataType::Json => {
                // The body may be a full sample string; give it its own
                // buffered write.
                self.emit(ctx, true, "\"value\":");
                self.needs_comma = false;
                self.state = State::NodeValueBody;
            }
        }
    }

    fn node_value_body(&mut self, ctx: &mut FormatCtx<'_>) {
        if let Some((_, sample)) = ctx.node_current() {
            let body = sample.to_json_text();
            self.emit(ctx, false, &body);
        }
        self.needs_comma = true;
        self.state = State::SnapshotStep;
    }
}

impl SnapshotFormatter for JsonFormatter {
    fn start_tree(&mut self, ctx: &mut FormatCtx<'_>) {
        debug_assert!(self.filter & filter::ALL != 0);
        log::debug!("starting tree pass");

        if self.filter & filter::LIVE != 0 {
            let header = format!(
                "{{\"ts\":{},\"root\":\"{}\",\"upserted\":",
                format_numeric(ctx.timestamp()),
                ctx.root_path(),
            );
            self.emit(ctx, false, &header);
        } else {
            self.emit(ctx, true, "\"deleted\":");
        }

        self.is_root = true;
        self.state = State::SnapshotStep;
    }

    fn begin_node(&mut self, ctx: &mut FormatCtx<'_>) {
        if self.is_root {
            // The root node never has additional properties; open it
            // directly, with no output to drain first.
            self.needs_comma = false;
            self.state = State::NodeOpen;
        } else {
            let comma = self.needs_comma;
            self.emit(ctx, comma, "\"");
            self.state = State::NodeName;
        }
    }

    fn end_node(&mut self, ctx: &mut FormatCtx<'_>) {
        log::debug!("closing node object");
        self.emit(ctx, false, "}");
        self.needs_comma = true;
        self.state = State::SnapshotStep;
    }

    fn end_tree(&mut self, ctx: &mut FormatCtx<'_>) {
        log::debug!("closing tree pass");
        self.state = State::SnapshotStep;

        // After the live pass, append a deleted section when there is
        // anything to report.
        let live_pass = self.filter & filter::LIVE != 0;
        if live_pass && ctx.has_deletion_records() {
            self.scan = true;
            self.filter = filter::DELETED;
            self.needs_comma = true;
            // No output here; the walk restarts directly.
        } else {
            self.scan = false;
            self.emit(ctx, false, "}");
            self.needs_comma = false;
        }
    }

    fn resume(&mut self, ctx: &mut FormatCtx<'_>) {
        match self.state {
            State::Start => unreachable!("formatter resumed before start"),
            State::SnapshotStep => ctx.request_step(),
            State::NodeName => self.node_name(ctx),
            State::NodeOpen => self.node_open(ctx),
            State::NodeValues => self.node_values(ctx),
            State::NodeValueBody => self.node_value_body(ctx),
        }
    }

    fn close(&mut self) {
        log::debug!("closing JSON formatter");
    }

    fn scan(&self) -> bool {
        self.scan
    }

    fn filter(&self) -> u32 {
        self.filter
    }
}
