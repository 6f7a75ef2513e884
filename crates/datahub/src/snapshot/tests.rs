// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::expect_used)]
#![allow(clippy::float_cmp)]

use super::{filter, FormatCtx, MemorySink, SnapshotFormatter, SnapshotRequest, FLUSH_DELETIONS};
use crate::sample::DataType;
use crate::{DataHub, Error};
use std::cell::RefCell;
use std::rc::Rc;

/// Run a snapshot to completion against a memory sink, returning the
/// streamed text and the completion status.
fn run_snapshot(hub: &mut DataHub, request: &SnapshotRequest) -> (String, crate::Result<()>) {
    run_snapshot_with(hub, request, MemorySink::new())
}

fn run_snapshot_with(
    hub: &mut DataHub,
    request: &SnapshotRequest,
    sink: MemorySink,
) -> (String, crate::Result<()>) {
    let handle = sink.handle();
    let status = Rc::new(RefCell::new(None));
    let status_out = Rc::clone(&status);
    hub.take_snapshot_with_sink(request, Box::new(sink), move |result| {
        *status_out.borrow_mut() = Some(result);
    });
    hub.run_until_idle();
    let result = status.borrow_mut().take().expect("callback fired");
    (handle.text(), result)
}

fn parse(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|err| panic!("invalid JSON ({err}): {text}"))
}

#[test]
fn snapshot_of_live_tree() {
    let mut hub = DataHub::new();
    hub.create_input("/a/b", DataType::Numeric, "").expect("input");
    hub.create_input("/a/c", DataType::Boolean, "").expect("input");
    hub.push_numeric("/a/b", 7.0, 2.5).expect("push");
    hub.push_boolean("/a/c", 8.0, true).expect("push");

    let (text, status) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert_eq!(status, Ok(()));

    let doc = parse(&text);
    assert_eq!(doc["root"], "/");
    assert!(doc["ts"].is_number());

    let b = &doc["upserted"]["a"]["b"];
    assert_eq!(b["type"], 2);
    assert_eq!(b["ts"], 7.0);
    assert_eq!(b["mandatory"], false);
    assert_eq!(b["new"], true);
    assert_eq!(b["value"], 2.5);

    let c = &doc["upserted"]["a"]["c"];
    assert_eq!(c["type"], 1);
    assert_eq!(c["value"], true);

    assert!(
        doc.get("deleted").is_none(),
        "no deleted section without deletion records"
    );
}

#[test]
fn snapshot_rooted_at_subtree() {
    let mut hub = DataHub::new();
    hub.create_input("/a/b", DataType::Numeric, "").expect("input");
    hub.create_input("/other/x", DataType::Numeric, "").expect("input");
    hub.push_numeric("/a/b", 1.0, 3.0).expect("push");

    let (text, status) = run_snapshot(&mut hub, &SnapshotRequest::new("/a"));
    assert_eq!(status, Ok(()));

    let doc = parse(&text);
    assert_eq!(doc["root"], "/a");
    assert!(doc["upserted"]["b"].is_object());
    assert!(doc["upserted"].get("other").is_none());
}

#[test]
fn string_values_are_escaped_on_the_wire() {
    let mut hub = DataHub::new();
    hub.create_input("/s", DataType::String, "").expect("input");
    hub.push_string("/s", 1.0, "say \"hi\"\n").expect("push");

    let (text, status) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert_eq!(status, Ok(()));
    assert!(text.contains("\"value\":\"say \\\"hi\\\"\\n\""));

    let doc = parse(&text);
    assert_eq!(doc["upserted"]["s"]["value"], "say \"hi\"\n");
}

#[test]
fn json_values_are_embedded_verbatim() {
    let mut hub = DataHub::new();
    hub.create_input("/j", DataType::Json, "").expect("input");
    hub.push_json("/j", 1.0, "{\"k\":[1,2]}").expect("push");

    let (text, status) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert_eq!(status, Ok(()));

    let doc = parse(&text);
    assert_eq!(doc["upserted"]["j"]["value"]["k"][0], 1);
}

#[test]
fn trigger_resources_have_no_value_field() {
    let mut hub = DataHub::new();
    hub.create_input("/t", DataType::Trigger, "").expect("input");
    hub.push_trigger("/t", 4.0).expect("push");

    let (text, status) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert_eq!(status, Ok(()));

    let doc = parse(&text);
    let t = &doc["upserted"]["t"];
    assert_eq!(t["type"], 0);
    assert!(t.get("value").is_none());
}

#[test]
fn mandatory_flag_is_reported() {
    let mut hub = DataHub::new();
    hub.create_output("/m", DataType::Numeric, "").expect("output");
    hub.set_mandatory("/m", true).expect("mark");
    hub.push_numeric("/m", 1.0, 0.5).expect("push");

    let (text, _) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    let doc = parse(&text);
    assert_eq!(doc["upserted"]["m"]["mandatory"], true);
}

#[test]
fn newness_is_cleared_by_a_completed_snapshot() {
    let mut hub = DataHub::new();
    hub.create_input("/n", DataType::Numeric, "").expect("input");
    hub.push_numeric("/n", 1.0, 1.0).expect("push");

    let (text, _) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert_eq!(parse(&text)["upserted"]["n"]["new"], true);

    let (text, _) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert_eq!(parse(&text)["upserted"]["n"]["new"], false);
}

#[test]
fn since_filters_unmodified_entries() {
    let mut hub = DataHub::new();
    hub.create_input("/quiet", DataType::Numeric, "").expect("input");
    hub.push_numeric("/quiet", 1.0, 1.0).expect("push");

    // First snapshot consumes the newness.
    let (_, status) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert_eq!(status, Ok(()));

    // With a future time stamp nothing is timely and nothing is new.
    let mut request = SnapshotRequest::new("/");
    request.since = crate::sample::wall_clock() + 3600.0;
    let (text, status) = run_snapshot(&mut hub, &request);
    assert_eq!(status, Ok(()));

    let doc = parse(&text);
    assert_eq!(doc["upserted"], serde_json::json!({}));
}

#[test]
fn value_pushes_during_snapshot_are_reflected() {
    let mut hub = DataHub::new();
    hub.create_input("/live", DataType::Numeric, "").expect("input");
    hub.push_numeric("/live", 1.0, 1.0).expect("push");

    let sink = MemorySink::new();
    let handle = sink.handle();
    let done = Rc::new(RefCell::new(None));
    let done_out = Rc::clone(&done);
    hub.take_snapshot_with_sink(
        &SnapshotRequest::new("/"),
        Box::new(sink),
        move |result| *done_out.borrow_mut() = Some(result),
    );

    // The walk has not reached /live yet; a push in between is live.
    hub.push_numeric("/live", 2.0, 9.0).expect("push");
    hub.run_until_idle();

    assert_eq!(done.borrow_mut().take(), Some(Ok(())));
    let doc = parse(&handle.text());
    assert_eq!(doc["upserted"]["live"]["value"], 9.0);
    assert_eq!(doc["upserted"]["live"]["ts"], 2.0);
}

#[test]
fn structural_changes_during_snapshot_are_deferred() {
    let mut hub = DataHub::new();
    hub.create_input("/before", DataType::Numeric, "").expect("input");

    let sink = MemorySink::new();
    let handle = sink.handle();
    let done = Rc::new(RefCell::new(None));
    let done_out = Rc::clone(&done);
    hub.take_snapshot_with_sink(
        &SnapshotRequest::new("/"),
        Box::new(sink),
        move |result| *done_out.borrow_mut() = Some(result),
    );

    // Mid-snapshot creation succeeds but is applied only afterwards.
    hub.create_input("/during", DataType::Numeric, "").expect("deferred create");
    hub.run_until_idle();

    assert_eq!(done.borrow_mut().take(), Some(Ok(())));
    let doc = parse(&handle.text());
    assert!(doc["upserted"].get("during").is_none());
    assert!(hub.describe("/during").is_ok(), "replayed after resume");
}

#[test]
fn busy_while_snapshot_in_progress() {
    let mut hub = DataHub::new();
    hub.create_input("/x", DataType::Numeric, "").expect("input");

    let first = Rc::new(RefCell::new(None));
    let first_out = Rc::clone(&first);
    hub.take_snapshot_with_sink(
        &SnapshotRequest::new("/"),
        Box::new(MemorySink::new()),
        move |result| *first_out.borrow_mut() = Some(result),
    );

    let second = Rc::new(RefCell::new(None));
    let second_out = Rc::clone(&second);
    hub.take_snapshot_with_sink(
        &SnapshotRequest::new("/"),
        Box::new(MemorySink::new()),
        move |result| *second_out.borrow_mut() = Some(result),
    );

    hub.run_until_idle();
    assert_eq!(first.borrow_mut().take(), Some(Ok(())));
    assert_eq!(second.borrow_mut().take(), Some(Err(Error::Busy)));
}

#[test]
fn unknown_root_reports_not_found() {
    let mut hub = DataHub::new();
    let (text, status) = run_snapshot(&mut hub, &SnapshotRequest::new("/missing"));
    assert_eq!(status, Err(Error::NotFound));
    assert!(text.is_empty());
}

#[test]
fn backpressure_produces_identical_structure() {
    let mut hub = DataHub::new();
    hub.create_input("/p/a", DataType::Numeric, "").expect("input");
    hub.create_input("/p/b", DataType::String, "").expect("input");
    hub.push_numeric("/p/a", 1.0, 4.5).expect("push");
    hub.push_string("/p/b", 2.0, "chunked text value").expect("push");

    // 5-byte chunks with a WouldBlock on every third write.
    let sink = MemorySink::with_backpressure(5, 3);
    let (text, status) = run_snapshot_with(&mut hub, &SnapshotRequest::new("/"), sink);
    assert_eq!(status, Ok(()));

    let doc = parse(&text);
    assert_eq!(doc["upserted"]["p"]["a"]["value"], 4.5);
    assert_eq!(doc["upserted"]["p"]["b"]["value"], "chunked text value");
}

#[test]
fn deletion_tracking_reports_and_flushes() {
    let mut hub = DataHub::new();
    hub.track_deletions(true);
    hub.create_input("/app/z", DataType::Numeric, "").expect("input");
    hub.push_numeric("/app/z", 1.0, 1.0).expect("push");
    hub.delete_resource("/app/z").expect("delete");

    // First snapshot reports the deletion.
    let (text, status) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert_eq!(status, Ok(()));
    let doc = parse(&text);
    assert!(doc["deleted"]["app"]["z"].is_object());

    // A second snapshot with default flags still reports it.
    let (text, _) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert!(parse(&text)["deleted"]["app"]["z"].is_object());

    // Flushing reports it one last time and releases the record.
    let mut request = SnapshotRequest::new("/");
    request.flags = FLUSH_DELETIONS;
    let (text, status) = run_snapshot(&mut hub, &request);
    assert_eq!(status, Ok(()));
    assert!(parse(&text)["deleted"]["app"]["z"].is_object());

    // Gone now.
    let (text, status) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert_eq!(status, Ok(()));
    assert!(parse(&text).get("deleted").is_none());
    assert_eq!(hub.tree().deletion_records(), 0);
}

#[test]
fn disabling_tracking_flushes_records() {
    let mut hub = DataHub::new();
    hub.track_deletions(true);
    hub.create_input("/gone", DataType::Numeric, "").expect("input");
    hub.delete_resource("/gone").expect("delete");
    assert_eq!(hub.tree().deletion_records(), 1);

    hub.track_deletions(false);
    assert_eq!(hub.tree().deletion_records(), 0);
}

#[test]
fn untracked_deletions_never_appear() {
    let mut hub = DataHub::new();
    hub.create_input("/tmp/x", DataType::Numeric, "").expect("input");
    hub.delete_resource("/tmp/x").expect("delete");

    let (text, _) = run_snapshot(&mut hub, &SnapshotRequest::new("/"));
    assert!(parse(&text).get("deleted").is_none());
}

/// Formatter that endlessly requests another pass; used to verify the
/// pass-limit backstop.
struct ScanForever {
    passes: Rc<RefCell<u32>>,
}

impl SnapshotFormatter for ScanForever {
    fn start_tree(&mut self, ctx: &mut FormatCtx<'_>) {
        *self.passes.borrow_mut() += 1;
        ctx.request_step();
    }

    fn begin_node(&mut self, ctx: &mut FormatCtx<'_>) {
        ctx.request_step();
    }

    fn end_node(&mut self, ctx: &mut FormatCtx<'_>) {
        ctx.request_step();
    }

    fn end_tree(&mut self, ctx: &mut FormatCtx<'_>) {
        ctx.request_step();
    }

    fn resume(&mut self, ctx: &mut FormatCtx<'_>) {
        ctx.request_step();
    }

    fn close(&mut self) {}

    fn scan(&self) -> bool {
        true
    }

    fn filter(&self) -> u32 {
        filter::LIVE
    }
}

#[test]
fn pass_limit_ends_with_out_of_range() {
    let mut hub = DataHub::new();
    hub.create_input("/x", DataType::Numeric, "").expect("input");

    let passes = Rc::new(RefCell::new(0u32));
    let formatter = Box::new(ScanForever {
        passes: Rc::clone(&passes),
    });

    let status = Rc::new(RefCell::new(None));
    let status_out = Rc::clone(&status);
    hub.snapshot_begin(
        &SnapshotRequest::new("/"),
        formatter,
        Box::new(MemorySink::new()),
        Box::new(move |result| *status_out.borrow_mut() = Some(result)),
    );
    hub.run_until_idle();

    assert_eq!(status.borrow_mut().take(), Some(Err(Error::OutOfRange)));
    assert_eq!(*passes.borrow(), 10, "exactly ten passes are conducted");
}

#[cfg(unix)]
mod pipe {
    use super::*;
    use std::io::Read;

    #[test]
    fn snapshot_streams_through_a_real_pipe() {
        let mut hub = DataHub::new();
        hub.create_input("/pipe/v", DataType::Numeric, "").expect("input");
        hub.push_numeric("/pipe/v", 1.0, 6.25).expect("push");

        let status = Rc::new(RefCell::new(None));
        let status_out = Rc::clone(&status);
        let reader = hub
            .take_snapshot(&SnapshotRequest::new("/"), move |result| {
                *status_out.borrow_mut() = Some(result);
            })
            .expect("pipe created");

        // The reader side plays the remote consumer on its own thread.
        let consumer = std::thread::spawn(move || {
            let mut reader = reader;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).expect("read to EOF");
            bytes
        });

        hub.run_until_idle();
        assert_eq!(status.borrow_mut().take(), Some(Ok(())));

        let bytes = consumer.join().expect("consumer thread");
        let doc: serde_json::Value =
            serde_json::from_slice(&bytes).expect("well-formed stream");
        assert_eq!(doc["upserted"]["pipe"]["v"]["value"], 6.25);
    }

    #[test]
    fn dropped_reader_ends_with_closed() {
        let mut hub = DataHub::new();
        hub.create_input("/x", DataType::Numeric, "").expect("input");

        let status = Rc::new(RefCell::new(None));
        let status_out = Rc::clone(&status);
        let reader = hub.take_snapshot(&SnapshotRequest::new("/"), move |result| {
            *status_out.borrow_mut() = Some(result);
        });
        drop(reader);

        hub.run_until_idle();
        assert_eq!(status.borrow_mut().take(), Some(Err(Error::Closed)));
    }
}
