// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end routing behaviour: relays, fan-out and cycle refusal.

#![allow(clippy::expect_used)]
#![allow(clippy::float_cmp)]
#![allow(clippy::uninlined_format_args)]

use datahub::{DataHub, DataType, Error, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn collect_numeric(log: &Rc<RefCell<Vec<(f64, f64)>>>) -> impl FnMut(f64, &Value) + 'static {
    let log = Rc::clone(log);
    move |ts, value| {
        if let Some(v) = value.as_f64() {
            log.borrow_mut().push((ts, v));
        }
    }
}

#[test]
fn sensor_to_actuator_relay() {
    let mut hub = DataHub::new();
    hub.create_input("/app/s/counter/value", DataType::Numeric, "count")
        .expect("input");
    hub.create_output("/obs/sink", DataType::Numeric, "count")
        .expect("output");
    hub.set_source("/obs/sink", Some("/app/s/counter/value"))
        .expect("route");

    let log = Rc::new(RefCell::new(Vec::new()));
    hub.add_push_handler("/obs/sink", DataType::Numeric, collect_numeric(&log))
        .expect("handler");

    for (ts, v) in [(10.0, 1.0), (11.0, 2.0), (12.0, 3.0)] {
        hub.push_numeric("/app/s/counter/value", ts, v).expect("push");
    }

    assert_eq!(
        log.borrow().as_slice(),
        &[(10.0, 1.0), (11.0, 2.0), (12.0, 3.0)],
        "delivery preserves arrival order and timestamps"
    );
}

#[test]
fn relay_through_observation_chain() {
    let mut hub = DataHub::new();
    hub.create_input("/in", DataType::Numeric, "").expect("input");
    hub.create_observation("/obs/mid").expect("observation");
    hub.create_output("/out", DataType::Numeric, "").expect("output");
    hub.set_source("/obs/mid", Some("/in")).expect("route");
    hub.set_source("/out", Some("/obs/mid")).expect("route");

    let log = Rc::new(RefCell::new(Vec::new()));
    hub.add_push_handler("/out", DataType::Numeric, collect_numeric(&log))
        .expect("handler");

    hub.push_numeric("/in", 1.0, 5.0).expect("push");
    assert_eq!(log.borrow().as_slice(), &[(1.0, 5.0)]);
}

#[test]
fn fan_out_reaches_every_destination() {
    let mut hub = DataHub::new();
    hub.create_input("/src", DataType::Numeric, "").expect("input");
    for dst in ["/d/one", "/d/two", "/d/three"] {
        hub.create_output(dst, DataType::Numeric, "").expect("output");
        hub.set_source(dst, Some("/src")).expect("route");
    }

    hub.push_numeric("/src", 3.0, 7.5).expect("push");

    for dst in ["/d/one", "/d/two", "/d/three"] {
        let info = hub.describe(dst).expect("info");
        let (ts, value) = info.current.expect("delivered");
        assert_eq!((ts, value.as_f64()), (3.0, Some(7.5)), "{dst}");
    }
}

#[test]
fn cycles_are_refused_at_any_length() {
    let mut hub = DataHub::new();
    hub.create_input("/a", DataType::Numeric, "").expect("a");
    hub.create_input("/b", DataType::Numeric, "").expect("b");

    assert!(hub.set_source("/a", Some("/b")).is_ok());
    assert_eq!(hub.set_source("/b", Some("/a")).unwrap_err(), Error::Duplicate);

    // A three-hop loop is caught as well.
    hub.create_input("/c", DataType::Numeric, "").expect("c");
    hub.set_source("/c", Some("/a")).expect("c <- a");
    assert_eq!(hub.set_source("/b", Some("/c")).unwrap_err(), Error::Duplicate);
}

#[test]
fn creation_is_idempotent_and_shape_checked() {
    let mut hub = DataHub::new();
    hub.create_output("/act/level", DataType::Numeric, "percent")
        .expect("create");
    hub.create_output("/act/level", DataType::Numeric, "percent")
        .expect("identical create succeeds");
    assert_eq!(hub.list("/act").expect("list").len(), 1, "one resource");

    assert_eq!(
        hub.create_output("/act/level", DataType::String, "percent")
            .unwrap_err(),
        Error::Duplicate
    );
}

#[test]
fn admin_routes_to_future_resources() {
    let mut hub = DataHub::new();
    // Route configured before either endpoint exists.
    hub.set_source("/sink", Some("/source")).expect("placeholder route");

    hub.create_input("/source", DataType::Numeric, "").expect("input");
    hub.create_output("/sink", DataType::Numeric, "").expect("output");

    let log = Rc::new(RefCell::new(Vec::new()));
    hub.add_push_handler("/sink", DataType::Numeric, collect_numeric(&log))
        .expect("handler");

    hub.push_numeric("/source", 2.0, 11.0).expect("push");
    assert_eq!(log.borrow().as_slice(), &[(2.0, 11.0)]);
}
