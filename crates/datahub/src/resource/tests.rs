// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::expect_used)]
#![allow(clippy::float_cmp)]

use super::{Observation, Resource};
use crate::sample::{DataType, Sample};
use std::rc::Rc;

fn num(ts: f64, v: f64) -> Rc<Sample> {
    Rc::new(Sample::numeric(ts, v))
}

#[test]
fn declared_type_is_fixed_for_io() {
    let input = Resource::new_input(DataType::Numeric, "degC");
    assert_eq!(input.declared_type(), Some(DataType::Numeric));
    assert_eq!(input.current_type(), DataType::Numeric);
    assert_eq!(input.units(), "degC");

    let obs = Resource::new_observation();
    assert_eq!(obs.declared_type(), None);
    assert_eq!(obs.current_type(), DataType::Trigger);
}

#[test]
fn mismatched_override_is_retained_but_inactive() {
    let mut input = Resource::new_input(DataType::Numeric, "");
    input.set_override(DataType::Boolean, Rc::new(Sample::boolean(0.0, true)));
    assert!(!input.is_overridden());

    input.set_override(DataType::Numeric, num(0.0, 42.0));
    assert!(input.is_overridden());
    let (ty, value) = input.active_override().expect("active");
    assert_eq!(ty, DataType::Numeric);
    assert_eq!(value.value().as_f64(), Some(42.0));
}

#[test]
fn observation_accepts_any_override_type() {
    let mut obs = Resource::new_observation();
    obs.set_override(DataType::Boolean, Rc::new(Sample::boolean(0.0, true)));
    assert!(obs.is_overridden());
}

#[test]
fn mismatched_default_is_inactive() {
    let mut output = Resource::new_output(DataType::Boolean, "");
    output.set_default(DataType::Numeric, num(0.0, 1.0));
    assert!(output.has_default());
    assert!(output.active_default().is_none());
}

#[test]
fn admin_settings_move_between_resources() {
    let mut placeholder = Resource::new_placeholder();
    placeholder.set_override(DataType::Numeric, num(0.0, 9.0));
    placeholder.set_json_extraction(Some("x.y".to_owned()));
    placeholder.set_mandatory(true);
    assert!(placeholder.has_admin_settings());

    let mut input = Resource::new_input(DataType::Numeric, "");
    input.adopt_admin_settings(&mut placeholder);

    assert!(!placeholder.has_admin_settings());
    assert!(input.is_overridden());
    assert_eq!(input.json_extraction(), Some("x.y"));
    assert!(input.is_mandatory());
}

#[test]
fn min_period_throttles() {
    let mut obs = Observation::new();
    obs.set_min_period(1.0);

    let current = Sample::numeric(10.0, 5.0);

    assert!(!obs.accepts(Some(&current), None, &Sample::numeric(10.5, 6.0)));
    assert!(obs.accepts(Some(&current), None, &Sample::numeric(11.0, 6.0)));
    // No accepted value yet: always timely.
    assert!(obs.accepts(None, None, &Sample::numeric(0.0, 6.0)));
}

#[test]
fn range_gate_with_unset_limits() {
    let mut obs = Observation::new();
    assert!(obs.accepts(None, None, &Sample::numeric(0.0, 1e9)));

    obs.set_low_limit(0.0);
    obs.set_high_limit(10.0);
    assert!(!obs.accepts(None, None, &Sample::numeric(0.0, -0.1)));
    assert!(!obs.accepts(None, None, &Sample::numeric(0.0, 10.1)));
    assert!(obs.accepts(None, None, &Sample::numeric(0.0, 10.0)));

    // Booleans compare as 0/1.
    assert!(obs.accepts(None, None, &Sample::boolean(0.0, true)));
    obs.set_low_limit(0.5);
    assert!(!obs.accepts(None, None, &Sample::boolean(0.0, false)));

    // Strings pass the range gate untouched.
    let text = Sample::string(0.0, "out of range").expect("fits");
    assert!(obs.accepts(None, None, &text));
}

#[test]
fn change_by_compares_against_last_arrival() {
    let mut obs = Observation::new();
    obs.set_change_by(0.5);

    let pushed = Sample::numeric(0.0, 10.0);

    assert!(!obs.accepts(None, Some(&pushed), &Sample::numeric(1.0, 10.2)));
    assert!(obs.accepts(None, Some(&pushed), &Sample::numeric(1.0, 10.5)));
    assert!(obs.accepts(None, Some(&pushed), &Sample::numeric(1.0, 9.4)));
    // First arrival is always a change.
    assert!(obs.accepts(None, None, &Sample::numeric(1.0, 10.0)));
}

#[test]
fn change_by_equality_for_strings() {
    let mut obs = Observation::new();
    obs.set_change_by(1.0);

    let pushed = Sample::string(0.0, "same").expect("fits");

    let equal = Sample::string(1.0, "same").expect("fits");
    let different = Sample::string(1.0, "other").expect("fits");
    assert!(!obs.accepts(None, Some(&pushed), &equal));
    assert!(obs.accepts(None, Some(&pushed), &different));
}

#[test]
fn ring_buffer_drops_oldest() {
    let mut obs = Observation::new();
    obs.set_buffer_max_count(3);

    for i in 0..5 {
        obs.buffer_sample(num(f64::from(i), f64::from(i)));
    }
    assert_eq!(obs.buffered_count(), 3);

    let values: Vec<f64> = obs
        .buffered()
        .filter_map(|s| s.value().as_f64())
        .collect();
    assert_eq!(values, vec![2.0, 3.0, 4.0]);
}

#[test]
fn shrinking_buffer_discards_oldest() {
    let mut obs = Observation::new();
    obs.set_buffer_max_count(4);
    for i in 0..4 {
        obs.buffer_sample(num(f64::from(i), f64::from(i)));
    }
    obs.set_buffer_max_count(2);
    let values: Vec<f64> = obs
        .buffered()
        .filter_map(|s| s.value().as_f64())
        .collect();
    assert_eq!(values, vec![2.0, 3.0]);
}

#[test]
fn backup_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("obs.test.jsonl");

    let mut obs = Observation::new();
    obs.set_buffer_max_count(10);
    obs.set_backup_period(1);
    obs.buffer_sample(num(1.0, 1.5));
    obs.buffer_sample(Rc::new(Sample::boolean(2.0, true)));
    obs.buffer_sample(Rc::new(Sample::string(3.0, "txt").expect("fits")));

    obs.write_backup(&file).expect("backup written");

    let mut restored = Observation::new();
    restored.set_buffer_max_count(10);
    let count = restored.restore_backup(&file).expect("restored");
    assert_eq!(count, 3);

    let kinds: Vec<DataType> = restored.buffered().map(|s| s.data_type()).collect();
    assert_eq!(
        kinds,
        vec![DataType::Numeric, DataType::Boolean, DataType::String]
    );
    let first = restored.buffered().next().expect("first");
    assert_eq!(first.timestamp(), 1.0);
    assert_eq!(first.value().as_f64(), Some(1.5));
}

#[test]
fn backup_rate_limited_by_period() {
    let mut obs = Observation::new();
    obs.set_buffer_max_count(2);
    assert!(!obs.backup_due(100.0), "no period configured");

    obs.set_backup_period(10);
    assert!(!obs.backup_due(100.0), "nothing buffered yet");

    obs.buffer_sample(num(1.0, 1.0));
    assert!(obs.backup_due(100.0), "dirty and never backed up");
}
