// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The push pipeline: coercion, gating, filtering, acceptance and route
//! fan-out.
//!
//! Every sample entering a resource runs the same strict sequence:
//!
//! 1. scalar JSON extraction, when configured;
//! 2. type coercion against the declared type (inputs/outputs);
//! 3. the units gate (inputs/outputs);
//! 4. override substitution;
//! 5. observation filters (minimum period, range, change-by);
//! 6. acceptance: current value update, handlers in registration order,
//!    then recursion into each destination route;
//! 7. observation buffering and backup scheduling.
//!
//! Steps 1-5 can drop the sample; a drop is silent intermediation, never
//! an error surfaced to the pusher.

use crate::hub::DataHub;
use crate::sample::{format_numeric, wall_clock, DataType, Sample, Value};
use crate::tree::EntryId;
use std::rc::Rc;

impl DataHub {
    /// Deliver a sample to the resource at `id`, then fan out to its
    /// destination routes.
    ///
    /// `units_hint` is empty for direct API pushes; route fan-out passes
    /// the units of the upstream resource.
    pub(crate) fn deliver(&mut self, id: EntryId, units_hint: &str, sample: Rc<Sample>) {
        // Read phase: run the drop/accept decision against an immutable
        // view, cloning out what the write phase needs.
        let Some(entry) = self.tree.get(id) else {
            return;
        };
        let Some(res) = entry.resource.as_ref() else {
            return;
        };

        let mut incoming = sample;

        // 1. Scalar extraction for JSON arrivals, when configured.
        if incoming.data_type() == DataType::Json {
            if let Some(spec) = res.json_extraction() {
                match incoming.extract(spec) {
                    Ok(extracted) => incoming = Rc::new(extracted),
                    Err(err) => {
                        log::debug!("dropping push: extraction '{spec}' failed: {err}");
                        return;
                    }
                }
            }
        }

        if let Some(declared) = res.declared_type() {
            // 2. Coercion against the declared type.
            if incoming.data_type() != declared {
                match coerce(&incoming, declared) {
                    Some(coerced) => incoming = Rc::new(coerced),
                    None => {
                        log::debug!(
                            "dropping push: no coercion from {} to {}",
                            incoming.data_type().name(),
                            declared.name()
                        );
                        return;
                    }
                }
            }

            // 3. Units gate: a non-empty hint must match exactly.
            if !units_hint.is_empty() && units_hint != res.units() {
                log::debug!(
                    "dropping push: units '{units_hint}' do not match '{}'",
                    res.units()
                );
                return;
            }
        }

        // 4. Override substitution keeps the incoming timestamp.
        let accepted = match res.active_override() {
            Some((_, value)) => Rc::new(Sample::from_value(
                incoming.timestamp(),
                value.value().clone(),
            )),
            None => Rc::clone(&incoming),
        };

        // 5. Observation filter chain on the substituted value. The
        // change-by gate compares against the previous arrival, so the
        // incoming sample is recorded as "pushed" even when rejected.
        let rejected = match res.observation() {
            Some(obs) => !obs.accepts(
                res.current().map(|s| s.as_ref()),
                res.pushed().map(|s| s.as_ref()),
                &accepted,
            ),
            None => false,
        };

        let is_observation = res.observation().is_some();
        let fan_out_units = res.units().to_owned();
        let destinations = res.destinations.clone();

        let accepted_type = accepted.data_type();
        {
            let entry = self.tree.entry_mut(id);
            if let Some(res) = entry.resource.as_mut() {
                res.record_pushed(incoming.data_type(), Rc::clone(&incoming));
            }
            if rejected {
                log::debug!(
                    "observation rejected sample at ts {}",
                    accepted.timestamp()
                );
                return;
            }
            // 6. Accept: update state, then handlers, then routes.
            entry.touch();
            if let Some(res) = entry.resource.as_mut() {
                res.set_current(accepted_type, Rc::clone(&accepted));
            }
        }

        self.dispatch_handlers(id, accepted_type, &accepted);

        for dest in destinations {
            self.deliver(dest, &fan_out_units, Rc::clone(&accepted));
        }

        // 7. Observation buffering and backup scheduling.
        if is_observation {
            self.buffer_and_schedule(id, accepted);
        }
    }

    /// Invoke every handler subscribed to `data_type`, in registration
    /// order. Each handler is looked up again right before its call, so a
    /// registration removed mid-dispatch is skipped.
    fn dispatch_handlers(&mut self, id: EntryId, data_type: DataType, sample: &Rc<Sample>) {
        let seqs = match self
            .tree
            .get(id)
            .and_then(|entry| entry.resource.as_ref())
        {
            Some(res) => res.handlers.matching(data_type),
            None => return,
        };
        let timestamp = sample.timestamp();
        for seq in seqs {
            if let Some(res) = self
                .tree
                .get_mut(id)
                .and_then(|entry| entry.resource.as_mut())
            {
                res.handlers.invoke(seq, timestamp, sample.value());
            }
        }
    }

    fn buffer_and_schedule(&mut self, id: EntryId, accepted: Rc<Sample>) {
        let now = wall_clock();
        let due = {
            let Some(obs) = self
                .tree
                .get_mut(id)
                .and_then(|entry| entry.resource.as_mut())
                .and_then(|res| res.observation_mut())
            else {
                return;
            };
            obs.buffer_sample(accepted);
            obs.backup_due(now)
        };
        if due {
            self.defer(move |hub| hub.write_observation_backup(id));
        }
    }

    /// Deferred task: write an observation's ring to its backup file.
    pub(crate) fn write_observation_backup(&mut self, id: EntryId) {
        let file = self.backup_file(id);
        let Some(obs) = self
            .tree
            .get_mut(id)
            .and_then(|entry| entry.resource.as_mut())
            .and_then(|res| res.observation_mut())
        else {
            return; // Observation vanished before the task ran.
        };
        match obs.write_backup(&file) {
            Ok(()) => log::debug!("wrote observation backup {}", file.display()),
            Err(err) => log::warn!("observation backup {} failed: {err}", file.display()),
        }
    }
}

/// Attempt a defined coercion of `sample` to `declared`.
///
/// Supported conversions: anything to trigger (timestamp only), numeric
/// and boolean to/from their textual forms, any scalar to its JSON form,
/// and JSON text holding a bare scalar to that scalar. Everything else
/// drops.
fn coerce(sample: &Sample, declared: DataType) -> Option<Sample> {
    let ts = sample.timestamp();
    match (sample.value(), declared) {
        (_, DataType::Trigger) => Some(Sample::trigger(ts)),
        (Value::Numeric(n), DataType::String) => Sample::string(ts, &format_numeric(*n)).ok(),
        (Value::Boolean(b), DataType::String) => {
            Sample::string(ts, if *b { "true" } else { "false" }).ok()
        }
        (Value::String(s), DataType::Numeric) => {
            s.trim().parse::<f64>().ok().map(|n| Sample::numeric(ts, n))
        }
        (Value::String(s), DataType::Boolean) => match s.trim() {
            "true" => Some(Sample::boolean(ts, true)),
            "false" => Some(Sample::boolean(ts, false)),
            _ => None,
        },
        (Value::Boolean(_) | Value::Numeric(_) | Value::String(_), DataType::Json) => {
            Sample::json(ts, &sample.to_json_text()).ok()
        }
        (Value::Json(s), DataType::Numeric) => {
            s.trim().parse::<f64>().ok().map(|n| Sample::numeric(ts, n))
        }
        (Value::Json(s), DataType::Boolean) => match s.trim() {
            "true" => Some(Sample::boolean(ts, true)),
            "false" => Some(Sample::boolean(ts, false)),
            _ => None,
        },
        (Value::Json(_), DataType::String) => {
            Sample::string(ts, &sample.to_display_string()).ok()
        }
        _ => None,
    }
}
