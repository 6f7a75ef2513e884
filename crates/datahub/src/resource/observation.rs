// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Observation state: filter parameters, the FIFO sample ring, and
//! non-volatile buffer backups.
//!
//! An observation throttles and gates the samples passing through it. The
//! acceptance chain runs in a fixed order: minimum period, value range,
//! change-by magnitude. Rejection is silent; it is intermediation, not an
//! error.

use crate::resource::values_equal;
use crate::sample::{wall_clock, DataType, Sample, Value};
use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

/// Filter, buffering and backup state of one observation.
#[derive(Debug)]
pub struct Observation {
    /// Minimum seconds between accepted samples; 0 disables.
    min_period: f64,
    /// Lowest acceptable numeric/boolean value; NaN means unset.
    low_limit: f64,
    /// Highest acceptable numeric/boolean value; NaN means unset.
    high_limit: f64,
    /// Magnitude a new value must differ from the current one; 0 disables.
    change_by: f64,
    /// Ring capacity in samples; 0 disables buffering.
    buffer_max: u32,
    /// Minimum seconds between buffer backups; 0 disables backups.
    backup_period: u32,
    buffer: VecDeque<Rc<Sample>>,
    last_backup: f64,
    backup_dirty: bool,
}

impl Default for Observation {
    fn default() -> Self {
        Self::new()
    }
}

impl Observation {
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_period: 0.0,
            low_limit: f64::NAN,
            high_limit: f64::NAN,
            change_by: 0.0,
            buffer_max: 0,
            backup_period: 0,
            buffer: VecDeque::new(),
            last_backup: 0.0,
            backup_dirty: false,
        }
    }

    pub fn set_min_period(&mut self, seconds: f64) {
        self.min_period = seconds.max(0.0);
    }

    #[must_use]
    pub fn min_period(&self) -> f64 {
        self.min_period
    }

    pub fn set_low_limit(&mut self, limit: f64) {
        self.low_limit = limit;
    }

    #[must_use]
    pub fn low_limit(&self) -> f64 {
        self.low_limit
    }

    pub fn set_high_limit(&mut self, limit: f64) {
        self.high_limit = limit;
    }

    #[must_use]
    pub fn high_limit(&self) -> f64 {
        self.high_limit
    }

    pub fn set_change_by(&mut self, magnitude: f64) {
        self.change_by = magnitude.abs();
    }

    #[must_use]
    pub fn change_by(&self) -> f64 {
        self.change_by
    }

    pub fn set_buffer_max_count(&mut self, count: u32) {
        self.buffer_max = count;
        while self.buffer.len() > count as usize {
            self.buffer.pop_front();
        }
    }

    #[must_use]
    pub fn buffer_max_count(&self) -> u32 {
        self.buffer_max
    }

    pub fn set_backup_period(&mut self, seconds: u32) {
        self.backup_period = seconds;
    }

    #[must_use]
    pub fn backup_period(&self) -> u32 {
        self.backup_period
    }

    /// Buffered samples, oldest first.
    #[must_use]
    pub fn buffered(&self) -> impl Iterator<Item = &Rc<Sample>> {
        self.buffer.iter()
    }

    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.buffer.len()
    }

    /// Run the acceptance chain for a candidate sample.
    ///
    /// The minimum-period gate measures against `current`, the most
    /// recently *accepted* sample; the change-by gate measures against
    /// `previous_pushed`, the most recent arrival whether or not it was
    /// accepted. The two bases differ deliberately: throttling compares
    /// the incoming stream with itself, while the period limits delivered
    /// output.
    #[must_use]
    pub fn accepts(
        &self,
        current: Option<&Sample>,
        previous_pushed: Option<&Sample>,
        candidate: &Sample,
    ) -> bool {
        if self.min_period > 0.0 {
            if let Some(cur) = current {
                if candidate.timestamp() - cur.timestamp() < self.min_period {
                    return false;
                }
            }
        }

        // Range gate, for numeric and boolean candidates.
        if let Some(magnitude) = comparable_magnitude(candidate.value()) {
            if !self.low_limit.is_nan() && magnitude < self.low_limit {
                return false;
            }
            if !self.high_limit.is_nan() && magnitude > self.high_limit {
                return false;
            }
        }

        // Change-by gate; triggers are exempt.
        if self.change_by > 0.0 && candidate.data_type() != DataType::Trigger {
            if let Some(prev) = previous_pushed {
                match (candidate.value().as_f64(), prev.value().as_f64()) {
                    (Some(new), Some(old)) => {
                        if (new - old).abs() < self.change_by {
                            return false;
                        }
                    }
                    // Non-numeric: any configured magnitude means "drop
                    // equal values, accept any change".
                    _ => {
                        if values_equal(candidate.value(), prev.value()) {
                            return false;
                        }
                    }
                }
            }
        }

        true
    }

    /// Append an accepted sample to the ring, dropping the oldest at
    /// capacity.
    pub fn buffer_sample(&mut self, sample: Rc<Sample>) {
        if self.buffer_max == 0 {
            return;
        }
        if self.buffer.len() >= self.buffer_max as usize {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
        self.backup_dirty = true;
    }

    /// Whether a backup should be written now, honouring the backup
    /// period as a rate limit.
    #[must_use]
    pub fn backup_due(&self, now: f64) -> bool {
        self.backup_period > 0
            && self.backup_dirty
            && now - self.last_backup >= f64::from(self.backup_period)
    }

    /// Write the buffered samples to a JSON-lines backup file.
    ///
    /// Failures are reported to the caller for logging; they never fail a
    /// push.
    pub fn write_backup(&mut self, file: &Path) -> std::io::Result<()> {
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut out = BufWriter::new(fs::File::create(file)?);
        for sample in &self.buffer {
            let record = backup_record(sample);
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        self.last_backup = wall_clock();
        self.backup_dirty = false;
        Ok(())
    }

    /// Refill the ring from a JSON-lines backup file, replacing current
    /// contents. Unreadable lines are skipped.
    pub fn restore_backup(&mut self, file: &Path) -> std::io::Result<usize> {
        let reader = std::io::BufReader::new(fs::File::open(file)?);
        self.buffer.clear();
        let mut restored = 0usize;
        for line in reader.lines() {
            let line = line?;
            if let Some(sample) = parse_backup_record(&line) {
                if self.buffer_max > 0 && self.buffer.len() >= self.buffer_max as usize {
                    self.buffer.pop_front();
                }
                self.buffer.push_back(Rc::new(sample));
                restored += 1;
            }
        }
        self.backup_dirty = false;
        Ok(restored)
    }
}

/// Numeric magnitude used by the range gate: the value itself for
/// numerics, 0/1 for booleans, nothing for other types.
fn comparable_magnitude(value: &Value) -> Option<f64> {
    match value {
        Value::Numeric(n) => Some(*n),
        Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn backup_record(sample: &Sample) -> serde_json::Value {
    let value = match sample.value() {
        Value::Trigger => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::from(*b),
        Value::Numeric(n) => serde_json::Value::from(*n),
        Value::String(s) | Value::Json(s) => serde_json::Value::from(s.as_ref()),
    };
    serde_json::json!({
        "ts": sample.timestamp(),
        "type": sample.data_type().as_u32(),
        "value": value,
    })
}

fn parse_backup_record(line: &str) -> Option<Sample> {
    let record: serde_json::Value = serde_json::from_str(line).ok()?;
    let ts = record.get("ts")?.as_f64()?;
    let tag = u32::try_from(record.get("type")?.as_u64()?).ok()?;
    let data_type = DataType::try_from(tag).ok()?;
    let value = record.get("value");
    match data_type {
        DataType::Trigger => Some(Sample::trigger(ts)),
        DataType::Boolean => Some(Sample::boolean(ts, value?.as_bool()?)),
        DataType::Numeric => Some(Sample::numeric(ts, value?.as_f64()?)),
        DataType::String => Sample::string(ts, value?.as_str()?).ok(),
        DataType::Json => Sample::json(ts, value?.as_str()?).ok(),
    }
}
