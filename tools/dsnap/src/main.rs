// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data Hub snapshot CLI.
//!
//! Seeds an in-process hub from a JSON state file, requests a snapshot
//! through the real pipe transport, and copies the encoded stream to a
//! file or stdout. The reader side runs on its own thread, playing the
//! remote consumer.
//!
//! # Usage
//!
//! ```bash
//! dsnap --seed state.json                       # full tree to stdout
//! dsnap --seed state.json -p /app -s 1700000000 # subtree, incremental
//! dsnap --seed state.json -o snap.json          # to a file
//! dsnap --seed state.json --flush-deletions     # drop deletion records
//! ```

use clap::Parser;
use colored::Colorize;
use datahub::snapshot::{SnapshotRequest, FLUSH_DELETIONS};
use datahub::{DataHub, DataType, Error, Sample, Timestamp};
use serde::Deserialize;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

/// Data Hub snapshot CLI.
#[derive(Parser, Debug)]
#[command(name = "dsnap")]
#[command(about = "Stream a Data Hub tree snapshot")]
#[command(version)]
struct Args {
    /// JSON state file describing the hub to snapshot.
    #[arg(long)]
    seed: PathBuf,

    /// Snapshot output format.
    #[arg(short, long, default_value = "json")]
    format: String,

    /// Only include entries modified after this time stamp (seconds).
    #[arg(short, long, default_value_t = 0.0)]
    since: f64,

    /// Subtree to capture.
    #[arg(short, long, default_value = "/")]
    path: String,

    /// Output file; stdout if omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Flush deletion records once they have been reported.
    #[arg(long)]
    flush_deletions: bool,
}

#[derive(Debug, Deserialize)]
struct Seed {
    #[serde(default)]
    resources: Vec<SeedResource>,
    #[serde(default)]
    routes: Vec<SeedRoute>,
    #[serde(default)]
    pushes: Vec<SeedPush>,
    /// Paths deleted after the pushes replay; enables deletion tracking.
    #[serde(default)]
    deletes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SeedResource {
    path: String,
    kind: String,
    #[serde(rename = "type")]
    data_type: Option<String>,
    #[serde(default)]
    units: String,
}

#[derive(Debug, Deserialize)]
struct SeedRoute {
    dst: String,
    src: String,
}

#[derive(Debug, Deserialize)]
struct SeedPush {
    path: String,
    ts: Option<f64>,
    value: serde_json::Value,
}

fn parse_data_type(name: &str) -> Result<DataType, String> {
    match name {
        "trigger" => Ok(DataType::Trigger),
        "boolean" => Ok(DataType::Boolean),
        "numeric" => Ok(DataType::Numeric),
        "string" => Ok(DataType::String),
        "json" => Ok(DataType::Json),
        other => Err(format!("unknown data type '{other}'")),
    }
}

fn build_hub(seed: &Seed) -> Result<DataHub, String> {
    let mut hub = DataHub::new();
    if !seed.deletes.is_empty() {
        hub.track_deletions(true);
    }

    for res in &seed.resources {
        let result = match res.kind.as_str() {
            "input" => hub.create_input(
                &res.path,
                parse_data_type(res.data_type.as_deref().unwrap_or("numeric"))?,
                &res.units,
            ),
            "output" => hub.create_output(
                &res.path,
                parse_data_type(res.data_type.as_deref().unwrap_or("numeric"))?,
                &res.units,
            ),
            "observation" => hub.create_observation(&res.path),
            other => return Err(format!("{}: unknown kind '{other}'", res.path)),
        };
        result.map_err(|err| format!("{}: {err}", res.path))?;
    }

    for route in &seed.routes {
        hub.set_source(&route.dst, Some(&route.src))
            .map_err(|err| format!("route {} <- {}: {err}", route.dst, route.src))?;
    }

    for push in &seed.pushes {
        let stamp = push.ts.map_or(Timestamp::Now, Timestamp::At);
        let sample = match &push.value {
            serde_json::Value::Null => Sample::trigger(stamp),
            serde_json::Value::Bool(b) => Sample::boolean(stamp, *b),
            serde_json::Value::Number(n) => {
                Sample::numeric(stamp, n.as_f64().unwrap_or(f64::NAN))
            }
            serde_json::Value::String(s) => {
                Sample::string(stamp, s).map_err(|err| err.to_string())?
            }
            composite => {
                let text =
                    serde_json::to_string(composite).map_err(|err| err.to_string())?;
                Sample::json(stamp, &text).map_err(|err| err.to_string())?
            }
        };
        hub.push(&push.path, sample)
            .map_err(|err| format!("push to {}: {err}", push.path))?;
    }

    for path in &seed.deletes {
        hub.delete_resource(path)
            .map_err(|err| format!("delete {path}: {err}"))?;
    }

    hub.run_until_idle();
    Ok(hub)
}

fn run(args: &Args) -> Result<(), String> {
    let text = std::fs::read_to_string(&args.seed)
        .map_err(|err| format!("cannot read {}: {err}", args.seed.display()))?;
    let seed: Seed = serde_json::from_str(&text).map_err(|err| format!("bad seed file: {err}"))?;
    let mut hub = build_hub(&seed)?;

    let request = SnapshotRequest {
        format: datahub::SnapshotFormat::from_name(&args.format)
            .map_err(|err| format!("{}: {err}", args.format))?,
        flags: if args.flush_deletions { FLUSH_DELETIONS } else { 0 },
        root: args.path.clone(),
        since: args.since,
    };

    let status: Rc<RefCell<Option<Result<(), Error>>>> = Rc::new(RefCell::new(None));
    let status_out = Rc::clone(&status);
    let reader = hub
        .take_snapshot(&request, move |result| {
            *status_out.borrow_mut() = Some(result);
        })
        .ok_or_else(|| "snapshot stream could not be created".to_owned())?;

    // The consumer thread copies the stream until EOF.
    let output = args.output.clone();
    let consumer = std::thread::spawn(move || -> Result<(), String> {
        let mut reader = reader;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|err| format!("stream read failed: {err}"))?;
        match output {
            Some(file) => std::fs::write(&file, &bytes)
                .map_err(|err| format!("cannot write {}: {err}", file.display())),
            None => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                out.write_all(&bytes)
                    .and_then(|()| out.write_all(b"\n"))
                    .map_err(|err| format!("stdout write failed: {err}"))
            }
        }
    });

    hub.run_until_idle();
    let result = status
        .borrow_mut()
        .take()
        .ok_or_else(|| "snapshot never completed".to_owned())?;

    consumer
        .join()
        .map_err(|_| "consumer thread panicked".to_owned())??;

    match result {
        Ok(()) => Ok(()),
        Err(Error::Busy) => {
            eprintln!("{} another snapshot is in progress", "warning:".yellow().bold());
            Err("busy".to_owned())
        }
        Err(err) => Err(err.to_string()),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{} {message}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
