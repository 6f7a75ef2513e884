// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data Hub administration CLI.
//!
//! The RPC transport is out of scope for the core library, so this tool
//! drives an in-process hub seeded from a JSON state file: the resources
//! to create, the routes to wire, and the samples to replay.
//!
//! # Usage
//!
//! ```bash
//! # List every resource in the seeded hub
//! dhub --seed state.json list
//!
//! # Read one resource
//! dhub --seed state.json get -p /app/sensor/value
//!
//! # Apply an admin setting, then show the result
//! dhub --seed state.json set override -p /app/sensor/value -v 42
//!
//! # Inject a sample and show what the tree accepted
//! dhub --seed state.json push -p /app/sensor/value -v 3.5
//!
//! # Watch deliveries while the seed's samples replay
//! dhub --seed state.json watch -p /obs/sink
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use datahub::{DataHub, DataType, ResourceInfo, Sample, Timestamp, Value};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tabled::{Table, Tabled};

/// Data Hub administration CLI.
#[derive(Parser, Debug)]
#[command(name = "dhub")]
#[command(about = "Data Hub administration CLI")]
#[command(version)]
struct Args {
    /// JSON state file describing the hub to operate on.
    #[arg(short, long)]
    seed: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read one resource.
    Get {
        /// Resource path.
        #[arg(short, long)]
        path: String,
    },

    /// Apply an administrative setting.
    Set {
        #[command(subcommand)]
        setting: Setting,
    },

    /// Inject a sample.
    Push {
        /// Resource path.
        #[arg(short, long)]
        path: String,
        /// Value: a bool, a number, quoted text, or raw JSON.
        #[arg(short, long)]
        value: String,
        /// Explicit timestamp in seconds; defaults to now.
        #[arg(short, long)]
        timestamp: Option<f64>,
    },

    /// List resources under a path.
    List {
        /// Subtree root.
        #[arg(short, long, default_value = "/")]
        path: String,
    },

    /// Watch deliveries to a resource while the seed's samples replay.
    Watch {
        /// Resource path.
        #[arg(short, long)]
        path: String,
    },
}

#[derive(Subcommand, Debug)]
enum Setting {
    /// Install an override value.
    Override {
        #[arg(short, long)]
        path: String,
        #[arg(short, long)]
        value: String,
    },
    /// Set a default value.
    Default {
        #[arg(short, long)]
        path: String,
        #[arg(short, long)]
        value: String,
    },
    /// Route samples from a source (omit --src to clear).
    Source {
        #[arg(short, long)]
        dst: String,
        #[arg(short, long)]
        src: Option<String>,
    },
    /// Minimum seconds between samples accepted by an observation.
    MinPeriod {
        #[arg(short, long)]
        path: String,
        #[arg(short, long)]
        seconds: f64,
    },
    /// Magnitude a new value must differ by to be accepted.
    ChangeBy {
        #[arg(short, long)]
        path: String,
        #[arg(short, long)]
        magnitude: f64,
    },
    /// Lowest value accepted by an observation.
    LowLimit {
        #[arg(short, long)]
        path: String,
        #[arg(short, long)]
        limit: f64,
    },
    /// Highest value accepted by an observation.
    HighLimit {
        #[arg(short, long)]
        path: String,
        #[arg(short, long)]
        limit: f64,
    },
}

// ============================================================================
// Seed file
// ============================================================================

#[derive(Debug, Deserialize)]
struct Seed {
    #[serde(default)]
    resources: Vec<SeedResource>,
    #[serde(default)]
    routes: Vec<SeedRoute>,
    #[serde(default)]
    pushes: Vec<SeedPush>,
}

#[derive(Debug, Deserialize)]
struct SeedResource {
    path: String,
    /// "input", "output" or "observation".
    kind: String,
    #[serde(rename = "type")]
    data_type: Option<String>,
    #[serde(default)]
    units: String,
    min_period: Option<f64>,
    change_by: Option<f64>,
    low_limit: Option<f64>,
    high_limit: Option<f64>,
    buffer_max_count: Option<u32>,
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

fn load_seed(path: &PathBuf) -> Result<Seed, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
    serde_json::from_str(&text).map_err(|err| format!("bad seed file: {err}"))
}

fn sample_from_json(ts: Option<f64>, value: &serde_json::Value) -> Result<Sample, String> {
    let stamp = ts.map_or(Timestamp::Now, Timestamp::At);
    match value {
        serde_json::Value::Null => Ok(Sample::trigger(stamp)),
        serde_json::Value::Bool(b) => Ok(Sample::boolean(stamp, *b)),
        serde_json::Value::Number(n) => {
            let v = n.as_f64().ok_or_else(|| "non-finite number".to_owned())?;
            Ok(Sample::numeric(stamp, v))
        }
        serde_json::Value::String(s) => {
            Sample::string(stamp, s).map_err(|err| err.to_string())
        }
        composite => {
            let text = serde_json::to_string(composite).map_err(|err| err.to_string())?;
            Sample::json(stamp, &text).map_err(|err| err.to_string())
        }
    }
}

/// Parse a CLI value argument: bool, number, raw JSON, or plain text.
fn sample_from_arg(ts: Option<f64>, raw: &str) -> Result<Sample, String> {
    let stamp = ts.map_or(Timestamp::Now, Timestamp::At);
    match raw {
        "true" => return Ok(Sample::boolean(stamp, true)),
        "false" => return Ok(Sample::boolean(stamp, false)),
        _ => {}
    }
    if let Ok(number) = raw.parse::<f64>() {
        return Ok(Sample::numeric(stamp, number));
    }
    if raw.starts_with('{') || raw.starts_with('[') {
        return Sample::json(stamp, raw).map_err(|err| err.to_string());
    }
    Sample::string(stamp, raw).map_err(|err| err.to_string())
}

fn apply_resources(hub: &mut DataHub, seed: &Seed) -> Result<(), String> {
    for res in &seed.resources {
        match res.kind.as_str() {
            "input" | "output" => {
                let data_type =
                    parse_data_type(res.data_type.as_deref().unwrap_or("numeric"))?;
                let result = if res.kind == "input" {
                    hub.create_input(&res.path, data_type, &res.units)
                } else {
                    hub.create_output(&res.path, data_type, &res.units)
                };
                result.map_err(|err| format!("{}: {err}", res.path))?;
            }
            "observation" => {
                hub.create_observation(&res.path)
                    .map_err(|err| format!("{}: {err}", res.path))?;
                if let Some(seconds) = res.min_period {
                    hub.set_min_period(&res.path, seconds)
                        .map_err(|err| format!("{}: {err}", res.path))?;
                }
                if let Some(magnitude) = res.change_by {
                    hub.set_change_by(&res.path, magnitude)
                        .map_err(|err| format!("{}: {err}", res.path))?;
                }
                if let Some(limit) = res.low_limit {
                    hub.set_low_limit(&res.path, limit)
                        .map_err(|err| format!("{}: {err}", res.path))?;
                }
                if let Some(limit) = res.high_limit {
                    hub.set_high_limit(&res.path, limit)
                        .map_err(|err| format!("{}: {err}", res.path))?;
                }
                if let Some(count) = res.buffer_max_count {
                    hub.set_buffer_max_count(&res.path, count)
                        .map_err(|err| format!("{}: {err}", res.path))?;
                }
            }
            other => return Err(format!("{}: unknown kind '{other}'", res.path)),
        }
    }
    for route in &seed.routes {
        hub.set_source(&route.dst, Some(&route.src))
            .map_err(|err| format!("route {} <- {}: {err}", route.dst, route.src))?;
    }
    Ok(())
}

fn apply_pushes(hub: &mut DataHub, seed: &Seed) -> Result<(), String> {
    for push in &seed.pushes {
        let sample = sample_from_json(push.ts, &push.value)?;
        hub.push(&push.path, sample)
            .map_err(|err| format!("push to {}: {err}", push.path))?;
    }
    hub.run_until_idle();
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Type")]
    data_type: String,
    #[tabled(rename = "Units")]
    units: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Source")]
    source: String,
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Trigger => "(trigger)".to_owned(),
        Value::Boolean(b) => b.to_string(),
        Value::Numeric(n) => n.to_string(),
        Value::String(s) | Value::Json(s) => s.to_string(),
    }
}

fn row_for(info: &ResourceInfo) -> ResourceRow {
    let (value, timestamp) = match &info.current {
        Some((ts, value)) => (display_value(value), format!("{ts:.6}")),
        None => ("-".to_owned(), "-".to_owned()),
    };
    ResourceRow {
        path: info.path.clone(),
        kind: format!("{:?}", info.kind),
        data_type: info.data_type.name().to_owned(),
        units: info.units.clone(),
        value,
        timestamp,
        source: info.source.clone().unwrap_or_else(|| "-".to_owned()),
    }
}

fn print_info(info: &ResourceInfo) {
    println!("{}", info.path.as_str().bold());
    println!("  kind:      {:?}", info.kind);
    println!("  type:      {}", info.data_type.name());
    if !info.units.is_empty() {
        println!("  units:     {}", info.units);
    }
    println!("  mandatory: {}", info.mandatory);
    if let Some(source) = &info.source {
        println!("  source:    {source}");
    }
    match &info.current {
        Some((ts, value)) => {
            println!("  value:     {}", display_value(value));
            println!("  ts:        {ts:.6}");
        }
        None => println!("  value:     {}", "(none)".dimmed()),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn run(args: Args) -> Result<(), String> {
    let seed = load_seed(&args.seed)?;
    let mut hub = DataHub::new();
    apply_resources(&mut hub, &seed)?;

    match args.command {
        Command::List { path } => {
            apply_pushes(&mut hub, &seed)?;
            let infos = hub.list(&path).map_err(|err| format!("{path}: {err}"))?;
            if infos.is_empty() {
                println!("no resources under {path}");
            } else {
                let rows: Vec<ResourceRow> = infos.iter().map(row_for).collect();
                println!("{}", Table::new(rows));
            }
        }

        Command::Get { path } => {
            apply_pushes(&mut hub, &seed)?;
            let info = hub.describe(&path).map_err(|err| format!("{path}: {err}"))?;
            print_info(&info);
        }

        Command::Set { setting } => {
            apply_pushes(&mut hub, &seed)?;
            let path = apply_setting(&mut hub, &setting)?;
            println!("{}", "setting applied".green());
            let info = hub.describe(&path).map_err(|err| format!("{path}: {err}"))?;
            print_info(&info);
        }

        Command::Push {
            path,
            value,
            timestamp,
        } => {
            apply_pushes(&mut hub, &seed)?;
            let sample = sample_from_arg(timestamp, &value)?;
            hub.push(&path, sample).map_err(|err| format!("{path}: {err}"))?;
            hub.run_until_idle();
            let info = hub.describe(&path).map_err(|err| format!("{path}: {err}"))?;
            print_info(&info);
        }

        Command::Watch { path } => {
            let watched = path.clone();
            hub.add_push_handler(&path, observed_type(&hub, &path)?, move |ts, value| {
                println!("{} {ts:.6} {}", watched.as_str().cyan(), display_value(value));
            })
            .map_err(|err| format!("{path}: {err}"))?;

            // Replay the seed's samples with the handler attached.
            apply_pushes(&mut hub, &seed)?;
        }
    }
    Ok(())
}

/// Pick the type to watch: the resource's current type, falling back to
/// numeric for untouched resources.
fn observed_type(hub: &DataHub, path: &str) -> Result<DataType, String> {
    let info = hub.describe(path).map_err(|err| format!("{path}: {err}"))?;
    Ok(match info.data_type {
        DataType::Trigger if info.current.is_none() => DataType::Numeric,
        other => other,
    })
}

fn apply_setting(hub: &mut DataHub, setting: &Setting) -> Result<String, String> {
    match setting {
        Setting::Override { path, value } => {
            let sample = sample_from_arg(None, value)?;
            hub.set_override(path, sample)
                .map_err(|err| format!("{path}: {err}"))?;
            Ok(path.clone())
        }
        Setting::Default { path, value } => {
            let sample = sample_from_arg(None, value)?;
            hub.set_default(path, sample)
                .map_err(|err| format!("{path}: {err}"))?;
            Ok(path.clone())
        }
        Setting::Source { dst, src } => {
            hub.set_source(dst, src.as_deref())
                .map_err(|err| format!("{dst}: {err}"))?;
            Ok(dst.clone())
        }
        Setting::MinPeriod { path, seconds } => {
            hub.set_min_period(path, *seconds)
                .map_err(|err| format!("{path}: {err}"))?;
            Ok(path.clone())
        }
        Setting::ChangeBy { path, magnitude } => {
            hub.set_change_by(path, *magnitude)
                .map_err(|err| format!("{path}: {err}"))?;
            Ok(path.clone())
        }
        Setting::LowLimit { path, limit } => {
            hub.set_low_limit(path, *limit)
                .map_err(|err| format!("{path}: {err}"))?;
            Ok(path.clone())
        }
        Setting::HighLimit { path, limit } => {
            hub.set_high_limit(path, *limit)
                .map_err(|err| format!("{path}: {err}"))?;
            Ok(path.clone())
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{} {message}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
