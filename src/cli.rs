use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::capabilities::{CapabilityTable, HostOutcome};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::events::{EventCode, EventParams};
use crate::migration;
use crate::script::ScriptSource;
use crate::types::CreateInstanceParams;
use crate::vm::Val;

#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "Strand - run and inspect event-driven script instances", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a compiled script descriptor and drive it with events
    Run {
        /// Path to the descriptor JSON
        descriptor: PathBuf,

        /// Event to post after loading, as `name` or `name=<json array of args>`
        #[arg(short = 'e', long = "event")]
        events: Vec<String>,

        /// How long to wait for the instance to go idle
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Write the instance's state to the state directory before exiting
        #[arg(long)]
        save: bool,
    },

    /// Decode a persisted `.state` file
    Inspect {
        /// Path to the state file
        path: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            descriptor,
            events,
            timeout_ms,
            save,
        } => {
            let config = EngineConfig::builder().config_path(cli.config).build()?;
            let events = events
                .iter()
                .map(|e| parse_event(e))
                .collect::<Result<Vec<_>>>()?;
            run_descriptor(config, &descriptor, events, Duration::from_millis(timeout_ms), save)
        }

        Commands::Inspect { path } => {
            let envelope = migration::read_envelope(&path)
                .with_context(|| format!("Failed to read state file {}", path.display()))?;
            let payload = envelope
                .decode_payload()
                .context("State file holds an undecodable payload")?;
            let out = json!({
                "engine_name": envelope.engine_name,
                "instance_id": envelope.instance_id,
                "script_asset_id": envelope.script_asset_id,
                "saved_at": envelope.saved_at,
                "payload": payload,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }

        Commands::Config => {
            let config = EngineConfig::builder().config_path(cli.config).build()?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn run_descriptor(
    config: EngineConfig,
    descriptor: &Path,
    events: Vec<EventParams>,
    timeout: Duration,
    save: bool,
) -> Result<()> {
    let source = ScriptSource::from_file(descriptor)
        .with_context(|| format!("Failed to read descriptor {}", descriptor.display()))?;
    let engine = Engine::precompiled(config, console_capabilities())?;

    let id = engine
        .load_script(&source, CreateInstanceParams::new(Uuid::new_v4(), &source.asset_id))
        .context("Failed to load script")?;
    for event in events {
        let name = event.event.name();
        if !engine.post_to_instance(id, event)? {
            eprintln!("event {} was dropped", name);
        }
    }

    if !engine.wait_quiescent(timeout) {
        eprintln!("instance still busy after {:?}", timeout);
    }
    let summary = engine.summary(id)?;
    let globals = engine.globals(id)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "instance": summary, "globals": globals }))?
    );

    if save {
        let path = engine.save_state(id)?;
        println!("state saved to {}", path.display());
    }
    engine.shutdown();
    Ok(())
}

/// `say` prints its arguments on stdout
fn console_capabilities() -> CapabilityTable {
    let mut table = CapabilityTable::new();
    table.register_fn("say", |ctx, args| {
        let line: Vec<String> = args.iter().map(|v| v.to_string()).collect();
        println!("[{}] {}", ctx.instance_id, line.join(" "));
        HostOutcome::Value(Val::Null)
    });
    table
}

fn parse_event(arg: &str) -> Result<EventParams> {
    let (name, args) = match arg.split_once('=') {
        Some((name, args)) => (name, Some(args)),
        None => (arg, None),
    };
    let code: EventCode = name.trim().parse()?;
    let args = match args {
        None => Vec::new(),
        Some(text) => match serde_json::from_str::<serde_json::Value>(text)
            .with_context(|| format!("Invalid arguments for event {}", name))?
        {
            serde_json::Value::Array(items) => items.into_iter().map(json_to_val).collect(),
            _ => bail!("Arguments for event {} must be a JSON array", name),
        },
    };
    Ok(EventParams::new(code, args))
}

fn json_to_val(v: serde_json::Value) -> Val {
    use serde_json::Value;
    match v {
        Value::Null => Val::Null,
        Value::Bool(b) => Val::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Val::Int(i),
            None => Val::Float(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => Val::Str(s),
        Value::Array(items) => Val::List(items.into_iter().map(json_to_val).collect()),
        Value::Object(map) => Val::Map(map.into_iter().map(|(k, v)| (k, json_to_val(v))).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn test_parse_event_with_args() {
        let evt = parse_event(r#"link_message=[1, "hi", {"k": 2.5}]"#).unwrap();
        assert_eq!(evt.event, EventCode::LinkMessage);
        assert_eq!(
            evt.args,
            vec![
                Val::Int(1),
                Val::Str("hi".into()),
                Val::Map(btreemap! { "k".to_string() => Val::Float(2.5) }),
            ]
        );
    }

    #[test]
    fn test_parse_event_errors() {
        assert!(parse_event("touch_start").unwrap().args.is_empty());
        assert!(parse_event("teleport").is_err());
        assert!(parse_event("touch_start={}").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["strand", "run", "s.json", "-e", "touch_start", "--save"]);
        match cli.command {
            Commands::Run { events, save, .. } => {
                assert_eq!(events, vec!["touch_start".to_string()]);
                assert!(save);
            }
            _ => panic!("expected run"),
        }
    }
}
