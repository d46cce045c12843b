use anyhow::{anyhow, Context};
use scrum_core::command::METHODS;
use scrum_rpc::{ChildSupervisor, Correlator, RpcError};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::output::print_json;

/// The child that answers: `rpc.command` from config, or this binary's own
/// `rpc` subcommand.
fn supervisor(root: &Path, command: &[String]) -> anyhow::Result<ChildSupervisor> {
    let sup = if command.is_empty() {
        let exe = std::env::current_exe().context("cannot locate the scrum executable")?;
        ChildSupervisor::new(
            exe,
            vec![
                "--root".to_string(),
                root.display().to_string(),
                "rpc".to_string(),
            ],
        )
    } else {
        ChildSupervisor::from_argv(command)?
    };
    Ok(sup
        .current_dir(root)
        .env("SCRUM_ROOT", root.display().to_string()))
}

pub fn run(root: &Path, method: &str, params: &str, json: bool) -> anyhow::Result<()> {
    let params: Value =
        serde_json::from_str(params).context("params must be a JSON object")?;
    if !params.is_object() {
        return Err(anyhow!("params must be a JSON object"));
    }
    let config = scrum_core::Config::load(root).context("failed to load .scrum/config.yaml")?;
    let sup = supervisor(root, &config.rpc.command)?;
    let timeout = Duration::from_secs(config.rpc.timeout_secs.max(1));

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async {
        let correlator = Correlator::with_timeout(sup, timeout);
        let result = correlator.call(method, params).await;
        correlator.shutdown().await;
        result
    });

    match outcome {
        Ok(envelope) => {
            if json {
                print_json(&envelope)
            } else {
                if let Some(message) = envelope.get("message").and_then(Value::as_str) {
                    println!("{message}");
                }
                print_json(envelope.get("data").unwrap_or(&Value::Null))
            }
        }
        Err(e) => {
            if json {
                print_json(&json!({
                    "error": e.to_string(),
                    "code": e.code(),
                    "details": e.details(),
                    "retryable": e.is_retryable(),
                }))?;
            }
            Err(describe(e))
        }
    }
}

fn describe(e: RpcError) -> anyhow::Error {
    match &e {
        RpcError::Remote { code, message, .. } => anyhow!("{code}: {message}"),
        _ => anyhow!("{}: {e}", e.code()),
    }
}

pub fn list_methods(json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&METHODS);
    }
    for m in METHODS {
        println!("{m}");
    }
    Ok(())
}
