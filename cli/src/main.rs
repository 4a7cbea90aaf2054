//! chainrelay CLI — send calls through a multi-provider relay from the terminal.
//!
//! Usage:
//! ```bash
//! # One call against a single endpoint
//! chainrelay call --url https://cloudflare-eth.com --method eth_blockNumber
//!
//! # Same call, failing over across every provider in a config file
//! chainrelay call --config relay.json --method eth_getBalance --params '["0xabc", "latest"]'
//!
//! # Probe every configured provider
//! chainrelay health --config relay.json
//!
//! # List provider kinds the registry can build
//! chainrelay providers
//! ```

use std::env;
use std::process;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use chainrelay_core::{ProviderConfig, ProviderKind, ProviderManager, RpcRequest, Strategy};
use chainrelay_providers::{registry, ProviderSpec, RelayConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }
    init_logging(has_flag(&args, "--json-logs"));

    let result = match args[1].as_str() {
        "call" => cmd_call(&args[2..]).await,
        "batch" => cmd_batch(&args[2..]).await,
        "health" => cmd_health(&args[2..]).await,
        "stats" => cmd_stats(&args[2..]).await,
        "providers" => {
            cmd_providers();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Logs go to stderr so stdout stays machine-readable. `RUST_LOG` wins over
/// the `warn` default.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_usage() {
    println!("chainrelay {}", env!("CARGO_PKG_VERSION"));
    println!("Multi-provider blockchain RPC relay\n");
    println!("USAGE:");
    println!("    chainrelay <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    call       Send one JSON-RPC call with failover");
    println!("    batch      Send several calls, results in input order");
    println!("    health     Probe every provider once");
    println!("    stats      Send sample calls and print stats, metrics and cache figures");
    println!("    providers  List provider kinds the registry can build");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("PROVIDER FLAGS (one of):");
    println!("    --config <FILE>      JSON relay config (manager settings + providers)");
    println!("    --url <URL>          Single custom endpoint\n");
    println!("COMMON FLAGS:");
    println!("    --strategy <NAME>    round_robin | weighted_round_robin | least_connections |");
    println!("                         least_response_time | priority | cost_optimized");
    println!("    --json-logs          Emit logs as JSON (filter with RUST_LOG)\n");
    println!("CALL FLAGS:");
    println!("    --method <METHOD>    JSON-RPC method  [required]");
    println!("    --params <JSON>      Params array, default []\n");
    println!("BATCH FLAGS (one of):");
    println!("    --requests <JSON>    Array of {{\"method\", \"params\"}} objects");
    println!("    --file <PATH>        File holding the same array\n");
    println!("STATS FLAGS:");
    println!("    --method <METHOD>    Sample method, default eth_blockNumber");
    println!("    --count <N>          Sample calls to send, default 5");
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn cmd_call(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").context("--method is required")?;
    let params = parse_params(parse_flag(args, "--params").as_deref())?;
    let manager = build_manager(args)?;

    let result = manager.request(RpcRequest::new(method, params)).await;
    manager.destroy().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn cmd_batch(args: &[String]) -> Result<()> {
    let text = match (parse_flag(args, "--requests"), parse_flag(args, "--file")) {
        (Some(inline), _) => inline,
        (None, Some(path)) => std::fs::read_to_string(&path).with_context(|| format!("cannot read {path}"))?,
        (None, None) => bail!("--requests or --file is required"),
    };
    let requests = parse_requests(&text)?;
    let manager = build_manager(args)?;

    let results = manager.batch(&requests).await;
    manager.destroy().await;

    let report: Vec<Value> = requests
        .iter()
        .zip(results)
        .map(|(req, result)| match result {
            Ok(value) => serde_json::json!({ "method": req.method, "result": value }),
            Err(e) => serde_json::json!({ "method": req.method, "error": e.to_string() }),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_health(args: &[String]) -> Result<()> {
    let manager = build_manager(args)?;
    let results = manager.run_health_checks().await;
    let stats = manager.stats();
    manager.destroy().await;

    println!("{:<32} {:<10} {:>10}", "PROVIDER", "STATUS", "LATENCY");
    for (id, healthy) in &results {
        let latency = stats
            .get(id)
            .map(|s| format!("{:.0}ms", s.average_response_time_ms))
            .unwrap_or_else(|| "-".into());
        let status = if *healthy { "healthy" } else { "unhealthy" };
        println!("{:<32} {:<10} {:>10}", id.as_str(), status, latency);
    }

    let down = results.values().filter(|healthy| !**healthy).count();
    if down == results.len() {
        bail!("no provider is healthy");
    }
    Ok(())
}

async fn cmd_stats(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").unwrap_or_else(|| "eth_blockNumber".into());
    let count: usize = match parse_flag(args, "--count") {
        Some(n) => n.parse().with_context(|| format!("invalid --count {n:?}"))?,
        None => 5,
    };
    let manager = build_manager(args)?;

    let mut failures = 0;
    for _ in 0..count {
        if let Err(e) = manager.request(RpcRequest::method(method.as_str())).await {
            tracing::warn!(error = %e, "sample request failed");
            failures += 1;
        }
    }

    let report = serde_json::json!({
        "strategy": manager.config().strategy,
        "requests": count,
        "failures": failures,
        "stats": manager.stats(),
        "metrics": manager.metrics(),
        "cache": manager.cache_stats(),
    });
    manager.destroy().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_providers() {
    println!("Provider kinds:\n");
    for kind in ProviderKind::ALL {
        match registry::lookup(kind) {
            Some(registration) => println!("  {:<18} {}", kind.as_str(), registration.summary),
            None => println!("  {:<18} (not available in this build)", kind.as_str()),
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Relay config from `--config` or a one-provider config from `--url`, with
/// `--strategy` applied on top.
fn load_config(args: &[String]) -> Result<RelayConfig> {
    let mut config = match (parse_flag(args, "--config"), parse_flag(args, "--url")) {
        (Some(path), _) => RelayConfig::load(&path).with_context(|| format!("loading {path}"))?,
        (None, Some(url)) => {
            let spec = ProviderSpec::new(ProviderKind::Custom, "cli").with_config(ProviderConfig {
                url: Some(url),
                ..Default::default()
            });
            RelayConfig {
                providers: vec![spec],
                ..Default::default()
            }
        }
        (None, None) => bail!("--config or --url is required"),
    };
    if let Some(name) = parse_flag(args, "--strategy") {
        config.manager.strategy = parse_strategy(&name)?;
    }
    config.validate()?;
    Ok(config)
}

fn build_manager(args: &[String]) -> Result<ProviderManager> {
    let config = load_config(args)?;
    let manager = config.build_manager().context("building providers")?;
    tracing::info!(
        providers = manager.len(),
        strategy = %manager.config().strategy,
        "relay ready"
    );
    Ok(manager)
}

fn parse_strategy(name: &str) -> Result<Strategy> {
    serde_json::from_value(Value::String(name.to_string())).with_context(|| {
        let known: Vec<String> = Strategy::ALL.iter().map(ToString::to_string).collect();
        format!("unknown strategy {name:?}, expected one of {}", known.join(", "))
    })
}

fn parse_params(raw: Option<&str>) -> Result<Vec<Value>> {
    match raw {
        None => Ok(Vec::new()),
        Some(text) => match serde_json::from_str(text).context("--params is not valid JSON")? {
            Value::Array(items) => Ok(items),
            other => bail!("--params must be a JSON array, got {other}"),
        },
    }
}

fn parse_requests(text: &str) -> Result<Vec<RpcRequest>> {
    let requests: Vec<RpcRequest> =
        serde_json::from_str(text).context("batch must be a JSON array of {\"method\", \"params\"}")?;
    if requests.is_empty() {
        bail!("batch is empty");
    }
    Ok(requests)
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
