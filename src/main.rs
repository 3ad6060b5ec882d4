use anyhow::{Context, Result};
use indicatif::ProgressBar;
use relaychain::cli::commands::{PlanCommand, ProvisionCommand, TeardownCommand, ValidateCommand};
use relaychain::cli::output::*;
use relaychain::cli::{Cli, Command};
use relaychain::core::{
    resolve, OrchestratorConfig, ProvisionRequest, ProvisionResponse, Role,
    TeardownRequest, TeardownResponse,
};
use relaychain::execution::{Cancellation, ExecutionEvent, Orchestrator};
use relaychain::remote::{SshBackend, SshClientConfig};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Logs go to stderr so stdout only carries the response document
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = OrchestratorConfig::load(cli.config.as_deref().map(Path::new))
        .context("Failed to load orchestrator config")?;

    let success = match &cli.command {
        Command::Provision(cmd) => provision(cmd, config, cli.verbose).await?,
        Command::Teardown(cmd) => teardown(cmd, config, cli.verbose).await?,
        Command::Validate(cmd) => validate(cmd)?,
        Command::Plan(cmd) => plan(cmd)?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn read_request(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read request {}", path))
    }
}

/// Build an orchestrator over SSH with Ctrl-C wired to cancellation
fn build_orchestrator(
    config: OrchestratorConfig,
    cancellation: Cancellation,
    json: bool,
    node_count: usize,
) -> (Orchestrator, Option<ProgressBar>) {
    let backend = Arc::new(SshBackend::new(SshClientConfig::from_settings(&config.ssh)));
    let mut orchestrator = Orchestrator::new(backend, config).with_cancellation(cancellation);

    let cancel = orchestrator.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling remaining work");
            cancel.cancel();
        }
    });

    if json {
        return (orchestrator, None);
    }

    let progress = create_progress_bar(node_count);
    let bar = progress.clone();
    orchestrator.add_event_handler(move |event| {
        if let Some(line) = format_execution_event(event) {
            bar.println(line);
        }
        match event {
            ExecutionEvent::NodeStarted { address, .. } => bar.set_message(address.clone()),
            ExecutionEvent::NodeFinished { .. } => bar.inc(1),
            _ => {}
        }
    });
    (orchestrator, Some(progress))
}

async fn provision(cmd: &ProvisionCommand, mut config: OrchestratorConfig, verbose: bool) -> Result<bool> {
    if let Some(strategy) = cmd.strategy {
        config.strategy = strategy.into();
    }
    if cmd.strict {
        config.strict = true;
    }

    let job = ProvisionRequest::from_json(&read_request(&cmd.request)?)
        .and_then(|request| request.validate())
        .context("Invalid provision request")?;
    let relay = job.relay.clone();

    let mut cancellation = Cancellation::new();
    if let Some(secs) = cmd.timeout {
        cancellation = cancellation.with_timeout(Duration::from_secs(secs));
    }
    let (orchestrator, progress) = build_orchestrator(config, cancellation, cmd.json, job.nodes.len());

    let result = orchestrator.provision_job(job).await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    let response = ProvisionResponse::from_result(&result, &relay);
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("\n{}", format_result(&result, verbose));
        let endpoint = response.nodes.iter().find_map(|n| n.relay_endpoint.as_ref());
        match endpoint {
            Some(endpoint) => println!(
                "\n{} Relay endpoint: {}",
                CHECK,
                style(format!("{}:{}", endpoint.address, endpoint.port)).green().bold()
            ),
            None => println!("\n{} No relay endpoint is available", CROSS),
        }
    }

    Ok(result.is_success())
}

async fn teardown(cmd: &TeardownCommand, mut config: OrchestratorConfig, verbose: bool) -> Result<bool> {
    if let Some(strategy) = cmd.strategy {
        config.strategy = strategy.into();
    }
    if cmd.strict {
        config.strict = true;
    }

    let nodes = TeardownRequest::from_json(&read_request(&cmd.request)?)
        .and_then(|request| request.validate())
        .context("Invalid teardown request")?;

    let (orchestrator, progress) = build_orchestrator(config, Cancellation::new(), cmd.json, nodes.len());
    let result = orchestrator.teardown_nodes(nodes).await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    if cmd.json {
        let response = TeardownResponse::from_result(&result);
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("\n{}", format_result(&result, verbose));
    }

    Ok(result.is_success())
}

fn validate(cmd: &ValidateCommand) -> Result<bool> {
    println!("{} Validating request...", INFO);
    let content = read_request(&cmd.request)?;

    let outcome = if cmd.teardown {
        TeardownRequest::from_json(&content)
            .and_then(|request| request.validate())
            .map(|nodes| format!("{} node(s) to reset", nodes.len()))
    } else {
        ProvisionRequest::from_json(&content)
            .and_then(|request| request.validate())
            .map(|job| {
                format!(
                    "{} node(s), relay port {}, {} static host entries",
                    job.nodes.len(),
                    job.relay.port,
                    job.static_hosts.len()
                )
            })
    };

    match outcome {
        Ok(summary) => {
            println!("{} Request is valid!", CHECK);
            println!("  {}", style(summary).cyan());
            Ok(true)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            Ok(false)
        }
    }
}

fn plan(cmd: &PlanCommand) -> Result<bool> {
    let job = ProvisionRequest::from_json(&read_request(&cmd.request)?)
        .and_then(|request| request.validate())
        .context("Invalid provision request")?;
    let hops = resolve(&job.nodes);

    if cmd.json {
        let data: Vec<_> = hops
            .iter()
            .map(|hop| {
                serde_json::json!({
                    "address": hop.node.address,
                    "role": hop.role,
                    "nextHop": hop.next_hop,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Chain of {} node(s):", INFO, hops.len());
        println!("{}", format_plan(&hops));
        if let Some(terminal) = hops.iter().find(|h| h.role == Role::Terminal) {
            println!(
                "\n{} Egress at {} on port {}",
                ROCKET,
                style(&terminal.node.address).bold(),
                style(job.relay.port).cyan()
            );
        }
    }

    Ok(true)
}

