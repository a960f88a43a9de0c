use std::process::ExitCode;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{
    EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use bolt_relay_gateway::messages;
use bolt_relay_gateway::prep::{BackoffPolicy, CommandPreparer, JobPhase, PreparationJob};

const USAGE: &str = "usage: bolt-relay-gateway prepare <resource> [--retries <n>] [--json]";

#[derive(Debug)]
struct PrepareArgs {
    resource: String,
    retries: u32,
    json: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<PrepareArgs, String> {
    match args.next().as_deref() {
        Some("prepare") => {}
        Some(other) => return Err(format!("unknown command '{}'\n{}", other, USAGE)),
        None => return Err(USAGE.to_string()),
    }

    let mut resource = None;
    let mut retries = 0;
    let mut json = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--retries" => {
                let raw = args
                    .next()
                    .ok_or_else(|| format!("--retries needs a value\n{}", USAGE))?;
                retries = raw
                    .parse()
                    .map_err(|_| format!("invalid --retries value '{}'\n{}", raw, USAGE))?;
            }
            _ if resource.is_none() && !arg.starts_with("--") => resource = Some(arg.clone()),
            _ => return Err(format!("unexpected argument '{}'\n{}", arg, USAGE)),
        }
    }

    Ok(PrepareArgs {
        resource: resource.ok_or_else(|| USAGE.to_string())?,
        retries,
        json,
    })
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Swap the startup filter for `[logging] level` unless RUST_LOG chose one.
fn apply_configured_level(
    handle: &FilterHandle,
    level_from_env: bool,
    level: &str,
) -> Result<(), reload::Error> {
    if level_from_env {
        return Ok(());
    }
    handle.reload(EnvFilter::new(level))
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return Ok(ExitCode::from(2));
        }
    };

    bolt_relay_core::load_dotenv();

    // Initialize tracing; `[logging] level` applies once config is loaded
    // unless RUST_LOG is set.
    let level_from_env = std::env::var_os("RUST_LOG").is_some();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let (env_filter, filter_handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = bolt_relay_core::Config::load()?;
    apply_configured_level(&filter_handle, level_from_env, &config.settings.logging.level)?;
    config.log_summary();

    let preparation = &config.settings.preparation;
    let (Some(begin_command), Some(status_command)) = (
        preparation.begin_command.as_deref(),
        preparation.status_command.as_deref(),
    ) else {
        return Err("preparation.begin_command and preparation.status_command must be set".into());
    };

    let backoff = BackoffPolicy::from_settings(preparation);
    info!(
        "Preparing {} (up to {} readiness checks, {:?} per call, at most {:?} in total)",
        args.resource,
        backoff.max_attempts(),
        backoff.call_timeout(),
        backoff.worst_case_run()
    );
    let job = PreparationJob::new(
        args.resource.clone(),
        Arc::new(CommandPreparer::new(begin_command, status_command)),
        backoff,
    );

    job.start();
    println!("{}", messages::preparation_status(&job.status()));

    let mut retries_left = args.retries;
    let status = loop {
        let status = job.settled().await;
        if status.phase == JobPhase::Failed && retries_left > 0 {
            retries_left -= 1;
            println!("{}", messages::preparation_status(&status));
            println!("{}", messages::RETRY_STARTED);
            job.retry();
            continue;
        }
        break status;
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", messages::preparation_status(&status));
    }

    Ok(if status.is_ready() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
