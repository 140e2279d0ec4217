use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use argh::FromArgs;
use loadgen_service::harness::{CommandHarness, ENV_RESULTS_DIR, ENV_TIME_OFFSET_MS, RequestContext};
use loadgen_service::log::{DetailLog, DetailRecord, Marker, ReqLog};
use loadgen_service::node::{NodeOptions, NodeRunner};
use loadgen_service::record::{DETAIL_TIMELOG_FILE, EventRecorder};
use loadgen_service::run::{FunctionalRun, PerformanceRun, RunReport, RunSettings};
use loadgen_service::{RunError, RunStatus};

use crate::config::{Config, RunConfig};
use crate::{observability, summary};

/// Distributed load generator.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Node(NodeCommand),
    Event(EventCommand),
    Analyze(AnalyzeCommand),
    Version(VersionCommand),
}

/// execute a configured run across all nodes
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// name of the run
    #[argh(positional)]
    name: String,

    /// seed of the run, overrides the configuration
    #[argh(option)]
    seed: Option<u64>,

    /// keep dynamically created nodes after the run
    #[argh(switch)]
    keep_nodes: bool,
}

/// run profile files on this node
///
/// This is invoked by the controller on every node. The exit status is 0 for valid results,
/// 1 if a profile could not keep up, 2 if the results are invalid and 3 if a profile exceeded
/// the maximum request rate.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "node")]
struct NodeCommand {
    /// name of the node, prefixes all request ids
    #[argh(option)]
    name: String,

    /// directory receiving the logs
    #[argh(option)]
    results_dir: PathBuf,

    /// seed of the node's random generators
    #[argh(option)]
    seed: u64,

    /// stop profiles that cannot keep up
    #[argh(switch)]
    abort_on_skew: bool,

    /// hard ceiling on the target rate of any profile
    #[argh(option)]
    max_request_rate: Option<f64>,

    /// number of in-flight requests per profile above which a warning is logged
    #[argh(option)]
    max_in_flight: Option<usize>,

    /// truncate existing logs before starting
    #[argh(switch)]
    fresh: bool,

    /// profile file to run, may be given multiple times
    #[argh(option)]
    profile: Vec<PathBuf>,

    /// shell command executing one request, overrides the configuration
    #[argh(option)]
    harness: Option<String>,
}

/// record the begin or end of a detail event
///
/// Called by the harness while it executes a request. The request is identified through the
/// environment the node passes to the harness.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "event")]
struct EventCommand {
    /// either `begin` or `end`
    #[argh(positional)]
    marker: String,

    /// name of the event
    #[argh(positional)]
    name: String,
}

/// merge raw logs and print their statistics
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "analyze")]
struct AnalyzeCommand {
    /// end-to-end log of a node, may be given multiple times
    #[argh(option)]
    timelog: Vec<PathBuf>,

    /// detail log of a node, may be given multiple times
    #[argh(option)]
    detail_log: Vec<PathBuf>,

    /// length of the run in seconds, defaults to the span of the logs
    #[argh(option)]
    load_duration: Option<f64>,

    /// print the report as JSON
    #[argh(switch)]
    json: bool,
}

/// print the load generator version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<ExitCode> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("loadgen-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(command) => run(config, command).await,
            Command::Node(command) => node(config, command).await,
            Command::Event(command) => event(command).await,
            Command::Analyze(command) => analyze(command).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}

async fn run(config: Config, command: RunCommand) -> Result<ExitCode> {
    let session = config.session()?;
    let run_config = config.run(&command.name)?;

    let results_dir = config.results_dir.join(&command.name);
    let mut settings = RunSettings::new(&results_dir, &config.node.command);
    settings.node_results_dir = config.node.results_dir.clone();
    settings.seed = command.seed.or(config.seed).unwrap_or_else(rand::random);
    settings.abort_on_skew = config.node.abort_on_skew;
    settings.max_request_rate = config.node.max_request_rate;
    settings.max_in_flight = config.node.max_in_flight;

    let provider = config.provider.provider();
    let remote = config.remote.executor();
    tracing::info!(run = %command.name, seed = settings.seed, "starting run");

    let result = match run_config {
        RunConfig::Performance {
            profiles,
            nodes,
            keep_nodes,
        } => {
            settings.node_count = *nodes;
            settings.keep_nodes = *keep_nodes || command.keep_nodes;
            let profiles = profiles
                .iter()
                .map(|name| session.performance_profile(name).cloned())
                .collect::<Result<_, _>>()?;
            PerformanceRun::new(&command.name, profiles, settings)?
                .execute(provider.as_ref(), &remote)
                .await
        }
        RunConfig::Functional {
            profile,
            max_requests_per_node,
            nodes,
            keep_nodes,
        } => {
            settings.node_count = *nodes;
            settings.keep_nodes = *keep_nodes || command.keep_nodes;
            let profile = session.functional_profile(profile)?;
            FunctionalRun::new(&command.name, profile, settings, *max_requests_per_node)?
                .execute(provider.as_ref(), &remote)
                .await
        }
    };

    let report = match result {
        Ok(report) => report,
        Err(error @ RunError::GovernorViolation { .. }) => {
            tracing::error!(run = %command.name, %error, "run aborted");
            return Ok(exit_code(RunStatus::Aborted.exit_code()));
        }
        Err(error) => return Err(error.into()),
    };

    write_report(&results_dir, &report).await?;
    summary::print_run(&report);
    Ok(exit_code(report.status.exit_code()))
}

async fn write_report(results_dir: &Path, report: &RunReport) -> Result<()> {
    let path = results_dir.join(format!("{}_summary.json", report.name));
    let json = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

async fn node(config: Config, command: NodeCommand) -> Result<ExitCode> {
    let mut profiles = Vec::with_capacity(command.profile.len());
    for path in &command.profile {
        profiles.push(NodeRunner::load_profile(path).await?);
    }

    let mut options = NodeOptions::new(&command.name, &command.results_dir, command.seed);
    options.abort_on_skew = command.abort_on_skew || config.node.abort_on_skew;
    options.max_request_rate = command
        .max_request_rate
        .unwrap_or(config.node.max_request_rate);
    options.max_in_flight = command.max_in_flight.unwrap_or(config.node.max_in_flight);
    options.fresh = command.fresh;

    let time_offset_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the epoch")?
        .as_millis();
    let harness = CommandHarness::new(
        command.harness.unwrap_or(config.node.harness),
        &command.results_dir,
        time_offset_ms,
    );

    let report = NodeRunner::new(options, Arc::new(harness))
        .run(profiles)
        .await?;
    summary::print_node(&command.name, &report);
    Ok(exit_code(report.status.exit_code()))
}

async fn event(command: EventCommand) -> Result<ExitCode> {
    let marker = match command.marker.to_ascii_lowercase().as_str() {
        "begin" => Marker::Begin,
        "end" => Marker::End,
        other => bail!("unknown marker `{other}`, expected `begin` or `end`"),
    };

    let env = |key: &str| std::env::var(key).ok();
    let request = RequestContext::from_env(env)
        .context("not running within a request of the load generator")?;
    let results_dir = env(ENV_RESULTS_DIR).context("results directory is not set")?;
    let offset_ms: u128 = env(ENV_TIME_OFFSET_MS)
        .context("time offset is not set")?
        .parse()
        .context("invalid time offset")?;

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the epoch")?
        .as_millis();
    let record = DetailRecord {
        request_type: request.request_type,
        id: request.id,
        name: command.name,
        request_rate: request.rate,
        marker,
        time: now_ms.saturating_sub(offset_ms) as f64 / 1000.0,
    };

    let path = Path::new(&results_dir).join(DETAIL_TIMELOG_FILE);
    EventRecorder::open(path, false)
        .await?
        .record_event(&record)
        .await?;
    Ok(ExitCode::SUCCESS)
}

async fn analyze(command: AnalyzeCommand) -> Result<ExitCode> {
    if command.timelog.is_empty() {
        bail!("at least one `--timelog` is required");
    }

    let mut req = ReqLog::new();
    for path in &command.timelog {
        req.absorb(ReqLog::read(path).await?);
    }
    let mut detail = DetailLog::new();
    for path in &command.detail_log {
        detail.absorb(DetailLog::read(path).await?);
    }
    detail.report_unmatched();

    let report = RunReport::analyze("analysis", &req, &detail, command.load_duration);
    if command.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        summary::print_run(&report);
    }
    Ok(ExitCode::SUCCESS)
}
