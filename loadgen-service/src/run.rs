//! Controller-side orchestration of performance and functional runs.
//!
//! A run provisions its nodes, pushes one profile file per profile onto every node, starts
//! the node-side scheduler through the [`RemoteExecutor`], retrieves the raw logs, merges
//! them and computes statistics into a [`RunReport`].

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use futures_util::future::try_join_all;
use loadgen_types::{ConfigError, END_TO_END, ProfileDefinition, RequestType, validate_name};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{RunError, RunResult};
use crate::log::{DetailLog, ReqLog, merge};
use crate::pool::{NodeCapacity, WorkerPool};
use crate::provider::{Node, Provider};
use crate::ramp::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_REQUEST_RATE};
use crate::record::{DETAIL_TIMELOG_FILE, TIMELOG_FILE};
use crate::remote::RemoteExecutor;
use crate::session::{FunctionalProfile, PerformanceProfile};
use crate::stats::{Stats, StatsEngine};
use crate::status::RunStatus;

/// Percentiles of the end-to-end durations included in every report.
const REPORTED_PERCENTILES: [f64; 3] = [50.0, 90.0, 99.0];

/// Settings shared by performance and functional runs.
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// Local directory the run writes its results into.
    pub results_dir: PathBuf,
    /// Command that starts the node-side scheduler, e.g. `loadgen node`.
    pub node_command: String,
    /// Directory on the nodes that holds profiles and logs.
    pub node_results_dir: String,
    /// Seed from which all node seeds are derived.
    pub seed: u64,
    /// Whether nodes stop a profile they cannot keep up with.
    pub abort_on_skew: bool,
    /// Hard ceiling on the per-node target rate of a profile.
    pub max_request_rate: f64,
    /// Number of in-flight requests per profile above which nodes warn.
    pub max_in_flight: usize,
    /// Number of nodes to create when the provider is dynamic.
    pub node_count: usize,
    /// Whether dynamically created nodes are kept after the run.
    pub keep_nodes: bool,
}

impl RunSettings {
    /// Creates settings with default limits for a single node.
    pub fn new(results_dir: impl Into<PathBuf>, node_command: impl Into<String>) -> Self {
        Self {
            results_dir: results_dir.into(),
            node_command: node_command.into(),
            node_results_dir: "/tmp/loadgen".to_owned(),
            seed: 0,
            abort_on_skew: false,
            max_request_rate: DEFAULT_MAX_REQUEST_RATE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            node_count: 1,
            keep_nodes: false,
        }
    }

    fn remote_path(&self, file: &str) -> String {
        format!("{}/{file}", self.node_results_dir.trim_end_matches('/'))
    }

    /// Builds the command starting the node-side scheduler.
    ///
    /// `name` prefixes the request ids, so concurrent invocations on one node need distinct
    /// names.
    fn node_command_line(&self, name: &str, seed: u64, profiles: &[String], fresh: bool) -> String {
        let mut line = format!(
            "{} --name {name} --results-dir {} --seed {seed} --max-request-rate {} --max-in-flight {}",
            self.node_command,
            self.node_results_dir,
            self.max_request_rate,
            self.max_in_flight,
        );
        if self.abort_on_skew {
            line.push_str(" --abort-on-skew");
        }
        if fresh {
            line.push_str(" --fresh");
        }
        for profile in profiles {
            line.push_str(" --profile ");
            line.push_str(profile);
        }
        line
    }
}

/// The results of a run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    /// Name of the run.
    pub name: String,
    /// Overall validity of the results.
    pub status: RunStatus,
    /// Names of all nodes that took part.
    pub nodes: Vec<String>,
    /// Nodes whose logs could not be retrieved or parsed.
    pub degraded_nodes: Vec<String>,
    /// Length of the run in seconds.
    pub load_duration: f64,
    /// Number of requests executed.
    pub number_of_tests: usize,
    /// Number of requests that passed.
    pub number_passed: usize,
    /// Statistics of all end-to-end entries.
    pub end_to_end: Stats,
    /// End-to-end percentiles, keyed by percent.
    pub percentiles: BTreeMap<String, Option<f64>>,
    /// End-to-end statistics per request type.
    pub request_types: BTreeMap<String, Stats>,
    /// Statistics per detail event name.
    pub events: BTreeMap<String, Stats>,
    /// Number of detail events that began but never ended.
    pub unmatched_events: usize,
}

/// Drives request types along their distributions on every node.
#[derive(Clone, Debug)]
pub struct PerformanceRun {
    name: String,
    profiles: Vec<PerformanceProfile>,
    settings: RunSettings,
}

impl PerformanceRun {
    /// Creates a run over the given profiles.
    pub fn new(
        name: impl Into<String>,
        profiles: Vec<PerformanceProfile>,
        settings: RunSettings,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        validate_name("run", &name)?;
        Ok(Self {
            name,
            profiles,
            settings,
        })
    }

    /// Returns the length of the longest profile in seconds.
    pub fn load_duration(&self) -> f64 {
        self.profiles
            .iter()
            .map(|p| p.distribution().total_secs())
            .fold(0.0, f64::max)
    }

    /// Executes the run and computes its report.
    ///
    /// Dynamically provisioned nodes are destroyed afterwards unless configured otherwise,
    /// even if the run failed.
    pub async fn execute(
        &self,
        provider: &dyn Provider,
        remote: &dyn RemoteExecutor,
    ) -> RunResult<RunReport> {
        create_dir(&self.settings.results_dir).await?;
        let nodes = provision_nodes(provider, &self.name, &self.settings).await?;
        let result = self.drive(&nodes, remote).await;
        cleanup(provider, &nodes, &self.settings).await;
        result
    }

    async fn drive(&self, nodes: &[Node], remote: &dyn RemoteExecutor) -> RunResult<RunReport> {
        let mut profile_files = Vec::new();
        for profile in &self.profiles {
            let definition = ProfileDefinition::performance(
                profile.request_type(),
                profile.distribution(),
                nodes.len(),
            );
            profile_files.push(write_profile(&self.settings, profile.name(), &definition).await?);
        }
        prepare_nodes(nodes, remote, &self.settings, &profile_files, false).await?;

        let remote_profiles: Vec<_> = profile_files.iter().map(|(_, r)| r.clone()).collect();
        tracing::info!(run = %self.name, nodes = nodes.len(), "starting nodes");
        let statuses = try_join_all(nodes.iter().map(|node| {
            let command =
                self.settings
                    .node_command_line(node.name(), node.seed(), &remote_profiles, true);
            start_node(remote, node, command)
        }))
        .await?;
        let status = statuses.into_iter().fold(RunStatus::Valid, RunStatus::combine);

        let logs = collect_logs(&self.name, nodes, remote, &self.settings).await?;
        summarize(&self.name, nodes, logs, status, self.load_duration(), &self.settings).await
    }
}

/// Executes each request type once on a node obtained from a [`WorkerPool`].
#[derive(Clone, Debug)]
pub struct FunctionalRun {
    name: String,
    request_types: Vec<RequestType>,
    settings: RunSettings,
    capacity: NodeCapacity,
}

impl FunctionalRun {
    /// Creates a run over the request types of a functional profile.
    ///
    /// `max_requests_per_node` bounds how many requests execute on a node at the same time.
    pub fn new(
        name: impl Into<String>,
        profile: &FunctionalProfile,
        settings: RunSettings,
        max_requests_per_node: Option<NonZeroUsize>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        validate_name("run", &name)?;
        Ok(Self {
            name,
            request_types: profile.request_types().to_vec(),
            settings,
            capacity: NodeCapacity::from_limit(max_requests_per_node),
        })
    }

    /// Executes the run and computes its report.
    pub async fn execute(
        &self,
        provider: &dyn Provider,
        remote: &dyn RemoteExecutor,
    ) -> RunResult<RunReport> {
        create_dir(&self.settings.results_dir).await?;
        let nodes = provision_nodes(provider, &self.name, &self.settings).await?;
        let result = self.drive(&nodes, remote).await;
        cleanup(provider, &nodes, &self.settings).await;
        result
    }

    async fn drive(&self, nodes: &[Node], remote: &dyn RemoteExecutor) -> RunResult<RunReport> {
        let started = Instant::now();

        let mut profile_files = Vec::new();
        for request_type in &self.request_types {
            let definition = ProfileDefinition::functional(request_type);
            profile_files.push(write_profile(&self.settings, request_type.name(), &definition).await?);
        }
        prepare_nodes(nodes, remote, &self.settings, &profile_files, true).await?;

        let pool = WorkerPool::new(nodes.to_vec(), self.capacity);
        let statuses = try_join_all(profile_files.iter().enumerate().map(|(i, (_, remote_profile))| {
            let pool = pool.clone();
            async move {
                let lease = pool.lease().await;
                let node = lease.node();
                let command = self.settings.node_command_line(
                    &format!("{}.{}", node.name(), i + 1),
                    node.seed().wrapping_add(i as u64),
                    std::slice::from_ref(remote_profile),
                    false,
                );
                start_node(remote, node, command).await
            }
        }))
        .await?;
        let status = statuses.into_iter().fold(RunStatus::Valid, RunStatus::combine);

        let load_duration = started.elapsed().as_secs_f64();
        let logs = collect_logs(&self.name, nodes, remote, &self.settings).await?;
        summarize(&self.name, nodes, logs, status, load_duration, &self.settings).await
    }
}

async fn create_dir(path: &Path) -> RunResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| RunError::Io {
            path: path.to_owned(),
            source,
        })
}

/// Obtains the nodes of a run from the provider.
///
/// Static providers contribute all their nodes. Dynamic providers create
/// `settings.node_count` nodes named `1..=n`, taking IP addresses from the provider's pool.
/// Node seeds are drawn from a generator seeded with the run seed.
pub async fn provision_nodes(
    provider: &dyn Provider,
    run: &str,
    settings: &RunSettings,
) -> RunResult<Vec<Node>> {
    let mut seeds = SmallRng::seed_from_u64(settings.seed);

    let requested: Vec<(String, Option<String>)> = if provider.is_dynamic() {
        let pool = provider.ip_pool();
        if !pool.is_empty() && pool.len() < settings.node_count {
            return Err(RunError::InsufficientIps {
                needed: settings.node_count,
                available: pool.len(),
            });
        }
        (1..=settings.node_count)
            .map(|i| (i.to_string(), pool.get(i - 1).cloned()))
            .collect()
    } else {
        provider
            .node_ips()
            .into_iter()
            .map(|(name, ip)| (name, Some(ip)))
            .collect()
    };

    if requested.is_empty() {
        return Err(RunError::NoNodes(run.to_owned()));
    }

    let mut nodes = Vec::with_capacity(requested.len());
    for (name, ip) in requested {
        let seed = seeds.random::<u64>();
        match provider.provision(&name, seed, ip.as_deref()).await {
            Ok(node) => nodes.push(node),
            Err(error) => {
                cleanup(provider, &nodes, settings).await;
                return Err(error.into());
            }
        }
    }

    tracing::info!(run, nodes = nodes.len(), "provisioned nodes");
    Ok(nodes)
}

async fn cleanup(provider: &dyn Provider, nodes: &[Node], settings: &RunSettings) {
    if !provider.is_dynamic() || settings.keep_nodes {
        return;
    }
    for node in nodes {
        if let Err(error) = provider.destroy(node).await {
            tracing::warn!(node = node.name(), %error, "failed to destroy node");
        }
    }
}

/// Writes a profile file into the local results directory.
///
/// Returns the local path and the path the file will have on the nodes.
async fn write_profile(
    settings: &RunSettings,
    name: &str,
    definition: &ProfileDefinition,
) -> RunResult<(PathBuf, String)> {
    let file = format!("{name}.profile");
    let local = settings.results_dir.join(&file);
    tokio::fs::write(&local, definition.to_string())
        .await
        .map_err(|source| RunError::Io {
            path: local.clone(),
            source,
        })?;
    Ok((local, settings.remote_path(&file)))
}

/// Creates the results directory on every node and pushes the profile files.
async fn prepare_nodes(
    nodes: &[Node],
    remote: &dyn RemoteExecutor,
    settings: &RunSettings,
    profile_files: &[(PathBuf, String)],
    clear_logs: bool,
) -> RunResult<()> {
    let mut script = format!("mkdir -p {}", settings.node_results_dir);
    if clear_logs {
        script.push_str(&format!(
            " && rm -f {} {}",
            settings.remote_path(TIMELOG_FILE),
            settings.remote_path(DETAIL_TIMELOG_FILE)
        ));
    }

    for node in nodes {
        let status = remote.run_command(node, &script).await?;
        if status != 0 {
            return Err(crate::error::CollaboratorError::Failed {
                command: script,
                status,
            }
            .into());
        }
        for (local, remote_path) in profile_files {
            remote.push_file(node, local, remote_path).await?;
        }
    }
    Ok(())
}

/// Runs the node-side scheduler and maps its exit code to a status.
///
/// Fails if the node reports a governor violation, which aborts the whole run.
async fn start_node(
    remote: &dyn RemoteExecutor,
    node: &Node,
    command: String,
) -> RunResult<RunStatus> {
    match remote.run_command(node, &command).await {
        Ok(code) => match RunStatus::from_exit_code(code) {
            RunStatus::Aborted => {
                tracing::error!(node = node.name(), "node exceeded the maximum request rate");
                Err(RunError::GovernorViolation {
                    node: node.name().to_owned(),
                })
            }
            RunStatus::Valid => Ok(RunStatus::Valid),
            status => {
                tracing::warn!(node = node.name(), code, %status, "node reported degraded results");
                Ok(status)
            }
        },
        Err(error) => {
            tracing::error!(node = node.name(), %error, "failed to run node");
            Ok(RunStatus::Invalid)
        }
    }
}

struct CollectedLogs {
    req: ReqLog,
    detail: DetailLog,
    degraded: Vec<String>,
}

/// Fetches and parses the logs of every node.
///
/// A node whose logs cannot be fetched or parsed is skipped and reported as degraded.
async fn collect_logs(
    run: &str,
    nodes: &[Node],
    remote: &dyn RemoteExecutor,
    settings: &RunSettings,
) -> RunResult<CollectedLogs> {
    let mut logs = CollectedLogs {
        req: ReqLog::new(),
        detail: DetailLog::new(),
        degraded: Vec::new(),
    };

    let mut usable = 0;
    for node in nodes {
        let timelog = settings
            .results_dir
            .join(format!("{run}_{}_timelog.csv", node.name()));
        let detail_timelog = settings
            .results_dir
            .join(format!("{run}_{}_detailtimelog.csv", node.name()));

        let fetched = async {
            remote
                .fetch_file(node, &settings.remote_path(TIMELOG_FILE), &timelog)
                .await?;
            remote
                .fetch_file(node, &settings.remote_path(DETAIL_TIMELOG_FILE), &detail_timelog)
                .await?;
            let req = ReqLog::read(&timelog).await?;
            let detail = DetailLog::read(&detail_timelog).await?;
            Ok::<_, RunError>((req, detail))
        }
        .await;

        match fetched {
            Ok((req, detail)) => {
                usable += 1;
                logs.req.absorb(req);
                logs.detail.absorb(detail);
            }
            Err(error) => {
                tracing::warn!(node = node.name(), %error, "skipping logs of node");
                logs.degraded.push(node.name().to_owned());
            }
        }
    }

    if usable == 0 {
        return Err(RunError::NoLogs(run.to_owned()));
    }
    logs.detail.report_unmatched();
    Ok(logs)
}

async fn summarize(
    run: &str,
    nodes: &[Node],
    logs: CollectedLogs,
    status: RunStatus,
    load_duration: f64,
    settings: &RunSettings,
) -> RunResult<RunReport> {
    let aggregate = merge(&logs.req, &logs.detail);

    let path = settings.results_dir.join(format!("{run}_aggregate.csv"));
    let mut csv = String::new();
    for entry in aggregate.iter() {
        csv.push_str(&entry.to_string());
        csv.push('\n');
    }
    tokio::fs::write(&path, csv)
        .await
        .map_err(|source| RunError::Io { path, source })?;

    let mut engine = StatsEngine::new(aggregate, load_duration);
    let mut report = RunReport::compute(run, &mut engine, &logs.detail);
    report.nodes = nodes.iter().map(|n| n.name().to_owned()).collect();
    report.status = status;
    if !logs.degraded.is_empty() {
        report.status = report.status.combine(RunStatus::Skewed);
    }
    report.degraded_nodes = logs.degraded;

    tracing::info!(
        run,
        status = %report.status,
        tests = report.number_of_tests,
        passed = report.number_passed,
        "run finished"
    );
    Ok(report)
}

impl RunReport {
    /// Merges already retrieved logs and computes their report.
    ///
    /// `load_duration` defaults to the span from the first start to the last end of any
    /// end-to-end entry.
    pub fn analyze(
        name: &str,
        req: &ReqLog,
        detail: &DetailLog,
        load_duration: Option<f64>,
    ) -> Self {
        let aggregate = merge(req, detail);
        let load_duration = load_duration.unwrap_or_else(|| {
            let (first, last) = aggregate
                .end_to_end()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(first, last), e| {
                    (first.min(e.start_time), last.max(e.end_time))
                });
            if last > first { last - first } else { 0.0 }
        });

        let mut engine = StatsEngine::new(aggregate, load_duration);
        Self::compute(name, &mut engine, detail)
    }

    fn compute(name: &str, engine: &mut StatsEngine, detail: &DetailLog) -> Self {
        let end_to_end = engine.stats(Some(END_TO_END), &[]);

        let mut request_type_names: Vec<String> = engine
            .log()
            .end_to_end()
            .map(|e| e.request_type.clone())
            .collect();
        request_type_names.sort();
        request_type_names.dedup();
        let request_types = request_type_names
            .iter()
            .map(|name| (name.clone(), engine.stats(Some(END_TO_END), &[name.as_str()])))
            .collect();

        let event_names: Vec<String> = engine.event_counts().into_keys().map(str::to_owned).collect();
        let events = event_names
            .iter()
            .map(|name| (name.clone(), engine.stats(Some(name.as_str()), &[])))
            .collect();

        let percentiles = REPORTED_PERCENTILES
            .iter()
            .map(|&p| (format!("p{p}"), engine.percentile(p, Some(END_TO_END), &[])))
            .collect();

        Self {
            name: name.to_owned(),
            status: RunStatus::Valid,
            nodes: Vec::new(),
            degraded_nodes: Vec::new(),
            load_duration: engine.load_duration(),
            number_of_tests: engine.number_of_tests(),
            number_passed: engine.number_passed(),
            end_to_end,
            percentiles,
            request_types,
            events,
            unmatched_events: detail.unmatched().len(),
        }
    }
}
