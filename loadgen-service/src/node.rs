//! The node-side scheduler.
//!
//! A [`NodeRunner`] executes the profile files pushed by the controller. Every profile runs
//! in its own task: performance profiles through a [`RampScheduler`], functional profiles as
//! a single request. Each completed request is appended to the node's `timelog.csv`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loadgen_types::{Outcome, ProfileDefinition, ProfileKind};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sketches_ddsketch::DDSketch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{RunError, RunResult, SchedulerError};
use crate::harness::{Harness, RequestContext};
use crate::log::TimeLogEntry;
use crate::ramp::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_REQUEST_RATE, ProfileReport, RampScheduler};
use crate::record::{DETAIL_TIMELOG_FILE, EventRecorder, TIMELOG_FILE};
use crate::status::RunStatus;

/// Settings of one node's run, passed explicitly by the controller.
#[derive(Clone, Debug)]
pub struct NodeOptions {
    /// Name of the node, used to make request ids unique across nodes.
    pub name: String,
    /// Directory the logs are written to.
    pub results_dir: PathBuf,
    /// Seed from which every profile's random generator is derived.
    pub seed: u64,
    /// Whether falling behind a profile stops it.
    pub abort_on_skew: bool,
    /// Hard ceiling on the target rate of any profile.
    pub max_request_rate: f64,
    /// Number of in-flight requests above which a warning is logged.
    pub max_in_flight: usize,
    /// Whether to truncate existing logs before starting.
    pub fresh: bool,
}

impl NodeOptions {
    /// Creates options with default limits.
    pub fn new(name: impl Into<String>, results_dir: impl Into<PathBuf>, seed: u64) -> Self {
        Self {
            name: name.into(),
            results_dir: results_dir.into(),
            seed,
            abort_on_skew: false,
            max_request_rate: DEFAULT_MAX_REQUEST_RATE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            fresh: false,
        }
    }
}

/// Percentiles of the request latencies of a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LatencySummary {
    /// Number of completed requests.
    pub count: usize,
    /// Mean latency.
    pub avg: Option<Duration>,
    /// Median latency.
    pub p50: Option<Duration>,
    /// 90th percentile.
    pub p90: Option<Duration>,
    /// 99th percentile.
    pub p99: Option<Duration>,
}

impl LatencySummary {
    fn from_sketch(sketch: &DDSketch) -> Self {
        let count = sketch.count();
        let quantile = |q| {
            sketch
                .quantile(q)
                .ok()
                .flatten()
                .map(|secs: f64| Duration::from_secs_f64(secs.max(0.0)))
        };
        Self {
            count,
            avg: sketch
                .sum()
                .filter(|_| count > 0)
                .map(|sum| Duration::from_secs_f64((sum / count as f64).max(0.0))),
            p50: quantile(0.5),
            p90: quantile(0.9),
            p99: quantile(0.99),
        }
    }
}

/// Outcome of a node's run.
#[derive(Clone, Debug)]
pub struct NodeReport {
    /// Combined status of all profiles.
    pub status: RunStatus,
    /// Per-profile summaries of the profiles that completed.
    pub profiles: Vec<ProfileReport>,
    /// Number of requests executed.
    pub requests: u64,
    /// Number of requests that passed.
    pub passed: u64,
    /// Latency percentiles over all requests.
    pub latency: LatencySummary,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// State shared by all requests of a node's run.
struct RequestShared {
    node: String,
    clock: Instant,
    harness: Arc<dyn Harness>,
    recorder: EventRecorder,
    next_id: AtomicU64,
    passed: AtomicU64,
    record_failed: AtomicBool,
    latencies: Mutex<DDSketch>,
}

impl RequestShared {
    /// Executes one request and appends its end-to-end record.
    async fn execute(&self, request_type: &str, tags: &str, rate: f64) {
        let id = format!("{}-{}", self.node, self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let context = RequestContext {
            request_type: request_type.to_owned(),
            id: id.clone(),
            rate,
            tags: tags.to_owned(),
        };

        let start = self.clock.elapsed();
        let success = match self.harness.run_one_request(&context).await {
            Ok(success) => success,
            Err(error) => {
                tracing::warn!(
                    request_type,
                    id = id.as_str(),
                    %error,
                    "harness failed to execute request"
                );
                false
            }
        };
        let end = self.clock.elapsed();

        if success {
            self.passed.fetch_add(1, Ordering::Relaxed);
        }
        self.latencies
            .lock()
            .unwrap()
            .add((end - start).as_secs_f64());

        let entry = TimeLogEntry::end_to_end(
            request_type,
            id,
            rate,
            start.as_secs_f64(),
            end.as_secs_f64(),
            Outcome::from_success(success),
        );
        if let Err(error) = self.recorder.record_request(&entry).await {
            tracing::error!(%error, "failed to record request");
            self.record_failed.store(true, Ordering::Relaxed);
        }
    }
}

/// Runs the profiles of one node.
#[derive(Debug)]
pub struct NodeRunner {
    options: NodeOptions,
    harness: Arc<dyn Harness>,
}

impl NodeRunner {
    /// Creates a runner executing requests through `harness`.
    pub fn new(options: NodeOptions, harness: Arc<dyn Harness>) -> Self {
        Self { options, harness }
    }

    /// Reads a profile file.
    pub async fn load_profile(path: &Path) -> RunResult<ProfileDefinition> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RunError::Io {
                path: path.to_owned(),
                source,
            })?;
        Ok(text.parse()?)
    }

    /// Runs all profiles concurrently and waits for them to finish.
    ///
    /// A governor violation in any profile aborts all other profiles and reports the run as
    /// [`Aborted`](RunStatus::Aborted). A profile that cannot keep up makes the run skewed.
    pub async fn run(&self, profiles: Vec<ProfileDefinition>) -> RunResult<NodeReport> {
        let timelog = self.options.results_dir.join(TIMELOG_FILE);
        let recorder = EventRecorder::open(timelog, self.options.fresh).await?;
        // The harness appends detail events itself; the file must exist for retrieval.
        let detail = self.options.results_dir.join(DETAIL_TIMELOG_FILE);
        EventRecorder::open(detail, self.options.fresh).await?;

        let shared = Arc::new(RequestShared {
            node: self.options.name.clone(),
            clock: Instant::now(),
            harness: Arc::clone(&self.harness),
            recorder,
            next_id: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            record_failed: AtomicBool::new(false),
            latencies: Mutex::new(DDSketch::default()),
        });

        tracing::info!(
            node = %self.options.name,
            profiles = profiles.len(),
            seed = self.options.seed,
            "starting node run"
        );

        let mut seeds = SmallRng::seed_from_u64(self.options.seed);
        let mut tasks = JoinSet::new();
        for profile in profiles {
            let seed = seeds.random::<u64>();
            let shared = Arc::clone(&shared);
            match profile.kind {
                ProfileKind::Performance => {
                    let distribution = profile.distribution()?;
                    let scheduler = RampScheduler::builder(&profile.request_type, distribution)
                        .seed(seed)
                        .abort_on_skew(self.options.abort_on_skew)
                        .max_request_rate(self.options.max_request_rate)
                        .max_in_flight(self.options.max_in_flight)
                        .build();
                    let request_type: Arc<str> = profile.request_type.as_str().into();
                    let tags: Arc<str> = profile.tag_string().into();

                    tasks.spawn(scheduler.run(move |dispatch| {
                        let shared = Arc::clone(&shared);
                        let request_type = Arc::clone(&request_type);
                        let tags = Arc::clone(&tags);
                        async move { shared.execute(&request_type, &tags, dispatch.rate).await }
                    }));
                }
                ProfileKind::Functional => {
                    tasks.spawn(async move {
                        let started = Instant::now();
                        shared
                            .execute(&profile.request_type, &profile.tag_string(), 0.0)
                            .await;
                        Ok(ProfileReport {
                            request_type: profile.request_type,
                            dispatched: 1,
                            skewed: false,
                            elapsed: started.elapsed(),
                        })
                    });
                }
            }
        }

        let mut status = RunStatus::Valid;
        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(report)) => {
                    if report.skewed {
                        status = status.combine(RunStatus::Skewed);
                    }
                    reports.push(report);
                }
                Ok(Err(error @ SchedulerError::CannotKeepUp { .. })) => {
                    tracing::warn!(%error, "profile stopped");
                    status = status.combine(RunStatus::Skewed);
                }
                Ok(Err(error)) => {
                    tracing::error!(%error, "aborting node run");
                    status = status.combine(if error.is_fatal() {
                        RunStatus::Aborted
                    } else {
                        RunStatus::Invalid
                    });
                    tasks.abort_all();
                }
                Err(error) if error.is_cancelled() => {}
                Err(error) => {
                    tracing::error!(%error, "profile task panicked");
                    status = status.combine(RunStatus::Invalid);
                }
            }
        }

        if shared.record_failed.load(Ordering::Relaxed) {
            status = status.combine(RunStatus::Invalid);
        }

        let latency = LatencySummary::from_sketch(&shared.latencies.lock().unwrap());
        let report = NodeReport {
            status,
            profiles: reports,
            requests: shared.next_id.load(Ordering::Relaxed),
            passed: shared.passed.load(Ordering::Relaxed),
            latency,
            elapsed: shared.clock.elapsed(),
        };

        tracing::info!(
            node = %self.options.name,
            status = %report.status,
            requests = report.requests,
            passed = report.passed,
            "node run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use loadgen_types::{Distribution, RequestType};

    use super::*;
    use crate::error::CollaboratorError;
    use crate::log::ReqLog;

    #[derive(Debug)]
    struct AlwaysPass;

    #[async_trait]
    impl Harness for AlwaysPass {
        async fn run_one_request(&self, _: &RequestContext) -> Result<bool, CollaboratorError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(true)
        }
    }

    #[derive(Debug)]
    struct Unavailable;

    #[async_trait]
    impl Harness for Unavailable {
        async fn run_one_request(&self, _: &RequestContext) -> Result<bool, CollaboratorError> {
            Err(CollaboratorError::Unsupported("harness unavailable"))
        }
    }

    fn functional(name: &str) -> ProfileDefinition {
        ProfileDefinition::functional(&RequestType::new(name).unwrap())
    }

    #[tokio::test]
    async fn functional_profiles_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let runner = NodeRunner::new(NodeOptions::new("n1", dir.path(), 1), Arc::new(AlwaysPass));

        let report = runner
            .run(vec![functional("Login"), functional("Search")])
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Valid);
        assert_eq!(report.requests, 2);
        assert_eq!(report.passed, 2);
        assert_eq!(report.latency.count, 2);

        let log = ReqLog::read(&dir.path().join(TIMELOG_FILE)).await.unwrap();
        let mut ids: Vec<_> = log.log().iter().map(|e| e.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, ["n1-1", "n1-2"]);
        assert!(dir.path().join(DETAIL_TIMELOG_FILE).exists());
    }

    #[tokio::test]
    async fn harness_errors_count_as_failures() {
        let dir = tempfile::tempdir().unwrap();
        let runner = NodeRunner::new(NodeOptions::new("n1", dir.path(), 1), Arc::new(Unavailable));

        let report = runner.run(vec![functional("Login")]).await.unwrap();
        assert_eq!(report.status, RunStatus::Valid);
        assert_eq!(report.passed, 0);

        let log = ReqLog::read(&dir.path().join(TIMELOG_FILE)).await.unwrap();
        assert_eq!(log.number_passed(), 0);
        assert_eq!(log.number_of_tests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn governor_violation_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = NodeOptions::new("n1", dir.path(), 1);
        options.max_request_rate = 5.0;
        let runner = NodeRunner::new(options, Arc::new(AlwaysPass));

        let login = RequestType::new("Login").unwrap();
        let fast = Distribution::ramp("fast", [(10.0, 1.0)]).unwrap();
        let slow = Distribution::ramp("slow", [(1.0, 10.0)]).unwrap();
        let report = runner
            .run(vec![
                ProfileDefinition::performance(&login, &fast, 1),
                ProfileDefinition::performance(&login, &slow, 1),
            ])
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Aborted);
        // The slow profile was aborted along with the violating one.
        assert!(report.profiles.is_empty());
        assert!(report.elapsed < Duration::from_secs(600));
    }

    #[tokio::test]
    async fn fresh_run_truncates_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = NodeOptions::new("n1", dir.path(), 1);

        NodeRunner::new(options.clone(), Arc::new(AlwaysPass))
            .run(vec![functional("Login")])
            .await
            .unwrap();
        NodeRunner::new(options.clone(), Arc::new(AlwaysPass))
            .run(vec![functional("Login")])
            .await
            .unwrap();
        let path = dir.path().join(TIMELOG_FILE);
        assert_eq!(ReqLog::read(&path).await.unwrap().number_of_tests(), 2);

        options.fresh = true;
        NodeRunner::new(options, Arc::new(AlwaysPass))
            .run(vec![functional("Login")])
            .await
            .unwrap();
        assert_eq!(ReqLog::read(&path).await.unwrap().number_of_tests(), 1);
    }

    #[tokio::test]
    async fn loads_profile_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("login.profile");
        std::fs::write(&path, "PerformanceProfile Login\n--tags @Logon\n2, 1\n").unwrap();

        let profile = NodeRunner::load_profile(&path).await.unwrap();
        assert_eq!(profile.kind, ProfileKind::Performance);
        assert_eq!(profile.tags, ["@Logon"]);

        std::fs::write(&path, "PerformanceProfile Login\n\n2, 0\n").unwrap();
        assert!(matches!(
            NodeRunner::load_profile(&path).await,
            Err(RunError::Config(_))
        ));
    }
}
