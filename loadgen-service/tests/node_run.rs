use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loadgen_service::CollaboratorError;
use loadgen_service::harness::{Harness, RequestContext};
use loadgen_service::log::{DetailLog, ReqLog, merge};
use loadgen_service::node::{NodeOptions, NodeRunner};
use loadgen_service::record::TIMELOG_FILE;
use loadgen_service::{RunStatus, StatsEngine};
use loadgen_types::{Distribution, END_TO_END, ProfileDefinition, RequestType};

/// Sleeps for a varying, known duration and passes every request.
#[derive(Debug, Default)]
struct StubHarness {
    counter: AtomicU64,
    fed: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Harness for StubHarness {
    async fn run_one_request(&self, _: &RequestContext) -> Result<bool, CollaboratorError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let duration = Duration::from_millis(20 + (n % 7) * 15);
        self.fed.lock().unwrap().push(duration);
        tokio::time::sleep(duration).await;
        Ok(true)
    }
}

#[tokio::test(start_paused = true)]
async fn ramp_and_hold_matches_harness_durations() {
    loadgen_test::tracing::init();

    let dir = tempfile::tempdir().unwrap();
    let harness = Arc::new(StubHarness::default());
    let runner = NodeRunner::new(
        NodeOptions::new("n1", dir.path(), 42),
        Arc::clone(&harness) as Arc<dyn Harness>,
    );

    let login = RequestType::new("Login").unwrap();
    let distribution = Distribution::ramp("ramp-hold", [(10.0, 1.0), (10.0, 5.0)]).unwrap();
    let report = runner
        .run(vec![ProfileDefinition::performance(&login, &distribution, 1)])
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Valid);

    let req = ReqLog::read(&dir.path().join(TIMELOG_FILE)).await.unwrap();
    let aggregate = merge(&req, &DetailLog::new());
    let mut engine = StatsEngine::new(aggregate, distribution.total_secs());
    let stats = engine.stats(Some(END_TO_END), &[]);

    let fed = harness.fed.lock().unwrap().clone();
    // 300 requests while ramping up plus 3000 while holding.
    assert!((3000..3600).contains(&fed.len()), "{}", fed.len());
    assert_eq!(stats.count, fed.len());
    assert_eq!(stats.pct_passed, 100.0);

    let expected = fed.iter().map(Duration::as_secs_f64).sum::<f64>() / fed.len() as f64;
    assert!((stats.mean - expected).abs() < 2e-3, "{} != {expected}", stats.mean);
    assert!(stats.min >= 0.020 - 1e-3);
    assert!(stats.max <= 0.110 + 1e-3);
}

#[tokio::test(start_paused = true)]
async fn profiles_share_request_ids() {
    let dir = tempfile::tempdir().unwrap();
    let runner = NodeRunner::new(
        NodeOptions::new("n7", dir.path(), 3),
        Arc::new(StubHarness::default()),
    );

    let distribution = Distribution::ramp("short", [(2.0, 0.5)]).unwrap();
    let profiles = ["Login", "Search"]
        .into_iter()
        .map(|name| {
            let request_type = RequestType::new(name).unwrap();
            ProfileDefinition::performance(&request_type, &distribution, 1)
        })
        .collect();
    let report = runner.run(profiles).await.unwrap();

    let req = ReqLog::read(&dir.path().join(TIMELOG_FILE)).await.unwrap();
    let mut ids: Vec<_> = req.log().iter().map(|e| e.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len() as u64, report.requests);
    assert!(ids.iter().all(|id| id.starts_with("n7-")));
}
