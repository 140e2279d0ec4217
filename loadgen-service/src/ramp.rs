//! Rate driven dispatch of requests following a ramp [`Distribution`].
//!
//! Within each level the target rate grows linearly from the rate of the previous level to
//! the rate of the current one. Arrival times are sampled from the resulting non-homogeneous
//! Poisson process, see [`icdf`](crate::icdf). Requests are dispatched onto a [`JoinSet`] so
//! that slow requests never hold up the schedule.

use std::future::Future;
use std::time::Duration;

use loadgen_types::Distribution;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};

use crate::error::SchedulerError;
use crate::icdf;

/// Default ceiling on the request rate of a single profile, in requests per second.
pub const DEFAULT_MAX_REQUEST_RATE: f64 = 100.0;

/// Default number of in-flight requests above which a warning is logged.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1000;

/// A request handed to the dispatch function.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dispatch {
    /// Zero-based sequence number of the request within its profile.
    pub sequence: u64,
    /// Target request rate at the moment of dispatch.
    pub rate: f64,
}

/// Summary of a completed profile.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileReport {
    /// The request type driven by the profile.
    pub request_type: String,
    /// Number of requests dispatched.
    pub dispatched: u64,
    /// Whether the schedule fell behind at least once.
    pub skewed: bool,
    /// Wall time from the first level until all requests completed.
    pub elapsed: Duration,
}

/// Builder for a [`RampScheduler`].
#[derive(Debug)]
pub struct RampSchedulerBuilder {
    request_type: String,
    distribution: Distribution,
    seed: Option<u64>,
    abort_on_skew: bool,
    max_request_rate: f64,
    max_in_flight: usize,
}

impl RampSchedulerBuilder {
    /// Seeds the random generator, making the schedule reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fails the profile instead of only marking it skewed when the schedule falls behind.
    pub fn abort_on_skew(mut self, abort: bool) -> Self {
        self.abort_on_skew = abort;
        self
    }

    /// Sets the hard ceiling on the target rate. Exceeding it aborts the run.
    pub fn max_request_rate(mut self, max: f64) -> Self {
        self.max_request_rate = max;
        self
    }

    /// Sets the number of in-flight requests above which a warning is logged.
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Creates the scheduler.
    pub fn build(self) -> RampScheduler {
        let rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_rng(&mut rand::rng()),
        };

        RampScheduler {
            request_type: self.request_type,
            distribution: self.distribution,
            rng,
            abort_on_skew: self.abort_on_skew,
            max_request_rate: self.max_request_rate,
            max_in_flight: self.max_in_flight,
        }
    }
}

/// Drives one request type along one distribution.
#[derive(Debug)]
pub struct RampScheduler {
    request_type: String,
    distribution: Distribution,
    rng: SmallRng,
    abort_on_skew: bool,
    max_request_rate: f64,
    max_in_flight: usize,
}

impl RampScheduler {
    /// Returns a builder for a scheduler of `request_type` along `distribution`.
    pub fn builder(
        request_type: impl Into<String>,
        distribution: Distribution,
    ) -> RampSchedulerBuilder {
        RampSchedulerBuilder {
            request_type: request_type.into(),
            distribution,
            seed: None,
            abort_on_skew: false,
            max_request_rate: DEFAULT_MAX_REQUEST_RATE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Runs all levels, calling `dispatch` at every sampled arrival.
    ///
    /// The future returned by `dispatch` is spawned and not awaited by the loop. Once the
    /// last level ended, this waits for all spawned requests before returning.
    ///
    /// A governor violation aborts all in-flight requests and returns immediately. A
    /// keep-up failure, if enabled, stops scheduling but still waits for requests that are
    /// already running.
    pub async fn run<F, Fut>(mut self, mut dispatch: F) -> Result<ProfileReport, SchedulerError>
    where
        F: FnMut(Dispatch) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let started = Instant::now();
        let mut tasks = JoinSet::new();
        let mut dispatched = 0u64;
        let mut skewed = false;
        let mut over_limit = false;
        let mut outcome = Ok(());

        let mut initial_rate = 0.0;
        'levels: for (number, level) in self.distribution.levels().iter().enumerate() {
            let duration = level.duration_secs();
            let slope = (level.rate - initial_rate) / duration;
            let level_start = Instant::now();
            let level_end = level_start + Duration::from_secs_f64(duration);
            tracing::info!(
                request_type = %self.request_type,
                level = number + 1,
                from = initial_rate,
                to = level.rate,
                seconds = duration,
                "starting level"
            );

            // Dispatch latency of the previous iteration.
            let mut latency = 0.0;
            loop {
                let now = Instant::now();
                let elapsed = now.duration_since(level_start).as_secs_f64();
                let rate = initial_rate + slope * elapsed;

                if rate > self.max_request_rate {
                    tasks.abort_all();
                    tracing::error!(
                        request_type = %self.request_type,
                        rate,
                        max = self.max_request_rate,
                        "request rate exceeds governor limit"
                    );
                    return Err(SchedulerError::GovernorViolation {
                        rate,
                        max: self.max_request_rate,
                    });
                }

                let remaining = duration - elapsed;
                if remaining <= 0.0 {
                    break;
                }

                let u: f64 = self.rng.random();
                let Some(delta) = icdf::next_arrival(slope, rate, u, remaining) else {
                    sleep_until(level_end).await;
                    break;
                };

                let dispatch_at = now + Duration::from_secs_f64(delta);
                if delta < latency || dispatch_at < Instant::now() {
                    if !skewed {
                        tracing::warn!(
                            request_type = %self.request_type,
                            rate,
                            required = delta,
                            observed = latency,
                            "node cannot keep up with profile"
                        );
                    }
                    skewed = true;

                    if self.abort_on_skew {
                        outcome = Err(SchedulerError::CannotKeepUp {
                            request_type: self.request_type.clone(),
                            rate,
                            required: delta,
                            observed: latency,
                        });
                        break 'levels;
                    }
                }

                sleep_until(dispatch_at).await;
                let fired = Instant::now();
                let rate = initial_rate + slope * fired.duration_since(level_start).as_secs_f64();

                tasks.spawn(dispatch(Dispatch {
                    sequence: dispatched,
                    rate,
                }));
                dispatched += 1;

                while let Some(result) = tasks.try_join_next() {
                    log_join_error(&self.request_type, result);
                }
                if tasks.len() > self.max_in_flight {
                    if !over_limit {
                        tracing::warn!(
                            request_type = %self.request_type,
                            in_flight = tasks.len(),
                            max = self.max_in_flight,
                            "too many requests in flight"
                        );
                    }
                    over_limit = true;
                } else {
                    over_limit = false;
                }

                latency = fired.elapsed().as_secs_f64();
            }

            tracing::info!(
                request_type = %self.request_type,
                level = number + 1,
                dispatched,
                "completed level"
            );
            initial_rate = level.rate;
        }

        tracing::debug!(
            request_type = %self.request_type,
            in_flight = tasks.len(),
            "waiting for requests to complete"
        );
        while let Some(result) = tasks.join_next().await {
            log_join_error(&self.request_type, result);
        }

        outcome?;
        Ok(ProfileReport {
            request_type: self.request_type,
            dispatched,
            skewed,
            elapsed: started.elapsed(),
        })
    }
}

fn log_join_error(request_type: &str, result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        if error.is_panic() {
            tracing::error!(request_type, "request task panicked");
        }
    }
}
