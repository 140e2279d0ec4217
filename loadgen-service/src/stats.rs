//! Descriptive statistics over an [`AggregateLog`].
//!
//! Numeric statistics only consider entries whose request passed. Every query takes an
//! optional event name (`None` selects all events) and a set of request type names (empty
//! selects all types).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use loadgen_types::{END_TO_END, WHOLE_TEST};
use serde::Serialize;

use crate::log::{AggregateLog, EntryKind, TimeLogEntry};

/// Statistics of the durations of a filtered set of entries.
///
/// Values that are undefined for an empty set are `NaN`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Stats {
    /// Number of eligible entries.
    pub count: usize,
    /// Percentage of end-to-end entries that passed.
    pub pct_passed: f64,
    /// Mean duration in seconds.
    pub mean: f64,
    /// Population standard deviation of the duration.
    pub sd: f64,
    /// Shortest duration.
    pub min: f64,
    /// Longest duration.
    pub max: f64,
    /// Observed requests per second, `None` if no request was counted.
    pub reqrate: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct StatsKey {
    event: Option<String>,
    request_types: BTreeSet<String>,
}

impl StatsKey {
    fn new(event: Option<&str>, request_types: &[&str]) -> Self {
        Self {
            event: event.map(str::to_owned),
            request_types: request_types.iter().map(|&s| s.to_owned()).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Window {
    from: Option<f64>,
    to: Option<f64>,
}

impl Window {
    fn contains(self, time: f64) -> bool {
        self.from.is_none_or(|from| time >= from) && self.to.is_none_or(|to| time <= to)
    }
}

fn is_reserved(name: &str) -> bool {
    name == END_TO_END || name == WHOLE_TEST
}

/// Computes and memoizes statistics for one run.
#[derive(Debug)]
pub struct StatsEngine {
    log: AggregateLog,
    load_duration: f64,
    cache: HashMap<StatsKey, Stats>,
}

impl StatsEngine {
    /// Creates an engine over a merged log.
    ///
    /// `load_duration` is the length of the run in seconds, used as the default end of the
    /// window for request rates.
    pub fn new(log: AggregateLog, load_duration: f64) -> Self {
        Self {
            log,
            load_duration,
            cache: HashMap::new(),
        }
    }

    /// Returns the underlying log.
    pub fn log(&self) -> &AggregateLog {
        &self.log
    }

    /// Returns the length of the run in seconds.
    pub fn load_duration(&self) -> f64 {
        self.load_duration
    }

    /// Returns the statistics for the given filter, computing them on first use.
    pub fn stats(&mut self, event: Option<&str>, request_types: &[&str]) -> Stats {
        let key = StatsKey::new(event, request_types);
        if let Some(stats) = self.cache.get(&key) {
            return stats.clone();
        }

        let stats = self.compute(&key, Window::default());
        self.cache.insert(key, stats.clone());
        stats
    }

    /// Computes statistics restricted to entries starting within `[from, to]` seconds.
    ///
    /// The window applies to every value, including the pass rate and the request rate.
    /// Results are not memoized.
    pub fn stats_between(
        &self,
        from: Option<f64>,
        to: Option<f64>,
        event: Option<&str>,
        request_types: &[&str],
    ) -> Stats {
        let key = StatsKey::new(event, request_types);
        self.compute(&key, Window { from, to })
    }

    fn selected<'a>(
        &'a self,
        key: &'a StatsKey,
        window: Window,
    ) -> impl Iterator<Item = &'a TimeLogEntry> + 'a {
        self.log.iter().filter(move |e| {
            (key.request_types.is_empty() || key.request_types.contains(&e.request_type))
                && key.event.as_ref().is_none_or(|name| &e.name == name)
                && window.contains(e.start_time)
        })
    }

    fn compute(&self, key: &StatsKey, window: Window) -> Stats {
        let durations: Vec<f64> = self
            .selected(key, window)
            .filter(|e| e.passed())
            .map(|e| e.duration)
            .collect();
        let n = durations.len();

        let (mean, sd, min, max) = if n == 0 {
            (f64::NAN, f64::NAN, f64::NAN, f64::NAN)
        } else {
            let mean = durations.iter().sum::<f64>() / n as f64;
            let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64;
            let min = durations.iter().copied().fold(f64::INFINITY, f64::min);
            let max = durations.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (mean, variance.sqrt(), min, max)
        };

        let requests = self
            .selected(key, window)
            .filter(|e| e.passed() && !is_reserved(&e.name))
            .count();
        let from = window.from.unwrap_or(0.0);
        let to = window.to.unwrap_or(self.load_duration);
        let reqrate = (requests > 0).then(|| requests as f64 / (to - from));

        Stats {
            count: n,
            pct_passed: self.pct_passed_within(&key.request_types, window),
            mean,
            sd,
            min,
            max,
            reqrate,
        }
    }

    fn pct_passed_within(&self, request_types: &BTreeSet<String>, window: Window) -> f64 {
        let (attempted, passed) = self
            .log
            .end_to_end()
            .filter(|e| request_types.is_empty() || request_types.contains(&e.request_type))
            .filter(|e| window.contains(e.start_time))
            .fold((0usize, 0usize), |(attempted, passed), e| {
                (attempted + 1, passed + usize::from(e.passed()))
            });

        if attempted == 0 {
            f64::NAN
        } else {
            passed as f64 / attempted as f64 * 100.0
        }
    }

    /// Returns the percentage of end-to-end entries of the given types that passed.
    pub fn pct_passed(&self, request_types: &[&str]) -> f64 {
        let key = StatsKey::new(None, request_types);
        self.pct_passed_within(&key.request_types, Window::default())
    }

    /// Returns the durations of passed entries in ascending order.
    pub fn sorted_durations(&self, event: Option<&str>, request_types: &[&str]) -> Vec<f64> {
        let key = StatsKey::new(event, request_types);
        let mut durations: Vec<f64> = self
            .selected(&key, Window::default())
            .filter(|e| e.passed())
            .map(|e| e.duration)
            .collect();
        durations.sort_by(f64::total_cmp);
        durations
    }

    /// Returns the `percent`-th percentile of passed durations by the nearest-rank method.
    ///
    /// The value at index `floor(percent / 100 * (n - 1))` of the sorted durations is
    /// returned without interpolation. Returns `None` if there are no eligible entries.
    pub fn percentile(
        &self,
        percent: f64,
        event: Option<&str>,
        request_types: &[&str],
    ) -> Option<f64> {
        let durations = self.sorted_durations(event, request_types);
        if durations.is_empty() {
            return None;
        }
        let index = (percent.clamp(0.0, 100.0) / 100.0 * (durations.len() - 1) as f64).floor();
        durations.get(index as usize).copied()
    }

    /// Returns the start time of the first matching entry.
    pub fn earliest_time(&self, event: Option<&str>, request_types: &[&str]) -> Option<f64> {
        let key = StatsKey::new(event, request_types);
        self.selected(&key, Window::default())
            .next()
            .map(|e| e.start_time)
    }

    /// Returns the start time of the last matching entry.
    pub fn latest_time(&self, event: Option<&str>, request_types: &[&str]) -> Option<f64> {
        let key = StatsKey::new(event, request_types);
        self.selected(&key, Window::default())
            .last()
            .map(|e| e.start_time)
    }

    /// Returns the mean duration of entries starting between `from_minutes` and
    /// `to_minutes` after the first matching entry.
    pub fn avg_response_time_between(
        &self,
        from_minutes: f64,
        to_minutes: f64,
        event: Option<&str>,
        request_types: &[&str],
    ) -> f64 {
        let Some(origin) = self.earliest_time(event, request_types) else {
            return f64::NAN;
        };
        self.stats_between(
            Some(origin + from_minutes * 60.0),
            Some(origin + to_minutes * 60.0),
            event,
            request_types,
        )
        .mean
    }

    /// Returns the mean duration of entries starting from `from_minutes` after the first
    /// matching entry through the last one.
    pub fn avg_response_time_after(
        &self,
        from_minutes: f64,
        event: Option<&str>,
        request_types: &[&str],
    ) -> f64 {
        let (Some(earliest), Some(latest)) = (
            self.earliest_time(event, request_types),
            self.latest_time(event, request_types),
        ) else {
            return f64::NAN;
        };
        self.avg_response_time_between(
            from_minutes,
            (latest - earliest) / 60.0,
            event,
            request_types,
        )
    }

    /// Returns the observed request rate between `from` and `to` seconds.
    ///
    /// The window defaults to the whole run. Unlike [`Stats::reqrate`] this is zero rather
    /// than absent when nothing was counted.
    pub fn avg_request_rate(
        &self,
        from: Option<f64>,
        to: Option<f64>,
        event: Option<&str>,
        request_types: &[&str],
    ) -> f64 {
        self.stats_between(from, to, event, request_types)
            .reqrate
            .unwrap_or(0.0)
    }

    /// Returns the number of executed requests.
    pub fn number_of_tests(&self) -> usize {
        self.log.end_to_end().count()
    }

    /// Returns the number of requests that passed.
    pub fn number_passed(&self) -> usize {
        self.log.end_to_end().filter(|e| e.passed()).count()
    }

    /// Returns the names of all detail events with their number of entries.
    pub fn event_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.log.iter().filter(|e| e.kind == EntryKind::Detail) {
            *counts.entry(entry.name.as_str()).or_default() += 1;
        }
        counts
    }
}
