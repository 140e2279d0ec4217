//! Human readable summaries printed at the end of a command.

use std::time::Duration;

use loadgen_service::Stats;
use loadgen_service::node::NodeReport;
use loadgen_service::run::RunReport;
use loadgen_service::status::RunStatus;
use yansi::Paint;

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(if value.is_finite() { value.max(0.0) } else { 0.0 })
}

fn print_status(status: RunStatus) {
    let label = format!("status: {status}");
    match status {
        RunStatus::Valid => println!("{}", label.bold().green()),
        RunStatus::Skewed => println!("{}", label.bold().yellow()),
        RunStatus::Invalid | RunStatus::Aborted => println!("{}", label.bold().red()),
    }
}

fn print_stats(label: &str, stats: &Stats) {
    print!("{} ({} entries", label.bold().green(), stats.count.bold());
    if stats.pct_passed.is_finite() {
        print!(", {:.2}% passed", stats.pct_passed);
    }
    println!(")");
    if stats.count == 0 {
        return;
    }
    print!(
        "  mean: {:.2?}; sd: {:.2?}; min: {:.2?}; max: {:.2?}",
        secs(stats.mean).bold(),
        secs(stats.sd),
        secs(stats.min),
        secs(stats.max)
    );
    match stats.reqrate {
        Some(rate) => println!("; {:.2} requests/s", rate.bold()),
        None => println!(),
    }
}

/// Prints the report of a controller run.
pub fn print_run(report: &RunReport) {
    println!();
    println!(
        "{} {} ({} nodes, {:.0?})",
        "## Run".bold(),
        report.name.bold().blue(),
        report.nodes.len(),
        secs(report.load_duration)
    );
    print_status(report.status);
    println!(
        "{} of {} requests passed",
        report.number_passed.bold(),
        report.number_of_tests
    );

    println!();
    print_stats("END TO END:", &report.end_to_end);
    let percentiles: Vec<_> = report
        .percentiles
        .iter()
        .filter_map(|(name, value)| value.map(|v| format!("{name}: {:.2?}", secs(v))))
        .collect();
    if !percentiles.is_empty() {
        println!("  {}", percentiles.join("; "));
    }

    if !report.request_types.is_empty() {
        println!();
        println!("{}", "## REQUEST TYPES".bold());
        for (name, stats) in &report.request_types {
            print_stats(&format!("{name}:"), stats);
        }
    }

    if !report.events.is_empty() {
        println!();
        println!("{}", "## EVENTS".bold());
        for (name, stats) in &report.events {
            print_stats(&format!("{name}:"), stats);
        }
    }

    if report.unmatched_events > 0 {
        println!();
        println!(
            "{}",
            format!("{} UNMATCHED EVENTS", report.unmatched_events)
                .bold()
                .yellow()
        );
    }
    if !report.degraded_nodes.is_empty() {
        println!(
            "{}",
            format!("DEGRADED NODES: {}", report.degraded_nodes.join(", "))
                .bold()
                .red()
        );
    }
    println!();
}

/// Prints the report of a node-side run.
pub fn print_node(name: &str, report: &NodeReport) {
    println!();
    println!(
        "{} {} ({} profiles, {:.2?})",
        "## Node".bold(),
        name.bold().blue(),
        report.profiles.len(),
        report.elapsed
    );
    print_status(report.status);

    for profile in &report.profiles {
        print!(
            "{} ({} requests",
            format!("{}:", profile.request_type).bold().green(),
            profile.dispatched.bold()
        );
        if profile.skewed {
            print!(", {}", "skewed".yellow());
        }
        println!(")");
    }

    let latency = &report.latency;
    println!(
        "{} of {} requests passed",
        report.passed.bold(),
        report.requests
    );
    if let (Some(avg), Some(p50), Some(p90), Some(p99)) =
        (latency.avg, latency.p50, latency.p90, latency.p99)
    {
        println!(
            "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
            avg.bold()
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_undefined_durations() {
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(1.5), Duration::from_millis(1500));
    }
}
