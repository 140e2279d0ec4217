use tracing_subscriber::EnvFilter;

const CRATE_NAMES: &[&str] = &["loadgen", "loadgen_service", "loadgen_types"];

/// Initialize the logger for testing.
///
/// Logs go to the writer captured by the Rust test runner. Unless `RUST_LOG` says otherwise,
/// only the load generator's own crates log below `ERROR`. Repeated calls are no-ops.
///
/// # Example
///
/// ```
/// loadgen_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        CRATE_NAMES.iter().fold(EnvFilter::new("ERROR"), |filter, name| {
            filter.add_directive(format!("{name}=TRACE").parse().unwrap())
        })
    });

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
