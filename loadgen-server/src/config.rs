//! Configuration for the load generator.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `LG__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Environment variables use double underscores (`__`) to denote nested structures, for
//! example `LG__NODE__HARNESS="cucumber"` or `LG__LOGGING__LEVEL=debug`.
//!
//! A typical YAML file describes the machines, the request types and how they are driven:
//!
//! ```yaml
//! results_dir: /var/lib/loadgen
//!
//! provider:
//!   type: static
//!   nodes:
//!     node1: 10.0.0.11
//!     node2: 10.0.0.12
//!
//! request_types:
//!   Login:
//!     tags: ["@Logon"]
//!
//! distributions:
//!   morning:
//!     - [10.0, 1.0]
//!     - [10.0, 5.0]
//!
//! performance_profiles:
//!   LoginLoad:
//!     request_type: Login
//!     distribution: morning
//!
//! runs:
//!   nightly:
//!     type: performance
//!     profiles: [LoginLoad]
//! ```

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use loadgen_service::ramp::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_REQUEST_RATE};
use loadgen_service::{CommandProvider, Provider, Session, SshExecutor, StaticProvider};
use loadgen_types::{ConfigError, Distribution, RequestType};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "LG__";

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty for a terminal, simplified otherwise.
    Auto,
    /// Colored, human readable output.
    Pretty,
    /// Plain text without colors.
    Simplified,
    /// One JSON object per line.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level, `INFO` by default.
    ///
    /// `RUST_LOG` takes precedence if set.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format, `auto` by default.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// How the controller starts the node-side scheduler, and how that scheduler behaves.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Command starting the node-side scheduler on a node.
    pub command: String,
    /// Directory on the nodes holding profiles and logs.
    pub results_dir: String,
    /// Shell command executing one request. See `loadgen_service::harness`.
    pub harness: String,
    /// Hard ceiling on the per-node target rate. Exceeding it aborts the run.
    pub max_request_rate: f64,
    /// Number of in-flight requests per profile above which a warning is logged.
    pub max_in_flight: usize,
    /// Whether a profile that cannot keep up is stopped.
    pub abort_on_skew: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            command: "loadgen node".to_owned(),
            results_dir: "/tmp/loadgen".to_owned(),
            harness: "false".to_owned(),
            max_request_rate: DEFAULT_MAX_REQUEST_RATE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            abort_on_skew: false,
        }
    }
}

/// Remote execution through `ssh` and `scp`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Program running remote commands.
    pub program: String,
    /// Program copying files.
    pub copy_program: String,
    /// Login user, defaults to the program's own default.
    pub user: Option<String>,
    /// Extra options passed to both programs.
    pub options: Vec<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_owned(),
            copy_program: "scp".to_owned(),
            user: None,
            options: Vec::new(),
        }
    }
}

impl RemoteConfig {
    /// Creates the remote executor.
    pub fn executor(&self) -> SshExecutor {
        SshExecutor::new(
            &self.program,
            &self.copy_program,
            self.user.clone(),
            self.options.clone(),
        )
    }
}

/// Where nodes come from.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// A fixed set of existing machines.
    Static {
        /// IP addresses by node name.
        #[serde(default)]
        nodes: BTreeMap<String, String>,
    },
    /// Nodes created and destroyed per run by external commands.
    ///
    /// The commands may use the `{name}`, `{ip}` and `{seed}` placeholders.
    Command {
        /// Command creating a node.
        create: String,
        /// Command destroying a node.
        destroy: String,
        /// IP addresses assigned to created nodes in order.
        #[serde(default)]
        ip_pool: Vec<String>,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::Static {
            nodes: BTreeMap::new(),
        }
    }
}

impl ProviderConfig {
    /// Creates the provider.
    pub fn provider(&self) -> Box<dyn Provider> {
        match self {
            Self::Static { nodes } => Box::new(StaticProvider::new(nodes.clone())),
            Self::Command {
                create,
                destroy,
                ip_pool,
            } => Box::new(CommandProvider::new(create, destroy, ip_pool.clone())),
        }
    }
}

/// A request type as configured.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RequestTypeConfig {
    /// Tags selecting the scenarios of the harness.
    pub tags: Vec<String>,
    /// Color used when charting this request type.
    pub color: Option<String>,
}

/// A performance profile as configured.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct PerformanceProfileConfig {
    /// Name of the request type.
    pub request_type: String,
    /// Name of the distribution.
    pub distribution: String,
}

/// A named run.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunConfig {
    /// Drives performance profiles concurrently on all nodes.
    Performance {
        /// Names of the performance profiles.
        profiles: Vec<String>,
        /// Number of nodes created by dynamic providers.
        #[serde(default = "default_nodes")]
        nodes: usize,
        /// Whether created nodes survive the run.
        #[serde(default)]
        keep_nodes: bool,
    },
    /// Executes every request type of a functional profile once.
    Functional {
        /// Name of the functional profile.
        profile: String,
        /// Number of requests a node executes at the same time, unlimited if unset.
        #[serde(default)]
        max_requests_per_node: Option<NonZeroUsize>,
        /// Number of nodes created by dynamic providers.
        #[serde(default = "default_nodes")]
        nodes: usize,
        /// Whether created nodes survive the run.
        #[serde(default)]
        keep_nodes: bool,
    },
}

fn default_nodes() -> usize {
    1
}

/// Main configuration struct for the load generator.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Logging configuration.
    pub logging: Logging,
    /// Local directory receiving the results. Each run writes into `<results_dir>/<run>`.
    pub results_dir: PathBuf,
    /// Seed of a run's random generators. A random seed is chosen if unset.
    pub seed: Option<u64>,
    /// The node-side scheduler.
    pub node: NodeConfig,
    /// Remote execution.
    pub remote: RemoteConfig,
    /// Where nodes come from.
    pub provider: ProviderConfig,
    /// Request types by name.
    pub request_types: BTreeMap<String, RequestTypeConfig>,
    /// Distributions by name, as `[requests_per_sec, delta_minutes]` levels.
    pub distributions: BTreeMap<String, Vec<(f64, f64)>>,
    /// Performance profiles by name.
    pub performance_profiles: BTreeMap<String, PerformanceProfileConfig>,
    /// Functional profiles by name, as lists of request type names.
    pub functional_profiles: BTreeMap<String, Vec<String>>,
    /// Runs by name.
    pub runs: BTreeMap<String, RunConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: Logging::default(),
            results_dir: PathBuf::from("results"),
            seed: None,
            node: NodeConfig::default(),
            remote: RemoteConfig::default(),
            provider: ProviderConfig::default(),
            request_types: BTreeMap::new(),
            distributions: BTreeMap::new(),
            performance_profiles: BTreeMap::new(),
            functional_profiles: BTreeMap::new(),
            runs: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `args`)
    /// 3. Environment variables (prefixed with `LG__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Registers all configured definitions in a new [`Session`].
    pub fn session(&self) -> Result<Session, ConfigError> {
        let mut session = Session::new();

        for (name, config) in &self.request_types {
            let mut request_type = RequestType::new(name)?;
            for tag in &config.tags {
                request_type = request_type.with_tag(tag);
            }
            if let Some(color) = &config.color {
                request_type = request_type.with_color(color);
            }
            session.add_request_type(request_type)?;
        }
        for (name, levels) in &self.distributions {
            session.add_distribution(Distribution::ramp(name, levels.iter().copied())?)?;
        }
        for (name, profile) in &self.performance_profiles {
            session.add_performance_profile(name, &profile.request_type, &profile.distribution)?;
        }
        for (name, request_types) in &self.functional_profiles {
            session.add_functional_profile(name, request_types)?;
        }

        Ok(session)
    }

    /// Looks up a run.
    pub fn run(&self, name: &str) -> Result<&RunConfig, ConfigError> {
        self.runs.get(name).ok_or_else(|| ConfigError::Unknown {
            kind: "run",
            name: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();
            assert_eq!(config.results_dir, PathBuf::from("results"));
            assert_eq!(config.node.max_request_rate, 100.0);
            assert_eq!(config.node.max_in_flight, 1000);
            assert_eq!(config.logging.level, LevelFilter::INFO);
            assert_eq!(config.provider, ProviderConfig::default());
            assert!(config.seed.is_none());
            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LG__SEED", "42");
            jail.set_env("LG__LOGGING__LEVEL", "debug");
            jail.set_env("LG__LOGGING__FORMAT", "json");
            jail.set_env("LG__NODE__HARNESS", "cucumber --format progress");
            jail.set_env("LG__NODE__MAX_REQUEST_RATE", "5");
            jail.set_env("LG__PROVIDER__TYPE", "command");
            jail.set_env("LG__PROVIDER__CREATE", "vm create {name}");
            jail.set_env("LG__PROVIDER__DESTROY", "vm destroy {name}");

            let config = Config::load(None).unwrap();
            assert_eq!(config.seed, Some(42));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.node.harness, "cucumber --format progress");
            assert_eq!(config.node.max_request_rate, 5.0);
            assert_eq!(
                config.provider,
                ProviderConfig::Command {
                    create: "vm create {name}".into(),
                    destroy: "vm destroy {name}".into(),
                    ip_pool: vec![],
                }
            );
            assert!(config.provider.provider().is_dynamic());
            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            results_dir: /var/lib/loadgen
            provider:
                type: static
                nodes:
                    node1: 10.0.0.11
                    node2: 10.0.0.12
            request_types:
                Login:
                    tags: ["@Logon"]
                Search: {}
            distributions:
                morning:
                    - [10.0, 1.0]
                    - [10.0, 5.0]
            performance_profiles:
                LoginLoad:
                    request_type: Login
                    distribution: morning
            functional_profiles:
                Smoke: [Login, Search]
            runs:
                nightly:
                    type: performance
                    profiles: [LoginLoad]
                smoke:
                    type: functional
                    profile: Smoke
                    max_requests_per_node: 1
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.results_dir, PathBuf::from("/var/lib/loadgen"));
            assert_eq!(config.provider.provider().node_ips().len(), 2);

            let session = config.session().unwrap();
            let profile = session.performance_profile("LoginLoad").unwrap();
            assert_eq!(profile.request_type().tags(), ["@Logon"]);
            assert_eq!(profile.distribution().total_secs(), 360.0);
            assert_eq!(session.functional_profile("Smoke").unwrap().request_types().len(), 2);

            assert_eq!(
                config.run("smoke").unwrap(),
                &RunConfig::Functional {
                    profile: "Smoke".into(),
                    max_requests_per_node: NonZeroUsize::new(1),
                    nodes: 1,
                    keep_nodes: false,
                }
            );
            assert!(config.run("weekly").is_err());
            Ok(())
        });
    }

    #[test]
    fn rejects_dangling_profile_references() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "loadgen.yml",
                r#"
                performance_profiles:
                    LoginLoad:
                        request_type: Login
                        distribution: morning
                "#,
            )?;

            let config = Config::load(Some(Path::new("loadgen.yml"))).unwrap();
            assert_eq!(
                config.session().unwrap_err(),
                ConfigError::Unknown {
                    kind: "request type",
                    name: "Login".into()
                }
            );
            Ok(())
        });
    }
}
