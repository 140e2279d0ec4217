//! Provisioning of the nodes a run executes on.
//!
//! A [`Provider`] either exposes a fixed set of machines ([`StaticProvider`]) or creates and
//! destroys them on demand by running an external tool ([`CommandProvider`]).

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::process;

/// A machine that executes requests.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    name: String,
    ip: Option<String>,
    seed: u64,
}

impl Node {
    /// Creates a node handle.
    pub fn new(name: impl Into<String>, ip: Option<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            ip,
            seed,
        }
    }

    /// Returns the unique name of the node within its run.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the IP address, if one was assigned.
    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    /// Returns the seed for the random generator of the node's scheduler.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the address used to reach the node: its IP, or its name as a host name.
    pub fn address(&self) -> &str {
        self.ip.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ip {
            Some(ip) => write!(f, "{} ({ip})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Creates and destroys nodes.
#[async_trait]
pub trait Provider: fmt::Debug + Send + Sync + 'static {
    /// Returns `true` if nodes are created per run rather than taken from a fixed pool.
    fn is_dynamic(&self) -> bool;

    /// Returns the fixed nodes by name with their IP addresses. Empty for dynamic providers.
    fn node_ips(&self) -> BTreeMap<String, String>;

    /// Returns the IP addresses available to dynamically created nodes.
    fn ip_pool(&self) -> &[String] {
        &[]
    }

    /// Makes a node available.
    async fn provision(
        &self,
        name: &str,
        seed: u64,
        ip: Option<&str>,
    ) -> Result<Node, CollaboratorError>;

    /// Releases a node.
    async fn destroy(&self, node: &Node) -> Result<(), CollaboratorError>;
}

/// A fixed pool of machines that already exist.
#[derive(Clone, Debug, Default)]
pub struct StaticProvider {
    nodes: BTreeMap<String, String>,
}

impl StaticProvider {
    /// Creates a provider over machines given by name and IP address.
    pub fn new(nodes: BTreeMap<String, String>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn is_dynamic(&self) -> bool {
        false
    }

    fn node_ips(&self) -> BTreeMap<String, String> {
        self.nodes.clone()
    }

    async fn provision(
        &self,
        name: &str,
        seed: u64,
        ip: Option<&str>,
    ) -> Result<Node, CollaboratorError> {
        let ip = ip.or_else(|| self.nodes.get(name).map(String::as_str));
        Ok(Node::new(name, ip.map(str::to_owned), seed))
    }

    async fn destroy(&self, node: &Node) -> Result<(), CollaboratorError> {
        tracing::debug!(node = node.name(), "static node is kept");
        Ok(())
    }
}

/// Creates nodes by running external commands.
///
/// The commands are run through `sh -c` after substituting `{name}`, `{ip}` and `{seed}`.
#[derive(Clone, Debug)]
pub struct CommandProvider {
    create: String,
    destroy: String,
    ip_pool: Vec<String>,
}

impl CommandProvider {
    /// Creates a provider from its create and destroy command templates.
    pub fn new(create: impl Into<String>, destroy: impl Into<String>, ip_pool: Vec<String>) -> Self {
        Self {
            create: create.into(),
            destroy: destroy.into(),
            ip_pool,
        }
    }

    fn expand(template: &str, node: &Node) -> String {
        template
            .replace("{name}", node.name())
            .replace("{ip}", node.ip().unwrap_or_default())
            .replace("{seed}", &node.seed().to_string())
    }
}

#[async_trait]
impl Provider for CommandProvider {
    fn is_dynamic(&self) -> bool {
        true
    }

    fn node_ips(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn ip_pool(&self) -> &[String] {
        &self.ip_pool
    }

    async fn provision(
        &self,
        name: &str,
        seed: u64,
        ip: Option<&str>,
    ) -> Result<Node, CollaboratorError> {
        let node = Node::new(name, ip.map(str::to_owned), seed);
        let script = Self::expand(&self.create, &node);
        tracing::info!(node = %node, "creating node");
        process::checked(process::shell(&script), &script).await?;
        Ok(node)
    }

    async fn destroy(&self, node: &Node) -> Result<(), CollaboratorError> {
        let script = Self::expand(&self.destroy, node);
        tracing::info!(node = %node, "destroying node");
        process::checked(process::shell(&script), &script).await?;
        Ok(())
    }
}
