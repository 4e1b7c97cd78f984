//! Static worker topology
//!
//! Keeps an ordered list of workers, optionally loaded from a worker list
//! file. Only active workers are reported to the registry.

use crate::error::{CoordinatorError, Result};
use parking_lot::RwLock;
use remote_txn_common::{DEFAULT_WORKER_PORT, TopologyProvider, WorkerNode};
use std::path::Path;

/// Worker list held in memory
#[derive(Debug, Default)]
pub struct StaticTopology {
    nodes: RwLock<Vec<WorkerNode>>,
}

impl StaticTopology {
    /// Create a topology from nodes in order
    pub fn new(nodes: Vec<WorkerNode>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Load a topology from a worker list file
    ///
    /// A missing file yields an empty topology.
    pub fn from_worker_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("worker list file at {} is not present", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let topology = Self::default();
        for node in parse_worker_file(&contents)? {
            topology.add_node(&node.host, node.port);
        }
        Ok(topology)
    }

    /// Add a worker, or return the existing one with the same identity
    ///
    /// New workers join a fresh group after the highest existing one.
    pub fn add_node(&self, host: &str, port: u16) -> WorkerNode {
        let mut nodes = self.nodes.write();

        if let Some(existing) = nodes.iter().find(|n| n.is(host, port)) {
            return existing.clone();
        }

        let group_id = nodes.iter().map(|n| n.group_id).max().unwrap_or(0) + 1;
        let node = WorkerNode::new(host, port).with_group(group_id);
        nodes.push(node.clone());
        node
    }

    /// Remove a worker from the topology
    pub fn remove_node(&self, host: &str, port: u16) -> Result<WorkerNode> {
        let mut nodes = self.nodes.write();
        let position = nodes
            .iter()
            .position(|n| n.is(host, port))
            .ok_or_else(|| not_found(host, port))?;
        Ok(nodes.remove(position))
    }

    /// Mark a worker active; it must exist and be inactive
    pub fn activate_node(&self, host: &str, port: u16) -> Result<()> {
        self.set_active(host, port, true)
    }

    /// Mark a worker inactive; it must exist and be active
    pub fn deactivate_node(&self, host: &str, port: u16) -> Result<()> {
        self.set_active(host, port, false)
    }

    fn set_active(&self, host: &str, port: u16, active: bool) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .iter_mut()
            .find(|n| n.is(host, port))
            .ok_or_else(|| not_found(host, port))?;

        if node.active == active {
            return Err(CoordinatorError::Topology(format!(
                "node {} is already {}",
                node,
                if active { "activated" } else { "deactivated" }
            )));
        }

        node.active = active;
        Ok(())
    }

    /// Look up a worker by identity
    pub fn find_node(&self, host: &str, port: u16) -> Option<WorkerNode> {
        self.nodes.read().iter().find(|n| n.is(host, port)).cloned()
    }

    /// All workers, active or not
    pub fn all_nodes(&self) -> Vec<WorkerNode> {
        self.nodes.read().clone()
    }
}

impl TopologyProvider for StaticTopology {
    fn list_nodes(&self) -> std::result::Result<Vec<WorkerNode>, String> {
        Ok(self
            .nodes
            .read()
            .iter()
            .filter(|n| n.active)
            .cloned()
            .collect())
    }
}

fn not_found(host: &str, port: u16) -> CoordinatorError {
    CoordinatorError::Topology(format!("node {}:{} does not exist", host, port))
}

/// Parse a worker list file
///
/// One worker per line as `host [port]`, with the port defaulting to 5432.
/// Blank lines are skipped and `#` starts a comment running to the end of
/// the line. Any further field on a line is ignored.
pub fn parse_worker_file(contents: &str) -> Result<Vec<WorkerNode>> {
    let mut nodes = Vec::new();

    for (index, raw_line) in contents.lines().enumerate() {
        let line = match raw_line.find('#') {
            Some(comment) => &raw_line[..comment],
            None => raw_line,
        };

        let mut fields = line.split_whitespace();
        let Some(host) = fields.next() else {
            continue;
        };

        let port = match fields.next() {
            None => DEFAULT_WORKER_PORT,
            Some(port) => match port.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    return Err(CoordinatorError::InvalidWorkerFile {
                        line: index + 1,
                        reason: format!(
                            "\"{}\": lines must contain a valid node name and, optionally, \
                             a positive port number",
                            raw_line.trim()
                        ),
                    });
                }
            },
        };

        nodes.push(WorkerNode::new(host, port));
    }

    Ok(nodes)
}
