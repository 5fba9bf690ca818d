use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Result of one node's check.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub node: String,
    pub passed: bool,
    pub detail: Option<String>,
}

/// Per-node results of one fan-out. Contains exactly one outcome per
/// dispatched node, each written exactly once by its own task.
#[derive(Debug, Default)]
pub struct NodeReport {
    outcomes: BTreeMap<String, NodeOutcome>,
}

impl NodeReport {
    fn insert(&mut self, outcome: NodeOutcome) {
        self.outcomes.insert(outcome.node.clone(), outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, node: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(node)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.values()
    }

    pub fn all_passed(&self) -> bool {
        self.outcomes.values().all(|o| o.passed)
    }

    pub fn failed_nodes(&self) -> Vec<&str> {
        self.outcomes
            .values()
            .filter(|o| !o.passed)
            .map(|o| o.node.as_str())
            .collect()
    }

    pub fn merge(&mut self, other: NodeReport) {
        for (node, outcome) in other.outcomes {
            match self.outcomes.get(&node) {
                // A node that failed any suite stays failed.
                Some(existing) if !existing.passed => {}
                _ => {
                    self.outcomes.insert(node, outcome);
                }
            }
        }
    }

    pub fn log_summary(&self, suite: &str) {
        let failed = self.failed_nodes();
        if failed.is_empty() {
            info!("✅ {}: all {} nodes passed", suite, self.len());
        } else {
            warn!(
                "❌ {}: {}/{} nodes failed: {}",
                suite,
                failed.len(),
                self.len(),
                failed.join(", ")
            );
            for outcome in self.outcomes.values().filter(|o| !o.passed) {
                warn!(
                    "   {}: {}",
                    outcome.node,
                    outcome.detail.as_deref().unwrap_or("no detail")
                );
            }
        }
    }
}

/// Runs the same check against every node concurrently and joins all
/// tasks before returning. Concurrency is bounded by a semaphore and
/// each node gets its own deadline; a slow or failing node never stalls
/// the collection of the others.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    max_concurrent: usize,
    node_timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            node_timeout: Duration::from_secs(300),
        }
    }
}

impl Dispatcher {
    pub fn new(max_concurrent: usize, node_timeout: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            node_timeout,
        }
    }

    pub async fn run<F, Fut>(&self, nodes: &[String], check: F) -> NodeReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let node_timeout = self.node_timeout;

        let tasks = nodes.iter().cloned().map(|node| {
            let permit = semaphore.clone();
            let fut = check(node.clone());
            async move {
                let _permit = permit
                    .acquire()
                    .await
                    .expect("semaphore is never closed");
                match tokio::time::timeout(node_timeout, fut).await {
                    Ok(Ok(())) => NodeOutcome {
                        node,
                        passed: true,
                        detail: None,
                    },
                    Ok(Err(e)) => {
                        warn!("Check failed for node {}: {:#}", node, e);
                        NodeOutcome {
                            node,
                            passed: false,
                            detail: Some(format!("{e:#}")),
                        }
                    }
                    Err(_) => {
                        warn!(
                            "Check timed out for node {} after {}s",
                            node,
                            node_timeout.as_secs()
                        );
                        NodeOutcome {
                            node,
                            passed: false,
                            detail: Some(format!(
                                "timed out after {}s",
                                node_timeout.as_secs()
                            )),
                        }
                    }
                }
            }
        });

        let outcomes = futures::future::join_all(tasks).await;
        let mut report = NodeReport::default();
        for outcome in outcomes {
            report.insert(outcome);
        }
        report
    }
}
