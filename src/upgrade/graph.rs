//! Per-channel release graph cache.
//!
//! Each channel is fetched from the graph service at most once per process.
//! The whole cache sits behind one async mutex held across the fetch, so
//! concurrent callers for an uncached channel wait for the first fetch instead
//! of issuing their own. Failed fetches are not cached.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use semver::Version;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::channel::{ChannelResolver, is_release_candidate};
use crate::error::{KeoError, Result};

const COMPONENT: &str = "upgrade::graph";

#[derive(Deserialize, Debug)]
struct GraphNode {
    version: String,
}

#[derive(Deserialize, Debug)]
struct GraphBody {
    #[serde(default)]
    nodes: Vec<GraphNode>,
    #[serde(default)]
    edges: Vec<(usize, usize)>,
}

/// Known versions of one channel and the upgrade edges between them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    pub versions: Vec<Version>,
    pub edges: HashSet<(usize, usize)>,
}

impl Graph {
    /// Parse a graph service response.
    ///
    /// Nodes whose version does not parse are dropped, and edge indices are
    /// remapped onto the remaining nodes.
    pub fn parse(body: &str) -> Result<Self> {
        let raw: GraphBody = serde_json::from_str(body).map_err(|e| KeoError::Decode {
            source_name: COMPONENT.to_string(),
            message: e.to_string(),
        })?;

        let mut remap: Vec<Option<usize>> = Vec::with_capacity(raw.nodes.len());
        let mut versions = Vec::with_capacity(raw.nodes.len());
        for node in raw.nodes {
            match Version::parse(&node.version) {
                Ok(version) => {
                    remap.push(Some(versions.len()));
                    versions.push(version);
                }
                Err(_) => {
                    warn!("Unable to parse graph version {}, skipping", node.version);
                    remap.push(None);
                }
            }
        }

        let lookup = |i: usize| remap.get(i).copied().flatten();
        let edges = raw
            .edges
            .into_iter()
            .filter_map(|(from, to)| Some((lookup(from)?, lookup(to)?)))
            .collect();

        Ok(Self { versions, edges })
    }

    /// Linear scan; channels hold at most a few hundred releases.
    pub fn index_of(&self, version: &Version) -> Option<usize> {
        self.versions.iter().position(|v| v == version)
    }

    pub fn has_edge(&self, from: &Version, to: &Version) -> bool {
        match (self.index_of(from), self.index_of(to)) {
            (Some(from), Some(to)) => self.edges.contains(&(from, to)),
            _ => false,
        }
    }

    /// Versions reachable from `from` through a single edge.
    pub fn successors(&self, from: &Version) -> Vec<&Version> {
        let Some(from) = self.index_of(from) else {
            return Vec::new();
        };
        let mut next: Vec<&Version> = self
            .edges
            .iter()
            .filter(|(f, _)| *f == from)
            .filter_map(|(_, t)| self.versions.get(*t))
            .collect();
        next.sort();
        next
    }
}

/// Cached access to the release graph service.
pub struct VersionGraph {
    url: String,
    client: reqwest::Client,
    resolver: ChannelResolver,
    cache: Mutex<HashMap<String, Arc<Graph>>>,
}

impl VersionGraph {
    pub fn new(url: String, resolver: ChannelResolver) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            resolver,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub const fn resolver(&self) -> &ChannelResolver {
        &self.resolver
    }

    /// Graph for `channel`, fetched on first use.
    pub async fn get(&self, channel: &str) -> Result<Arc<Graph>> {
        let mut cache = self.cache.lock().await;
        if let Some(graph) = cache.get(channel) {
            return Ok(Arc::clone(graph));
        }

        let graph = Arc::new(self.fetch(channel).await?);
        info!(
            "Loaded release graph for channel {} ({} versions, {} edges)",
            channel,
            graph.versions.len(),
            graph.edges.len()
        );
        cache.insert(channel.to_string(), Arc::clone(&graph));
        Ok(graph)
    }

    async fn fetch(&self, channel: &str) -> Result<Graph> {
        debug!("Fetching release graph for channel {}", channel);
        let resp = self
            .client
            .get(&self.url)
            .query(&[("channel", channel), ("arch", "amd64")])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| KeoError::http(&self.url, &e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| KeoError::http(&self.url, &e))?;
        if !status.is_success() {
            return Err(KeoError::api(COMPONENT, status.as_u16(), &body));
        }
        Graph::parse(&body)
    }

    /// Whether the graph of `upgrade`'s channel holds an edge from `install` to `upgrade`.
    ///
    /// A version missing from the graph yields `Ok(false)`.
    pub async fn edge_exists(&self, install: &Version, upgrade: &Version) -> Result<bool> {
        let channel = self.resolver.resolve(upgrade)?;
        let graph = self.get(&channel).await?;

        let target = if channel.starts_with("stable") || is_release_candidate(upgrade) {
            upgrade.clone()
        } else {
            // Nightly-style suffixes are not published in the graph.
            Version::new(upgrade.major, upgrade.minor, upgrade.patch)
        };

        let exists = graph.has_edge(install, &target);
        debug!(
            "Edge {} -> {} in channel {}: {}",
            install, target, channel, exists
        );
        Ok(exists)
    }
}
