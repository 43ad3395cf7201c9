//! Upgrade target selection.

use semver::Version;

use super::graph::Graph;

/// Newest candidate reachable from `install` through a graph edge.
///
/// With `only_z_stream`, candidates outside the installed minor stream are ignored.
/// Returns `None` when no candidate qualifies.
pub fn latest_reachable(
    graph: &Graph,
    install: &Version,
    candidates: &[Version],
    only_z_stream: bool,
) -> Option<Version> {
    candidates
        .iter()
        .filter(|c| *c > install)
        .filter(|c| !only_z_stream || (c.major == install.major && c.minor == install.minor))
        .filter(|c| graph.has_edge(install, c))
        .max()
        .cloned()
}

/// Newest version the graph offers as a direct upgrade from `install`.
pub fn latest_in_graph(graph: &Graph, install: &Version, only_z_stream: bool) -> Option<Version> {
    let candidates: Vec<Version> = graph.successors(install).into_iter().cloned().collect();
    latest_reachable(graph, install, &candidates, only_z_stream)
}
