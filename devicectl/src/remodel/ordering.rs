use devicectl_api::task::{TaskGraph, TaskId, TaskSet};

/// The chain-wide markers produced by wiring a sequence of task sets together, per spec
/// §4.E.3: the last download across the whole chain, and the first install-phase task
/// encountered (install phases may start at different points per sub-graph, but only the
/// first one matters for gating every modification behind every download).
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderedChain {
    pub last_download: Option<TaskId>,
    pub first_install: Option<TaskId>,
    pub last_install: Option<TaskId>,
}

/// Chains sub-graphs in synthesis order: `last-download[N] -> first-download[N+1]` and
/// `last-install[N] -> first-install[N+1]`, then ties `last-download -> first-install` so
/// no system modification begins until every download completes.
pub fn wire_chain(graph: &mut TaskGraph, sets: &[TaskSet]) -> OrderedChain {
    let mut prev_last_download: Option<TaskId> = None;
    let mut prev_last_install: Option<TaskId> = None;
    let mut chain_last_download: Option<TaskId> = None;
    let mut chain_first_install: Option<TaskId> = None;
    let mut chain_last_install: Option<TaskId> = None;

    for set in sets {
        if let (Some(prev), Some(first_download)) = (prev_last_download, set.first_download()) {
            graph.wire(first_download, prev);
        }
        if let (Some(prev), Some(first_install)) = (prev_last_install, set.first_install()) {
            graph.wire(first_install, prev);
        }

        if let Some(last_download) = set.last_download() {
            prev_last_download = Some(last_download);
            chain_last_download = Some(last_download);
        }
        if let Some(first_install) = set.first_install() {
            chain_first_install.get_or_insert(first_install);
        }
        if let Some(last_install) = set.last_install() {
            prev_last_install = Some(last_install);
            chain_last_install = Some(last_install);
        }
    }

    if let (Some(last_download), Some(first_install)) = (chain_last_download, chain_first_install) {
        graph.wire(first_install, last_download);
    }

    OrderedChain {
        last_download: chain_last_download,
        first_install: chain_first_install,
        last_install: chain_last_install,
    }
}
