//! Dependency graph derived from a workflow's connections.
//!
//! Levels are assigned by a topological BFS from the start nodes (those with
//! no dependencies); all nodes sharing a level form a parallel group. A node
//! left unleveled after the BFS drains participates in a cycle or depends on
//! one, and makes the graph invalid.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use trelliscore::Workflow;

#[derive(Debug)]
pub struct DependencyGraph {
    /// Direct predecessors per node, deduplicated.
    deps: BTreeMap<String, Vec<String>>,
    /// Direct successors per node, deduplicated.
    dependents: BTreeMap<String, Vec<String>>,
    /// BFS depth per node; absent for nodes stuck behind a cycle.
    levels: HashMap<String, usize>,
    /// Node ids partitioned by level, index = level.
    groups: Vec<Vec<String>>,
}

impl DependencyGraph {
    pub fn new(workflow: &Workflow) -> Self {
        let mut deps: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for node in &workflow.nodes {
            deps.entry(node.id.clone()).or_default();
            dependents.entry(node.id.clone()).or_default();
        }
        for conn in &workflow.connections {
            // duplicate connections carry I/O mapping but add no new edge
            if !deps.contains_key(&conn.from) || !deps.contains_key(&conn.to) {
                continue;
            }
            let d = deps.get_mut(&conn.to).unwrap();
            if !d.contains(&conn.from) {
                d.push(conn.from.clone());
            }
            let d = dependents.get_mut(&conn.from).unwrap();
            if !d.contains(&conn.to) {
                d.push(conn.to.clone());
            }
        }

        let (levels, groups) = assign_levels(&deps, &dependents);

        Self {
            deps,
            dependents,
            levels,
            groups,
        }
    }

    /// Validation errors, empty when the graph is executable. Each cycle is
    /// reported through one of its members; nodes wedged behind a cycle are
    /// reported as unsatisfiable.
    pub fn validate(&self) -> Vec<String> {
        if self.levels.len() == self.deps.len() && self.toposort_ok() {
            return Vec::new();
        }

        let (entries, members) = self.find_cycles();
        let mut errors: Vec<String> = entries
            .iter()
            .map(|id| format!("cycle involving {}", id))
            .collect();
        for id in self.deps.keys() {
            if !self.levels.contains_key(id) && !members.contains(id) {
                errors.push(format!("node {} has unsatisfiable dependencies", id));
            }
        }
        errors
    }

    /// Node ids partitioned by level in ascending level order.
    pub fn parallel_groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    pub fn level(&self, id: &str) -> Option<usize> {
        self.levels.get(id).copied()
    }

    pub fn deps(&self, id: &str) -> &[String] {
        self.deps.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes with no dependencies.
    pub fn start_nodes(&self) -> Vec<&str> {
        self.deps
            .iter()
            .filter(|(_, d)| d.is_empty())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Nodes with no dependents.
    pub fn end_nodes(&self) -> Vec<&str> {
        self.dependents
            .iter()
            .filter(|(_, d)| d.is_empty())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// A node may run once every dependency completed and none failed fatally.
    pub fn can_execute(
        &self,
        id: &str,
        completed: &HashSet<String>,
        failed: &HashSet<String>,
    ) -> bool {
        self.deps(id)
            .iter()
            .all(|dep| completed.contains(dep) && !failed.contains(dep))
    }

    fn toposort_ok(&self) -> bool {
        let mut graph = DiGraph::<&str, ()>::new();
        let mut indices = HashMap::new();
        for id in self.deps.keys() {
            indices.insert(id.as_str(), graph.add_node(id.as_str()));
        }
        for (to, from_list) in &self.deps {
            for from in from_list {
                graph.add_edge(indices[from.as_str()], indices[to.as_str()], ());
            }
        }
        toposort(&graph, None).is_ok()
    }

    /// DFS with a recursion set. A back edge identifies a cycle: its target
    /// is the cycle's entry point (one error per cycle) and every node on the
    /// current path from that target belongs to the cycle.
    fn find_cycles(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        let mut entries = BTreeSet::new();
        let mut members = BTreeSet::new();
        let mut visited: HashSet<&str> = HashSet::new();

        for root in self.deps.keys() {
            if visited.contains(root.as_str()) {
                continue;
            }
            // iterative DFS: (node, next child index); the stack is the path
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
            let mut in_stack: HashSet<&str> = HashSet::new();
            in_stack.insert(root.as_str());

            while let Some((node, child_idx)) = stack.pop() {
                let children = self.dependents(node);
                if child_idx < children.len() {
                    stack.push((node, child_idx + 1));
                    let child = children[child_idx].as_str();
                    if in_stack.contains(child) {
                        entries.insert(child.to_string());
                        let start = stack
                            .iter()
                            .position(|(id, _)| *id == child)
                            .unwrap_or(0);
                        for (id, _) in &stack[start..] {
                            members.insert((*id).to_string());
                        }
                    } else if !visited.contains(child) {
                        in_stack.insert(child);
                        stack.push((child, 0));
                    }
                } else {
                    in_stack.remove(node);
                    visited.insert(node);
                }
            }
        }
        (entries, members)
    }
}

/// BFS from the empty-deps roots. A dependent is enqueued only once all of
/// its dependencies are leveled, at `1 + max(dep levels)`.
fn assign_levels(
    deps: &BTreeMap<String, Vec<String>>,
    dependents: &BTreeMap<String, Vec<String>>,
) -> (HashMap<String, usize>, Vec<Vec<String>>) {
    let mut levels: HashMap<String, usize> = HashMap::new();
    let mut queue: VecDeque<String> = VecDeque::new();

    for (id, d) in deps {
        if d.is_empty() {
            levels.insert(id.clone(), 0);
            queue.push_back(id.clone());
        }
    }

    while let Some(id) = queue.pop_front() {
        for dependent in dependents.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            if levels.contains_key(dependent) {
                continue;
            }
            let dep_levels: Option<Vec<usize>> = deps[dependent]
                .iter()
                .map(|d| levels.get(d).copied())
                .collect();
            if let Some(dep_levels) = dep_levels {
                let level = 1 + dep_levels.into_iter().max().unwrap_or(0);
                levels.insert(dependent.clone(), level);
                queue.push_back(dependent.clone());
            }
        }
    }

    let max_level = levels.values().copied().max();
    let mut groups: Vec<Vec<String>> = match max_level {
        Some(max) => vec![Vec::new(); max + 1],
        None => Vec::new(),
    };
    for id in deps.keys() {
        if let Some(&level) = levels.get(id) {
            groups[level].push(id.clone());
        }
    }

    (levels, groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trelliscore::NodeSpec;

    fn workflow(nodes: &[&str], edges: &[(&str, &str)]) -> Workflow {
        let mut wf = Workflow::new("wf", "wf");
        for id in nodes {
            wf.add_node(NodeSpec::new(*id, "transform"));
        }
        for (from, to) in edges {
            wf.connect(*from, *to);
        }
        wf
    }

    #[test]
    fn linear_chain_levels() {
        let graph = DependencyGraph::new(&workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c")]));
        assert!(graph.validate().is_empty());
        assert_eq!(graph.level("a"), Some(0));
        assert_eq!(graph.level("b"), Some(1));
        assert_eq!(graph.level("c"), Some(2));
        assert_eq!(graph.parallel_groups().len(), 3);
    }

    #[test]
    fn diamond_groups() {
        let graph = DependencyGraph::new(&workflow(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        ));
        assert!(graph.validate().is_empty());
        let groups = graph.parallel_groups();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], vec!["a"]);
        assert_eq!(groups[1].len(), 2);
        assert!(groups[1].contains(&"b".to_string()));
        assert!(groups[1].contains(&"c".to_string()));
        assert_eq!(groups[2], vec!["d"]);
    }

    #[test]
    fn uneven_depths_use_max_dep_level() {
        // a -> b -> d, a -> d: d sits below its deepest dependency
        let graph = DependencyGraph::new(&workflow(
            &["a", "b", "d"],
            &[("a", "b"), ("b", "d"), ("a", "d")],
        ));
        assert_eq!(graph.level("d"), Some(2));
    }

    #[test]
    fn isolated_nodes_all_level_zero() {
        let graph = DependencyGraph::new(&workflow(&["a", "b", "c"], &[]));
        assert!(graph.validate().is_empty());
        assert_eq!(graph.parallel_groups().len(), 1);
        assert_eq!(graph.parallel_groups()[0].len(), 3);
        assert_eq!(graph.start_nodes().len(), 3);
        assert_eq!(graph.end_nodes().len(), 3);
    }

    #[test]
    fn empty_workflow_is_valid() {
        let graph = DependencyGraph::new(&workflow(&[], &[]));
        assert!(graph.validate().is_empty());
        assert!(graph.parallel_groups().is_empty());
    }

    #[test]
    fn cycle_reported_by_member() {
        let graph = DependencyGraph::new(&workflow(&["a", "b"], &[("a", "b"), ("b", "a")]));
        let errors = graph.validate();
        assert_eq!(errors.len(), 1, "got: {errors:?}");
        assert!(errors[0].starts_with("cycle involving "));
    }

    #[test]
    fn node_behind_cycle_reported_unsatisfiable() {
        let graph = DependencyGraph::new(&workflow(
            &["a", "b", "c"],
            &[("a", "b"), ("b", "a"), ("b", "c")],
        ));
        let errors = graph.validate();
        assert!(errors.iter().any(|e| e.starts_with("cycle involving ")));
        assert!(errors.iter().any(|e| e.contains("unsatisfiable")), "got: {errors:?}");
    }

    #[test]
    fn duplicate_connection_adds_single_dependency() {
        let mut wf = workflow(&["a", "b"], &[("a", "b"), ("a", "b")]);
        wf.connect_ports("a", "output", "b", "second");
        let graph = DependencyGraph::new(&wf);
        assert_eq!(graph.deps("b"), ["a"]);
        assert_eq!(graph.dependents("a"), ["b"]);
    }

    #[test]
    fn can_execute_respects_completed_and_failed() {
        let graph = DependencyGraph::new(&workflow(&["a", "b"], &[("a", "b")]));
        let mut completed = HashSet::new();
        let failed = HashSet::new();
        assert!(!graph.can_execute("b", &completed, &failed));

        completed.insert("a".to_string());
        assert!(graph.can_execute("b", &completed, &failed));

        let mut failed = HashSet::new();
        failed.insert("a".to_string());
        assert!(!graph.can_execute("b", &completed, &failed));
    }
}
