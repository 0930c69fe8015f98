//! Builds a directed resource graph from a parsed Terraform state (spec
//! §4.4) and exposes the algorithms (topological sort, transitive
//! dependencies/dependents, blast radius, critical path, orphans) that
//! operate on it.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::GraphError;
use crate::node::DependencyNode;

static INTERPOLATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid"));

/// The directed resource graph: one node per resource instance, edges
/// from `depends_on`, instance-level `dependencies`, and references
/// discovered by scanning attribute strings for `${...}` interpolations.
/// Built fresh per drift run; never shared across tasks (spec §5).
pub struct DependencyGraph {
    nodes: IndexMap<String, DependencyNode>,
}

impl DependencyGraph {
    /// Builds the graph from `state` in two passes: one node per resource
    /// instance, then edges. Fails with [`GraphError::CycleDetected`] if
    /// the resulting dependency closure is cyclic.
    pub fn build(state: &driftmgr_state::TerraformState) -> Result<Self, GraphError> {
        let mut nodes: IndexMap<String, DependencyNode> = IndexMap::new();

        // Pass 1: one node per resource instance.
        for resource in &state.resources {
            for instance in &resource.instances {
                let address = format!("{}.{}{}", resource.r#type, resource.name, instance.index_suffix());
                nodes.insert(
                    address.clone(),
                    DependencyNode::new(
                        address,
                        resource.r#type.clone(),
                        resource.name.clone(),
                        resource.provider.clone(),
                        resource.module.clone(),
                    ),
                );
            }
        }

        // Pass 2: edges. Collected as raw (unnormalized) candidate targets
        // per source address first, then normalized and deduplicated
        // against the known node set.
        let mut raw_edges: IndexMap<String, Vec<String>> = IndexMap::new();
        for resource in &state.resources {
            for instance in &resource.instances {
                let address = format!("{}.{}{}", resource.r#type, resource.name, instance.index_suffix());
                let mut targets: Vec<String> = Vec::new();
                targets.extend(resource.depends_on.iter().cloned());
                targets.extend(instance.dependencies.iter().cloned());
                for attr in instance.attributes.values() {
                    attr.visit_strings(&mut |s| {
                        for capture in INTERPOLATION_RE.captures_iter(s) {
                            if let Some(reference) = extract_reference(&capture[1]) {
                                targets.push(reference);
                            }
                        }
                    });
                }
                raw_edges.entry(address).or_default().extend(targets);
            }
        }

        for (source, raw_targets) in raw_edges {
            let mut seen: HashSet<String> = HashSet::new();
            for raw in raw_targets {
                let Some(normalized) = normalize_reference(&raw, &nodes) else { continue };
                if normalized == source || !seen.insert(normalized.clone()) {
                    continue;
                }
                if !nodes.contains_key(&normalized) {
                    // References to absent targets are dropped silently.
                    continue;
                }
                nodes.get_mut(&source).expect("source was inserted in pass 1").dependencies.push(normalized.clone());
                nodes.get_mut(&normalized).expect("checked contains_key above").dependents.push(source.clone());
            }
        }

        let mut graph = Self { nodes };
        graph.check_acyclic()?;
        graph.assign_levels();
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<String> = Vec::new();

        fn visit<'a>(
            addr: &'a str,
            nodes: &'a IndexMap<String, DependencyNode>,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<String>,
        ) -> Result<(), GraphError> {
            match marks.get(addr) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    let cycle_start = stack.iter().position(|a| a == addr).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[cycle_start..].to_vec();
                    cycle.push(addr.to_owned());
                    return Err(GraphError::CycleDetected(cycle.join(" -> ")));
                }
                None => {}
            }
            marks.insert(addr, Mark::InProgress);
            stack.push(addr.to_owned());
            if let Some(node) = nodes.get(addr) {
                for dep in &node.dependencies {
                    visit(dep, nodes, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(addr, Mark::Done);
            Ok(())
        }

        let mut addresses: Vec<&str> = self.nodes.keys().map(|s| s.as_str()).collect();
        addresses.sort();
        for addr in addresses {
            visit(addr, &self.nodes, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    fn assign_levels(&mut self) {
        let mut levels: HashMap<String, i64> = HashMap::new();
        let mut addresses: Vec<String> = self.nodes.keys().cloned().collect();
        addresses.sort();
        for addr in &addresses {
            level_of(addr, &self.nodes, &mut levels);
        }
        for (addr, level) in levels {
            if let Some(node) = self.nodes.get_mut(&addr) {
                node.level = level;
            }
        }
    }

    pub fn node(&self, address: &str) -> Option<&DependencyNode> {
        self.nodes.get(address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Post-order DFS: a node is appended only after all its dependencies,
    /// so the result lists every address exactly once with dependencies
    /// preceding their dependents.
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        self.check_acyclic()?;
        let mut visited: HashSet<String> = HashSet::new();
        let mut order: Vec<String> = Vec::new();

        fn visit(
            addr: &str,
            nodes: &IndexMap<String, DependencyNode>,
            visited: &mut HashSet<String>,
            order: &mut Vec<String>,
        ) {
            if !visited.insert(addr.to_owned()) {
                return;
            }
            if let Some(node) = nodes.get(addr) {
                let mut deps = node.dependencies.clone();
                deps.sort();
                for dep in deps {
                    visit(&dep, nodes, visited, order);
                }
            }
            order.push(addr.to_owned());
        }

        let mut addresses: Vec<&str> = self.nodes.keys().map(|s| s.as_str()).collect();
        addresses.sort();
        for addr in addresses {
            visit(addr, &self.nodes, &mut visited, &mut order);
        }
        Ok(order)
    }

    /// Depth-first collection of every address `addr` (transitively)
    /// depends on, excluding `addr` itself.
    pub fn get_transitive_dependencies(&self, addr: &str) -> Result<Vec<String>, GraphError> {
        if !self.nodes.contains_key(addr) {
            return Err(GraphError::UnknownAddress(addr.to_owned()));
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut result: Vec<String> = Vec::new();
        self.collect(addr, |n| &n.dependencies, &mut seen, &mut result);
        Ok(result)
    }

    /// Depth-first collection of every address that (transitively)
    /// depends on `addr`, excluding `addr` itself. The set of resources a
    /// change to `addr` could break.
    pub fn get_transitive_dependents(&self, addr: &str) -> Result<Vec<String>, GraphError> {
        if !self.nodes.contains_key(addr) {
            return Err(GraphError::UnknownAddress(addr.to_owned()));
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut result: Vec<String> = Vec::new();
        self.collect(addr, |n| &n.dependents, &mut seen, &mut result);
        Ok(result)
    }

    /// Alias for [`DependencyGraph::get_transitive_dependents`].
    pub fn get_blast_radius(&self, addr: &str) -> Result<Vec<String>, GraphError> {
        self.get_transitive_dependents(addr)
    }

    fn collect<'a, F>(&'a self, addr: &str, edges: F, seen: &mut HashSet<String>, result: &mut Vec<String>)
    where
        F: Fn(&'a DependencyNode) -> &'a Vec<String> + Copy,
    {
        let Some(node) = self.nodes.get(addr) else { return };
        let mut neighbors = edges(node).clone();
        neighbors.sort();
        for neighbor in neighbors {
            if seen.insert(neighbor.clone()) {
                result.push(neighbor.clone());
                self.collect(&neighbor, edges, seen, result);
            }
        }
    }

    /// The longest dependency chain in the graph, by node count. Ties
    /// (equal-length chains) are broken by iterating candidates in
    /// address-ascending order and keeping the first maximum found.
    pub fn critical_path(&self) -> Vec<String> {
        let mut memo: HashMap<String, (usize, Option<String>)> = HashMap::new();
        let mut addresses: Vec<String> = self.nodes.keys().cloned().collect();
        addresses.sort();
        for addr in &addresses {
            longest_chain(addr, &self.nodes, &mut memo);
        }

        let Some(best) = addresses.iter().max_by_key(|addr| memo[*addr].0) else {
            return Vec::new();
        };

        let mut chain = vec![best.clone()];
        let mut current = best.clone();
        while let Some(next) = memo[&current].1.clone() {
            chain.push(next.clone());
            current = next;
        }
        chain
    }

    /// Nodes with neither dependencies nor dependents.
    pub fn get_orphaned_resources(&self) -> Vec<String> {
        let mut orphans: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.dependencies.is_empty() && n.dependents.is_empty())
            .map(|n| n.address.clone())
            .collect();
        orphans.sort();
        orphans
    }
}

/// A node's depth: 0 for a node with no dependencies, else one more than
/// the deepest of its dependencies. Memoized since the same dependency
/// can be reached from many nodes.
fn level_of(addr: &str, nodes: &IndexMap<String, DependencyNode>, memo: &mut HashMap<String, i64>) -> i64 {
    if let Some(cached) = memo.get(addr) {
        return *cached;
    }
    let deps = nodes.get(addr).map(|n| n.dependencies.clone()).unwrap_or_default();
    let level = deps.iter().map(|dep| level_of(dep, nodes, memo) + 1).max().unwrap_or(0);
    memo.insert(addr.to_owned(), level);
    level
}

fn longest_chain(
    addr: &str,
    nodes: &IndexMap<String, DependencyNode>,
    memo: &mut HashMap<String, (usize, Option<String>)>,
) -> (usize, Option<String>) {
    if let Some(cached) = memo.get(addr) {
        return cached.clone();
    }
    let node = nodes.get(addr);
    let mut deps = node.map(|n| n.dependencies.clone()).unwrap_or_default();
    deps.sort();

    let mut best_len = 1;
    let mut best_dep: Option<String> = None;
    for dep in deps {
        let (dep_len, _) = longest_chain(&dep, nodes, memo);
        if dep_len + 1 > best_len {
            best_len = dep_len + 1;
            best_dep = Some(dep);
        }
    }
    let result = (best_len, best_dep);
    memo.insert(addr.to_owned(), result.clone());
    result
}

/// Extracts a resource reference from `${...}` interpolation content:
/// `type.name`, `module.m.type.name`, or `data.type.name`. Returns the raw
/// (unnormalized) form for [`normalize_reference`] to resolve.
fn extract_reference(expr: &str) -> Option<String> {
    let tokens: Vec<&str> = expr.trim().split('.').collect();
    match tokens.first().copied() {
        Some("module") if tokens.len() >= 4 => {
            Some(format!("module.{}.{}.{}", tokens[1], tokens[2], tokens[3]))
        }
        Some("data") if tokens.len() >= 3 => Some(format!("data.{}.{}", tokens[1], tokens[2])),
        Some(_) if tokens.len() >= 2 => Some(format!("{}.{}", tokens[0], tokens[1])),
        _ => None,
    }
}

/// Strips a `module.*` prefix down to `type.name`, then rewrites a bare
/// `type.name` to `type.name[0]` if only the indexed form exists as a
/// node (spec §4.4).
fn normalize_reference(raw: &str, nodes: &IndexMap<String, DependencyNode>) -> Option<String> {
    let without_module = if let Some(rest) = raw.strip_prefix("module.") {
        rest.split_once('.').map(|(_, rest)| rest).unwrap_or(rest)
    } else {
        raw
    };
    let without_data = without_module.strip_prefix("data.").unwrap_or(without_module);

    if nodes.contains_key(without_data) {
        return Some(without_data.to_owned());
    }
    let indexed = format!("{without_data}[0]");
    if nodes.contains_key(&indexed) {
        return Some(indexed);
    }
    // Not found under either form; returned verbatim so the caller's
    // `contains_key` check drops it silently as a reference to an absent
    // target.
    Some(without_data.to_owned())
}

#[cfg(test)]
mod graph_test {
    use driftmgr_test_utils::sample_state_with_dependencies;

    use super::*;

    #[test]
    fn blast_radius_matches_spec_scenario() {
        let state = sample_state_with_dependencies();
        let graph = DependencyGraph::build(&state).unwrap();
        let blast = graph.get_blast_radius("aws_vpc.main").unwrap();
        let mut blast = blast;
        blast.sort();
        assert_eq!(blast, vec!["aws_instance.i".to_string(), "aws_subnet.a".to_string()]);
    }

    #[test]
    fn dependents_and_dependencies_are_duals() {
        let state = sample_state_with_dependencies();
        let graph = DependencyGraph::build(&state).unwrap();
        for node in graph.nodes() {
            for dep in &node.dependencies {
                let dependents = graph.get_transitive_dependents(dep).unwrap();
                assert!(dependents.contains(&node.address));
            }
        }
    }

    #[test]
    fn topological_sort_orders_dependencies_first() {
        let state = sample_state_with_dependencies();
        let graph = DependencyGraph::build(&state).unwrap();
        let order = graph.topological_sort().unwrap();
        let vpc_pos = order.iter().position(|a| a == "aws_vpc.main").unwrap();
        let subnet_pos = order.iter().position(|a| a == "aws_subnet.a").unwrap();
        let instance_pos = order.iter().position(|a| a == "aws_instance.i").unwrap();
        assert!(vpc_pos < subnet_pos);
        assert!(subnet_pos < instance_pos);
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let mut state = sample_state_with_dependencies();
        // Introduce a cycle: aws_vpc.main now depends on aws_instance.i.
        state.resources[0].depends_on.push("aws_instance.i".to_owned());
        let err = DependencyGraph::build(&state).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected(_)));
    }

    #[test]
    fn orphaned_resource_has_no_edges() {
        let mut state = sample_state_with_dependencies();
        state
            .resources
            .push(driftmgr_test_utils::resource_fixture("aws_s3_bucket", "standalone"));
        let graph = DependencyGraph::build(&state).unwrap();
        assert!(graph.get_orphaned_resources().contains(&"aws_s3_bucket.standalone".to_string()));
    }

    #[test]
    fn critical_path_follows_the_longest_chain() {
        let state = sample_state_with_dependencies();
        let graph = DependencyGraph::build(&state).unwrap();
        let path = graph.critical_path();
        assert_eq!(path.first(), Some(&"aws_instance.i".to_string()));
        assert!(path.contains(&"aws_vpc.main".to_string()));
    }
}
