// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Stage dependency graph
//!
//! Holds the registered stages, validates the dependency relation and the
//! artifact wiring, and partitions the stages into topological levels.

use petgraph::algo::{has_path_connecting, kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::errors::StagegateError;
use crate::pipeline::{stage_name_problem, Pipeline, Stage};

/// Directed acyclic graph of pipeline stages
#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    stages: Vec<Stage>,
    name_to_index: HashMap<String, usize>,
    /// artifact name -> producing stage
    producers: HashMap<String, String>,
}

impl PipelineGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a graph from a pipeline definition
    pub fn from_pipeline(pipeline: &Pipeline) -> Result<Self, StagegateError> {
        let mut graph = Self::new();
        for stage in &pipeline.stages {
            graph.add_stage(stage.clone())?;
        }
        graph.topological_levels()?;
        Ok(graph)
    }

    /// Register a stage
    ///
    /// Dependencies may reference stages registered later; they are resolved
    /// when the levels are computed.
    pub fn add_stage(&mut self, stage: Stage) -> Result<(), StagegateError> {
        if let Some(reason) = stage_name_problem(&stage.name) {
            return Err(StagegateError::InvalidStage {
                stage: stage.name,
                reason: reason.to_string(),
            });
        }

        if self.name_to_index.contains_key(&stage.name) {
            return Err(StagegateError::DuplicateStage { stage: stage.name });
        }

        for artifact in &stage.produces {
            if let Some(first) = self.producers.get(artifact) {
                return Err(StagegateError::DuplicateProducer {
                    artifact: artifact.clone(),
                    first: first.clone(),
                    second: stage.name.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for artifact in &stage.produces {
            if !seen.insert(artifact) {
                return Err(StagegateError::DuplicateProducer {
                    artifact: artifact.clone(),
                    first: stage.name.clone(),
                    second: stage.name.clone(),
                });
            }
        }

        for artifact in &stage.produces {
            self.producers.insert(artifact.clone(), stage.name.clone());
        }
        self.name_to_index.insert(stage.name.clone(), self.stages.len());
        self.stages.push(stage);

        Ok(())
    }

    /// Registered stages in registration order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Look up a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.name_to_index.get(name).map(|&idx| &self.stages[idx])
    }

    /// Number of registered stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no stage is registered
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage producing an artifact
    pub fn producer_of(&self, artifact: &str) -> Option<&str> {
        self.producers.get(artifact).map(String::as_str)
    }

    /// Build the petgraph representation; node weights are stage indices
    fn build_graph(&self) -> Result<DiGraph<usize, ()>, StagegateError> {
        let mut graph = DiGraph::with_capacity(self.stages.len(), self.stages.len());
        let nodes: Vec<NodeIndex> = (0..self.stages.len()).map(|i| graph.add_node(i)).collect();

        for (idx, stage) in self.stages.iter().enumerate() {
            for dep in &stage.depends_on {
                let dep_idx = self.name_to_index.get(dep).ok_or_else(|| {
                    StagegateError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;

                if !graph.contains_edge(nodes[*dep_idx], nodes[idx]) {
                    graph.add_edge(nodes[*dep_idx], nodes[idx], ());
                }
            }
        }

        Ok(graph)
    }

    /// Partition stages into dependency levels
    ///
    /// Level `i` holds exactly the stages whose dependencies all sit in
    /// levels `< i`. Names inside a level are sorted; the order carries no
    /// meaning beyond stable output.
    pub fn topological_levels(&self) -> Result<Vec<Vec<String>>, StagegateError> {
        let graph = self.build_graph()?;

        let order = toposort(&graph, None).map_err(|_| StagegateError::Cycle {
            stages: self.find_cycle(&graph),
        })?;

        let mut depth = vec![0usize; self.stages.len()];
        for node in &order {
            let level = graph
                .neighbors_directed(*node, Direction::Incoming)
                .map(|dep| depth[graph[dep]] + 1)
                .max()
                .unwrap_or(0);
            depth[graph[*node]] = level;
        }

        self.check_artifact_wiring(&graph)?;

        let level_count = depth.iter().max().map_or(0, |d| d + 1);
        let mut levels = vec![Vec::new(); level_count];
        for (idx, stage) in self.stages.iter().enumerate() {
            levels[depth[idx]].push(stage.name.clone());
        }
        for level in &mut levels {
            level.sort();
        }

        Ok(levels)
    }

    /// Every required artifact must come from a transitive dependency
    fn check_artifact_wiring(&self, graph: &DiGraph<usize, ()>) -> Result<(), StagegateError> {
        for (idx, stage) in self.stages.iter().enumerate() {
            for artifact in &stage.requires {
                let producer = self.producers.get(artifact).ok_or_else(|| {
                    StagegateError::UnknownArtifact {
                        stage: stage.name.clone(),
                        artifact: artifact.clone(),
                    }
                })?;

                let producer_idx = self.name_to_index[producer];
                let upstream = producer_idx != idx
                    && has_path_connecting(
                        graph,
                        NodeIndex::new(producer_idx),
                        NodeIndex::new(idx),
                        None,
                    );

                if !upstream {
                    return Err(StagegateError::ArtifactNotUpstream {
                        stage: stage.name.clone(),
                        artifact: artifact.clone(),
                        producer: producer.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Find one dependency cycle, as a closed path of stage names
    fn find_cycle(&self, graph: &DiGraph<usize, ()>) -> Vec<String> {
        let name = |node: NodeIndex| self.stages[graph[node]].name.clone();

        let Some(component) = kosaraju_scc(graph)
            .into_iter()
            .filter(|c| c.len() > 1 || graph.contains_edge(c[0], c[0]))
            .min_by_key(|c| c.iter().map(|n| graph[*n]).min())
        else {
            return vec![];
        };

        let Some(&start) = component.iter().min_by_key(|n| graph[**n]) else {
            return vec![];
        };
        let members: HashSet<NodeIndex> = component.iter().copied().collect();

        // BFS inside the component for the shortest way back to `start`
        let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for next in graph.neighbors_directed(node, Direction::Outgoing) {
                if next == start {
                    let mut path = vec![name(node)];
                    let mut cur = node;
                    while cur != start {
                        match prev.get(&cur) {
                            Some(&p) => cur = p,
                            None => break,
                        }
                        path.push(name(cur));
                    }
                    path.reverse();
                    path.push(name(start));
                    return path;
                }
                if members.contains(&next) && !prev.contains_key(&next) {
                    prev.insert(next, node);
                    queue.push_back(next);
                }
            }
        }

        let mut names: Vec<String> = component.into_iter().map(name).collect();
        names.sort();
        names
    }

    /// Declared dependencies of a stage (stages that must run before it)
    pub fn dependencies(&self, stage_name: &str) -> Option<Vec<String>> {
        let stage = self.stage(stage_name)?;
        let mut seen = HashSet::new();
        Some(
            stage
                .depends_on
                .iter()
                .filter(|d| seen.insert(d.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Stages that directly depend on a stage
    pub fn dependents(&self, stage_name: &str) -> Option<Vec<String>> {
        self.stage(stage_name)?;
        Some(
            self.stages
                .iter()
                .filter(|s| s.depends_on.iter().any(|d| d == stage_name))
                .map(|s| s.name.clone())
                .collect(),
        )
    }

    /// Transitive dependencies of a stage
    pub fn ancestors(&self, stage_name: &str) -> HashSet<String> {
        let mut found = HashSet::new();
        let mut stack: Vec<&str> = vec![stage_name];

        while let Some(current) = stack.pop() {
            let Some(stage) = self.stage(current) else {
                continue;
            };
            for dep in &stage.depends_on {
                if found.insert(dep.clone()) {
                    stack.push(dep);
                }
            }
        }

        found
    }

    /// Check if stage A depends (directly or transitively) on stage B
    pub fn depends_on(&self, stage_a: &str, stage_b: &str) -> bool {
        self.ancestors(stage_a).contains(stage_b)
    }

    /// Sub-graph holding `targets` and everything they transitively need
    pub fn restricted_to(&self, targets: &[String]) -> Result<Self, StagegateError> {
        let mut keep: HashSet<String> = HashSet::new();
        for target in targets {
            if self.stage(target).is_none() {
                return Err(StagegateError::StageNotFound {
                    stage: target.clone(),
                });
            }
            keep.insert(target.clone());
            keep.extend(self.ancestors(target));
        }

        let mut graph = Self::new();
        for stage in self.stages.iter().filter(|s| keep.contains(&s.name)) {
            graph.add_stage(stage.clone())?;
        }
        Ok(graph)
    }

    /// Independent branches: groups of stages with no dependency path between groups
    pub fn branches(&self) -> Vec<BTreeSet<String>> {
        let mut sets = UnionFind::new(self.stages.len());
        for (idx, stage) in self.stages.iter().enumerate() {
            for dep in &stage.depends_on {
                if let Some(&dep_idx) = self.name_to_index.get(dep) {
                    sets.union(idx, dep_idx);
                }
            }
        }

        let mut groups: HashMap<usize, BTreeSet<String>> = HashMap::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            groups
                .entry(sets.find(idx))
                .or_default()
                .insert(stage.name.clone());
        }

        let mut branches: Vec<_> = groups.into_values().collect();
        branches.sort();
        branches
    }

    /// Generate Mermaid diagram of the graph
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for stage in &self.stages {
            out.push_str(&format!("    {}[{}]\n", mermaid_id(&stage.name), stage.name));
        }

        for (from, to) in self.sorted_edges() {
            let carried: Vec<&str> = self
                .stage(&to)
                .map(|s| {
                    s.requires
                        .iter()
                        .filter(|a| self.producer_of(a) == Some(from.as_str()))
                        .map(String::as_str)
                        .collect()
                })
                .unwrap_or_default();

            if carried.is_empty() {
                out.push_str(&format!("    {} --> {}\n", mermaid_id(&from), mermaid_id(&to)));
            } else {
                out.push_str(&format!(
                    "    {} -->|{}| {}\n",
                    mermaid_id(&from),
                    carried.join(", "),
                    mermaid_id(&to)
                ));
            }
        }

        out
    }

    /// Generate DOT diagram of the graph
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for stage in &self.stages {
            out.push_str(&format!("    \"{}\";\n", stage.name));
        }
        if !self.stages.is_empty() {
            out.push('\n');
        }

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of the execution levels
    pub fn to_text(&self) -> Result<String, StagegateError> {
        let levels = self.topological_levels()?;
        let mut out = String::new();

        for (i, level) in levels.iter().enumerate() {
            out.push_str(&format!("Level {}:\n", i + 1));

            for name in level {
                let Some(stage) = self.stage(name) else {
                    continue;
                };
                out.push_str(&format!("  - {} ({})", stage.name, stage.runner_name()));

                let deps = self.dependencies(name).unwrap_or_default();
                if !deps.is_empty() {
                    out.push_str(&format!(" [depends: {}]", deps.join(", ")));
                }
                if stage.gate != Default::default() {
                    out.push_str(&format!(" [gate: {}]", stage.gate));
                }

                out.push('\n');
            }
        }

        Ok(out)
    }

    fn sorted_edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .stages
            .iter()
            .flat_map(move |s| {
                s.depends_on
                    .iter()
                    .filter(move |d| self.name_to_index.contains_key(*d))
                    .map(move |d| (d.clone(), s.name.clone()))
            })
            .collect();
        edges.sort();
        edges.dedup();
        edges
    }
}

fn mermaid_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::GatingPolicy;

    fn make_graph(stages: Vec<(&str, Vec<&str>)>) -> Result<PipelineGraph, StagegateError> {
        let mut graph = PipelineGraph::new();
        for (name, deps) in stages {
            graph.add_stage(Stage::shell(name, "true").after(deps))?;
        }
        Ok(graph)
    }

    #[test]
    fn test_linear_levels() {
        let graph = make_graph(vec![
            ("security", vec![]),
            ("data", vec!["security"]),
            ("training", vec!["data"]),
            ("build", vec!["training"]),
        ])
        .unwrap();

        let levels = graph.topological_levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["security"],
                vec!["data"],
                vec!["training"],
                vec!["build"]
            ]
        );
    }

    #[test]
    fn test_diamond_levels() {
        let graph = make_graph(vec![
            ("d", vec!["b", "c"]),
            ("a", vec![]),
            ("c", vec!["a"]),
            ("b", vec!["a"]),
        ])
        .unwrap();

        let levels = graph.topological_levels().unwrap();
        assert_eq!(levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_longest_path_layering() {
        // c depends on a directly and on b, so it must sit after b
        let graph = make_graph(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["a", "b"])]).unwrap();

        let levels = graph.topological_levels().unwrap();
        assert_eq!(levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_levels_partition_respects_dependencies() {
        let graph = make_graph(vec![
            ("scan-deps", vec![]),
            ("scan-code", vec![]),
            ("lint", vec![]),
            ("test", vec!["lint"]),
            ("data", vec!["scan-deps", "scan-code", "test"]),
            ("features", vec!["data"]),
            ("train", vec!["features"]),
            ("drift", vec!["train", "data"]),
            ("build", vec!["train"]),
            ("frontend-security", vec![]),
            ("frontend-build", vec!["frontend-security"]),
        ])
        .unwrap();

        let levels = graph.topological_levels().unwrap();
        let level_of: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .flat_map(|(i, l)| l.iter().map(move |n| (n.as_str(), i)))
            .collect();

        assert_eq!(level_of.len(), graph.len());
        for stage in graph.stages() {
            let mine = level_of[stage.name.as_str()];
            for dep in &stage.depends_on {
                assert!(level_of[dep.as_str()] < mine, "{} before {}", dep, stage.name);
            }
            if mine > 0 {
                assert!(stage
                    .depends_on
                    .iter()
                    .any(|d| level_of[d.as_str()] == mine - 1));
            }
        }
    }

    #[test]
    fn test_duplicate_stage() {
        let result = make_graph(vec![("a", vec![]), ("a", vec![])]);
        assert!(matches!(result, Err(StagegateError::DuplicateStage { .. })));
    }

    #[test]
    fn test_stage_name_must_not_escape_scratch() {
        let absolute = std::env::temp_dir().join("victim");
        let absolute = absolute.to_string_lossy();

        for name in [&*absolute, "..", "a/in"] {
            let mut graph = PipelineGraph::new();
            let err = graph.add_stage(Stage::shell(name, "true")).unwrap_err();
            assert!(
                matches!(err, StagegateError::InvalidStage { .. }),
                "{:?} accepted",
                name
            );
            assert!(graph.is_empty());
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let graph = make_graph(vec![("a", vec!["nonexistent"])]).unwrap();

        let result = graph.topological_levels();
        assert!(matches!(result, Err(StagegateError::UnknownDependency { .. })));
    }

    #[test]
    fn test_forward_reference_resolves() {
        let graph = make_graph(vec![("b", vec!["a"]), ("a", vec![])]).unwrap();
        assert_eq!(graph.topological_levels().unwrap(), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_cycle_detection() {
        let graph = make_graph(vec![
            ("root", vec![]),
            ("a", vec!["root", "c"]),
            ("b", vec!["a"]),
            ("c", vec!["b"]),
        ])
        .unwrap();

        match graph.topological_levels() {
            Err(StagegateError::Cycle { stages }) => {
                assert_eq!(stages.first(), stages.last());
                assert_eq!(stages.len(), 4);
                for member in ["a", "b", "c"] {
                    assert!(stages.iter().any(|s| s == member));
                }
                assert!(!stages.iter().any(|s| s == "root"));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let graph = make_graph(vec![("a", vec!["a"])]).unwrap();

        match graph.topological_levels() {
            Err(StagegateError::Cycle { stages }) => assert_eq!(stages, vec!["a", "a"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_producer() {
        let mut graph = PipelineGraph::new();
        graph
            .add_stage(Stage::shell("data", "true").produces(["featured.csv"]))
            .unwrap();

        let result = graph.add_stage(Stage::shell("other", "true").produces(["featured.csv"]));
        assert!(matches!(result, Err(StagegateError::DuplicateProducer { .. })));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_required_artifact_must_be_upstream() {
        let mut graph = PipelineGraph::new();
        graph
            .add_stage(Stage::shell("data", "true").produces(["featured.csv"]))
            .unwrap();
        graph
            .add_stage(Stage::shell("train", "true").requires(["featured.csv"]))
            .unwrap();

        let result = graph.topological_levels();
        assert!(matches!(result, Err(StagegateError::ArtifactNotUpstream { .. })));
    }

    #[test]
    fn test_required_artifact_transitively_upstream() {
        let mut graph = PipelineGraph::new();
        graph
            .add_stage(Stage::shell("data", "true").produces(["featured.csv"]))
            .unwrap();
        graph.add_stage(Stage::shell("features", "true").after(["data"])).unwrap();
        graph
            .add_stage(
                Stage::shell("train", "true")
                    .after(["features"])
                    .requires(["featured.csv"]),
            )
            .unwrap();

        assert!(graph.topological_levels().is_ok());
    }

    #[test]
    fn test_unknown_artifact() {
        let mut graph = PipelineGraph::new();
        graph
            .add_stage(Stage::shell("train", "true").requires(["config.yaml"]))
            .unwrap();

        let result = graph.topological_levels();
        assert!(matches!(result, Err(StagegateError::UnknownArtifact { .. })));
    }

    #[test]
    fn test_depends_on_check() {
        let graph = make_graph(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]).unwrap();

        assert!(graph.depends_on("c", "a")); // transitive
        assert!(graph.depends_on("c", "b")); // direct
        assert!(!graph.depends_on("a", "c"));
        assert_eq!(graph.dependents("a").unwrap(), vec!["b"]);
        assert!(graph.dependents("zzz").is_none());
    }

    #[test]
    fn test_restricted_to_keeps_ancestors() {
        let graph = make_graph(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["b"]),
            ("other", vec![]),
        ])
        .unwrap();

        let sub = graph.restricted_to(&["b".to_string()]).unwrap();
        let names: Vec<_> = sub.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let err = graph.restricted_to(&["nope".to_string()]).unwrap_err();
        assert!(matches!(err, StagegateError::StageNotFound { .. }));
    }

    #[test]
    fn test_branches() {
        let graph = make_graph(vec![
            ("security", vec![]),
            ("data", vec!["security"]),
            ("frontend-security", vec![]),
            ("frontend-build", vec!["frontend-security"]),
        ])
        .unwrap();

        let branches = graph.branches();
        assert_eq!(branches.len(), 2);
        assert!(branches[0].contains("data") && branches[0].contains("security"));
        assert!(branches[1].contains("frontend-build"));
    }

    #[test]
    fn test_mermaid_output() {
        let mut graph = PipelineGraph::new();
        graph
            .add_stage(Stage::shell("data", "true").produces(["featured.csv"]))
            .unwrap();
        graph
            .add_stage(
                Stage::shell("train-model", "true")
                    .after(["data"])
                    .requires(["featured.csv"]),
            )
            .unwrap();

        let mermaid = graph.to_mermaid();
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("train_model[train-model]"));
        assert!(mermaid.contains("data -->|featured.csv| train_model"));
    }

    #[test]
    fn test_dot_output() {
        let graph = make_graph(vec![("a", vec![]), ("b", vec!["a"])]).unwrap();

        insta::assert_snapshot!(graph.to_dot(), @r###"
        digraph pipeline {
            rankdir=TB;
            node [shape=box, style=rounded];

            "a";
            "b";

            "a" -> "b";
        }
        "###);
    }

    #[test]
    fn test_text_output() {
        let mut graph = make_graph(vec![("security", vec![]), ("data", vec!["security"])]).unwrap();
        graph
            .add_stage(
                Stage::shell("notify", "true")
                    .after(["data"])
                    .gate(GatingPolicy::OnFailure),
            )
            .unwrap();

        insta::assert_snapshot!(graph.to_text().unwrap(), @r###"
        Level 1:
          - security (shell)
        Level 2:
          - data (shell) [depends: security]
        Level 3:
          - notify (shell) [depends: data] [gate: on_failure]
        "###);
    }
}
