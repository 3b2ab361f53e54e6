// Task Graph (DAG) Builder
// Builds a directed acyclic graph of task nodes from registered declarations

use crate::declaration::{TaskDeclaration, TaskRegistry};
use crate::pattern::Pattern;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to unknown task
    UnknownDependency,
    /// Invalid graph structure
    InvalidStructure,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::CyclicDependency,
        }
    }

    pub fn unknown_dependency(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownDependency,
        }
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidStructure,
        }
    }
}

/// How a consumer's fields are derived from a producer's outputs
#[derive(Debug, Clone)]
pub enum FieldBinding {
    /// Producer outputs are matched against the consumer's input pattern
    Pattern(Pattern),
    /// Producer outputs are taken as they are, without captures (merge without a pattern)
    PassThrough,
    /// Ordering only; no outputs flow along the edge
    OrderOnly,
}

#[derive(Debug, Clone)]
pub struct DependencyEdge {
    pub producer: String,
    pub consumer: String,
    pub binding: FieldBinding,
}

/// A declaration placed in the graph
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub declaration: Arc<TaskDeclaration>,
    /// Names of predecessor tasks
    pub dependencies: Vec<String>,
    /// Position in declaration order
    pub index: usize,
}

impl TaskNode {
    pub fn name(&self) -> &str {
        &self.declaration.name
    }
}

/// Task graph; acyclic by construction
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    indices: HashMap<String, usize>,
    edges: Vec<DependencyEdge>,
}

impl TaskGraph {
    /// Build a graph from a registry of declarations
    pub fn build(registry: &TaskRegistry) -> Result<Self, GraphError> {
        Self::from_declarations(registry.iter().cloned())
    }

    pub fn from_declarations<I>(declarations: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = Arc<TaskDeclaration>>,
    {
        let mut nodes = Vec::new();
        let mut indices = HashMap::new();
        let mut edges = Vec::new();

        for (index, declaration) in declarations.into_iter().enumerate() {
            if indices.insert(declaration.name.clone(), index).is_some() {
                return Err(GraphError::invalid_structure(format!(
                    "task '{}' is declared more than once",
                    declaration.name
                )));
            }

            for source in &declaration.sources {
                if let Some(producer) = &source.from {
                    let binding = match &source.pattern {
                        Some(pattern) => FieldBinding::Pattern(pattern.clone()),
                        None => FieldBinding::PassThrough,
                    };
                    edges.push(DependencyEdge {
                        producer: producer.clone(),
                        consumer: declaration.name.clone(),
                        binding,
                    });
                }
            }
            for producer in &declaration.after {
                edges.push(DependencyEdge {
                    producer: producer.clone(),
                    consumer: declaration.name.clone(),
                    binding: FieldBinding::OrderOnly,
                });
            }

            let dependencies = declaration
                .predecessors()
                .into_iter()
                .map(String::from)
                .collect();
            nodes.push(TaskNode {
                declaration,
                dependencies,
                index,
            });
        }

        let graph = Self {
            nodes,
            indices,
            edges,
        };

        graph.validate()?;

        Ok(graph)
    }

    /// Check for unknown dependencies, cycles and statically conflicting outputs
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            for dep in &node.dependencies {
                if !self.indices.contains_key(dep) {
                    return Err(GraphError::unknown_dependency(format!(
                        "task '{}' depends on unknown task '{}'",
                        node.name(),
                        dep
                    )));
                }
            }
        }

        self.detect_cycles()?;
        self.detect_output_conflicts()?;

        Ok(())
    }

    /// Detect cycles using DFS
    fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for node in &self.nodes {
            if !visited.contains(node.name()) {
                if let Some(cycle) = self.dfs_cycle(node, &mut visited, &mut rec_stack) {
                    let closing = cycle.last().cloned().unwrap_or_default();
                    let start = cycle.iter().position(|n| *n == closing).unwrap_or(0);
                    return Err(GraphError::cyclic(format!(
                        "circular dependency detected: {}",
                        cycle[start..].join(" -> ")
                    )));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &TaskNode,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        let name = node.name().to_string();
        visited.insert(name.clone());
        rec_stack.insert(name.clone());

        for dep in &node.dependencies {
            if !visited.contains(dep) {
                if let Some(idx) = self.indices.get(dep) {
                    if let Some(mut cycle) = self.dfs_cycle(&self.nodes[*idx], visited, rec_stack) {
                        cycle.insert(0, name.clone());
                        return Some(cycle);
                    }
                }
            } else if rec_stack.contains(dep) {
                return Some(vec![name.clone(), dep.clone()]);
            }
        }

        rec_stack.remove(&name);
        None
    }

    /// Two tasks declaring the same literal output can never both be right
    fn detect_output_conflicts(&self) -> Result<(), GraphError> {
        let mut claimed: HashMap<&str, &str> = HashMap::new();
        for node in &self.nodes {
            for output in node.declaration.outputs.iter().filter(|o| o.is_literal()) {
                if let Some(other) = claimed.insert(output.source(), node.name()) {
                    if other != node.name() {
                        return Err(GraphError::invalid_structure(format!(
                            "tasks '{}' and '{}' both declare output '{}'",
                            other,
                            node.name(),
                            output
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Tasks in dependency order; ties broken by declaration order
    pub fn topological_order(&self) -> Vec<&TaskNode> {
        // Kahn's algorithm
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = ready.pop_first() {
            let node = &self.nodes[idx];
            result.push(node);

            for dependent in self.dependents(node.name()) {
                if let Some(&d) = self.indices.get(dependent) {
                    in_degree[d] -= 1;
                    if in_degree[d] == 0 {
                        ready.insert(d);
                    }
                }
            }
        }

        result
    }

    /// Group tasks into levels; every task's predecessors sit in earlier levels
    pub fn levels(&self) -> Vec<Vec<&TaskNode>> {
        let mut levels: Vec<Vec<&TaskNode>> = Vec::new();
        let mut assigned: HashMap<&str, usize> = HashMap::new();

        for node in self.topological_order() {
            let level = node
                .dependencies
                .iter()
                .filter_map(|dep| assigned.get(dep.as_str()))
                .max()
                .map(|l| l + 1)
                .unwrap_or(0);

            assigned.insert(node.name(), level);

            if level >= levels.len() {
                levels.resize(level + 1, Vec::new());
            }
            levels[level].push(node);
        }

        levels
    }

    pub fn get(&self, name: &str) -> Option<&TaskNode> {
        self.indices.get(name).map(|&idx| &self.nodes[idx])
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Edges into `task`, in declaration order
    pub fn incoming<'a>(&'a self, task: &'a str) -> impl Iterator<Item = &'a DependencyEdge> + 'a {
        self.edges.iter().filter(move |e| e.consumer == task)
    }

    /// Distinct direct dependents of `task`
    pub fn dependents(&self, task: &str) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.producer == task) {
            if !names.contains(&edge.consumer.as_str()) {
                names.push(&edge.consumer);
            }
        }
        names
    }

    /// Sub-graph holding `targets` and everything they transitively depend on
    pub fn restrict_to(&self, targets: &[String]) -> Result<Self, GraphError> {
        let mut keep: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();

        for target in targets {
            let node = self.get(target).ok_or_else(|| {
                GraphError::unknown_dependency(format!("unknown target task '{}'", target))
            })?;
            stack.push(node.name());
        }

        while let Some(name) = stack.pop() {
            if keep.insert(name) {
                if let Some(node) = self.get(name) {
                    stack.extend(node.dependencies.iter().map(String::as_str));
                }
            }
        }

        Self::from_declarations(
            self.nodes
                .iter()
                .filter(|n| keep.contains(n.name()))
                .map(|n| n.declaration.clone()),
        )
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
