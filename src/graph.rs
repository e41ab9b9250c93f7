//! Dependency graph over steps, used to order `Steps::Graph` pipelines.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;

use crate::error::{PipelineError, Result};
use crate::step::Step;

/// Steps and their prerequisite edges, indexed in first-seen order.
///
/// First-seen order walks the mapping's keys in declaration order and, for
/// each key, visits the key and then its listed prerequisites. That order is
/// the tie-break whenever several steps are ready at once.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<Step>,
    index: HashMap<Step, usize>,
    /// Per node, the nodes it depends on.
    dependencies: Vec<Vec<usize>>,
    /// Per node, the nodes that depend on it.
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn from_mapping(mapping: &IndexMap<Step, Vec<Step>>) -> Self {
        let mut graph = Self::default();
        for (step, prerequisites) in mapping {
            let dependent = graph.intern(step);
            for prerequisite in prerequisites {
                let prerequisite = graph.intern(prerequisite);
                graph.add_edge(dependent, prerequisite);
            }
        }
        graph
    }

    fn intern(&mut self, step: &Step) -> usize {
        if let Some(&idx) = self.index.get(step) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(step.clone());
        self.index.insert(step.clone(), idx);
        self.dependencies.push(Vec::new());
        self.dependents.push(Vec::new());
        idx
    }

    fn add_edge(&mut self, dependent: usize, prerequisite: usize) {
        if self.dependencies[dependent].contains(&prerequisite) {
            return;
        }
        self.dependencies[dependent].push(prerequisite);
        self.dependents[prerequisite].push(dependent);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct prerequisites of `step`, if it is part of the graph.
    pub fn dependencies_of(&self, step: &Step) -> Option<Vec<&Step>> {
        let idx = *self.index.get(step)?;
        Some(
            self.dependencies[idx]
                .iter()
                .map(|&dep| &self.nodes[dep])
                .collect(),
        )
    }

    /// Returns steps with every prerequisite ahead of the steps depending on
    /// it (Kahn's algorithm).
    pub fn topological_order(&self) -> Result<Vec<Step>> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&idx| in_degree[idx] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = queue.pop_front() {
            order.push(self.nodes[idx].clone());
            for &dependent in &self.dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let cycle = self
                .find_cycle()
                .map(|cycle| describe(&cycle))
                .unwrap_or_else(|| {
                    let remaining: Vec<Step> = (0..self.nodes.len())
                        .filter(|&idx| in_degree[idx] > 0)
                        .map(|idx| self.nodes[idx].clone())
                        .collect();
                    describe(&remaining)
                });
            return Err(PipelineError::CyclicDependency { cycle });
        }

        Ok(order)
    }

    /// The topological order reversed: each mapping key runs before the steps
    /// it lists.
    pub fn execution_order(&self) -> Result<Vec<Step>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Finds a dependency cycle, returned as a closed path (`a, b, a`).
    pub fn find_cycle(&self) -> Option<Vec<Step>> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Unvisited,
            Visiting,
            Visited,
        }

        let mut state = vec![State::Unvisited; self.nodes.len()];
        for root in 0..self.nodes.len() {
            if state[root] != State::Unvisited {
                continue;
            }
            // Depth-first walk with an explicit stack: each frame is a node on
            // the current path and the index of its next edge to follow.
            state[root] = State::Visiting;
            let mut path: Vec<(usize, usize)> = vec![(root, 0)];
            while let Some(frame) = path.last_mut() {
                let (node, next) = *frame;
                let Some(&dep) = self.dependencies[node].get(next) else {
                    state[node] = State::Visited;
                    path.pop();
                    continue;
                };
                frame.1 += 1;
                match state[dep] {
                    State::Visiting => {
                        let start = path.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                        let mut cycle: Vec<Step> = path[start..]
                            .iter()
                            .map(|&(n, _)| self.nodes[n].clone())
                            .collect();
                        cycle.push(self.nodes[dep].clone());
                        return Some(cycle);
                    }
                    State::Unvisited => {
                        state[dep] = State::Visiting;
                        path.push((dep, 0));
                    }
                    State::Visited => {}
                }
            }
        }
        None
    }
}

fn describe(steps: &[Step]) -> String {
    steps
        .iter()
        .map(Step::name)
        .collect::<Vec<_>>()
        .join(" -> ")
}
