//! Dependency graph over calibration node ids.
//!
//! An edge `a -> b` reads "a depends on b": `b` has to be trustworthy before
//! `a` is attempted. Vertices and edges keep their insertion order so that
//! traversal is reproducible from run to run.

use std::collections::BTreeMap;

use crate::error::{CalibrationError, Result};

#[derive(Debug, Clone, Default)]
pub struct CalibrationGraph {
    vertices: Vec<String>,
    dependencies: BTreeMap<String, Vec<String>>,
    dependent_count: BTreeMap<String, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl CalibrationGraph {
    /// Build and validate a graph. Edge endpoints not listed in `vertices` are
    /// added on first sight. Duplicate edges collapse into one.
    pub fn new<V, E, S>(vertices: V, edges: E) -> Result<Self>
    where
        V: IntoIterator<Item = S>,
        E: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut graph = CalibrationGraph::default();
        for v in vertices {
            graph.insert_vertex(v.into());
        }
        for (dependent, dependency) in edges {
            let dependent = dependent.into();
            let dependency = dependency.into();
            graph.insert_vertex(dependent.clone());
            graph.insert_vertex(dependency.clone());

            let deps = graph.dependencies.entry(dependent).or_default();
            if !deps.contains(&dependency) {
                deps.push(dependency.clone());
                *graph.dependent_count.entry(dependency).or_default() += 1;
            }
        }

        graph.validate()?;
        Ok(graph)
    }

    fn insert_vertex(&mut self, id: String) {
        if !self.dependencies.contains_key(&id) {
            self.vertices.push(id.clone());
            self.dependencies.insert(id.clone(), Vec::new());
            self.dependent_count.insert(id, 0);
        }
    }

    /// Fails with `InvalidGraph` if the dependency edges contain a cycle.
    pub fn validate(&self) -> Result<()> {
        let mut marks: BTreeMap<&str, Mark> = self
            .vertices
            .iter()
            .map(|v| (v.as_str(), Mark::Unvisited))
            .collect();
        let mut path: Vec<&str> = Vec::new();

        for start in &self.vertices {
            if marks[start.as_str()] == Mark::Unvisited {
                if let Some(cycle) = self.find_cycle(start, &mut marks, &mut path) {
                    return Err(CalibrationError::InvalidGraph { cycle });
                }
            }
        }
        Ok(())
    }

    fn find_cycle<'a>(
        &'a self,
        id: &'a str,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(id, Mark::InProgress);
        path.push(id);

        for dep in self.dependencies_of(id) {
            match marks[dep.as_str()] {
                Mark::InProgress => {
                    let start = path.iter().position(|p| *p == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.find_cycle(dep, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks.insert(id, Mark::Done);
        None
    }

    /// Nodes `id` depends on, in edge insertion order. Unknown ids have none.
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes nothing else depends on: the final targets of a full run.
    pub fn roots_with_no_dependents(&self) -> Vec<String> {
        self.vertices
            .iter()
            .filter(|v| self.dependent_count.get(*v).copied().unwrap_or(0) == 0)
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    pub fn nodes(&self) -> &[String] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}
