//! Reference cycles among instance fields.
//!
//! Nodes are the types of one unit, edges the strong-capable instance
//! fields whose type is another (or the same) type of the unit. Cycles are
//! found by a depth-first search in declaration order; each one is broken
//! at the edge whose owner was declared last, the last such field if the
//! owner contributes several. Searching again after every break keeps the
//! result independent of which back edge the search happens to meet first.

use std::collections::HashSet;

use crate::ast::{CompilationUnit, FieldDecl, Member, TypeDecl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldEdge {
    /// Index of the owning type in the unit
    pub owner: usize,
    /// Index of the field in the owner's members
    pub member: usize,
    pub target: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FieldGraph {
    nodes: usize,
    edges: Vec<FieldEdge>,
}

/// An edge chosen for weakening and the cycle it closed, in path order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenEdge {
    pub edge: FieldEdge,
    pub cycle: Vec<FieldEdge>,
}

impl FieldGraph {
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            edges: Vec::new(),
        }
    }

    /// Graph over the unit's instance fields accepted by `is_candidate`.
    pub fn of_unit(
        unit: &CompilationUnit,
        is_candidate: impl Fn(&TypeDecl, &FieldDecl) -> bool,
    ) -> Self {
        let mut graph = FieldGraph::new(unit.types.len());
        for (owner, decl) in unit.types.iter().enumerate() {
            for (member, m) in decl.members.iter().enumerate() {
                let Member::Field(field) = m else { continue };
                if field.is_static() || !is_candidate(decl, field) {
                    continue;
                }
                let erased = field.ty.erasure();
                let Some(name) = erased.class_name() else { continue };
                if let Some(target) = unit.types.iter().position(|t| t.qualified_name == name) {
                    graph.add_edge(owner, member, target);
                }
            }
        }
        graph
    }

    pub fn add_edge(&mut self, owner: usize, member: usize, target: usize) {
        self.nodes = self.nodes.max(owner + 1).max(target + 1);
        self.edges.push(FieldEdge {
            owner,
            member,
            target,
        });
    }

    pub fn edges(&self) -> &[FieldEdge] {
        &self.edges
    }

    fn out_edges(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, edge)| edge.owner == node)
            .map(|(i, _)| i)
    }

    /// First cycle met by a declaration-order search that ignores
    /// `removed` edges.
    pub fn find_cycle(&self, removed: &HashSet<usize>) -> Option<Vec<usize>> {
        let mut search = Search {
            graph: self,
            removed,
            visited: vec![false; self.nodes],
            visiting: vec![false; self.nodes],
            path: Vec::new(),
        };
        (0..self.nodes).find_map(|node| {
            if search.visited[node] {
                None
            } else {
                search.visit(node)
            }
        })
    }

    /// Every edge that has to go for the graph to become acyclic.
    pub fn break_cycles(&self) -> Vec<BrokenEdge> {
        let mut removed = HashSet::new();
        let mut broken = Vec::new();
        while let Some(cycle) = self.find_cycle(&removed) {
            let Some(&chosen) = cycle
                .iter()
                .max_by_key(|&&i| (self.edges[i].owner, self.edges[i].member))
            else {
                break;
            };
            removed.insert(chosen);
            broken.push(BrokenEdge {
                edge: self.edges[chosen],
                cycle: cycle.iter().map(|&i| self.edges[i]).collect(),
            });
        }
        broken
    }
}

struct Search<'g> {
    graph: &'g FieldGraph,
    removed: &'g HashSet<usize>,
    visited: Vec<bool>,
    visiting: Vec<bool>,
    /// Edges from the search root to the current node
    path: Vec<usize>,
}

impl Search<'_> {
    fn visit(&mut self, node: usize) -> Option<Vec<usize>> {
        self.visiting[node] = true;
        let out: Vec<usize> = self.graph.out_edges(node).collect();
        for i in out {
            if self.removed.contains(&i) {
                continue;
            }
            let target = self.graph.edges[i].target;
            if self.visiting[target] {
                let start = self
                    .path
                    .iter()
                    .position(|&p| self.graph.edges[p].owner == target)
                    .unwrap_or(self.path.len());
                let mut cycle = self.path[start..].to_vec();
                cycle.push(i);
                return Some(cycle);
            }
            if !self.visited[target] {
                self.path.push(i);
                if let Some(cycle) = self.visit(target) {
                    return Some(cycle);
                }
                self.path.pop();
            }
        }
        self.visiting[node] = false;
        self.visited[node] = true;
        None
    }
}

/// `p.A -> p.B -> p.A`
pub fn describe_cycle(unit: &CompilationUnit, cycle: &[FieldEdge]) -> Vec<String> {
    let mut names: Vec<String> = cycle
        .iter()
        .map(|edge| unit.types[edge.owner].qualified_name.clone())
        .collect();
    if let Some(last) = cycle.last() {
        names.push(unit.types[last.target].qualified_name.clone());
    }
    names
}
