//! dag.rs
//! Parent -> child dependency graph over derived fields, ordered with Kahn's Algorithm.

use crate::store::{FieldDefinition, FieldId};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Field '{field}' lists itself as a parent")]
    SelfReference { field: FieldId },
    #[error("Cycle detected among derived fields: {}", IdList(.fields))]
    Cycle { fields: Vec<FieldId> },
}

struct IdList<'a>(&'a [FieldId]);

impl fmt::Display for IdList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "'{}'", id)?;
        }
        Ok(())
    }
}

/// Evaluation order of the derived fields in a schema.
///
/// Every derived field appears after each derived field it reads from. Fields
/// with no ordering constraint between them keep their display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopoOrder {
    order: Vec<FieldId>,
    /// parent -> derived children, for every declared edge (ordinary parents included).
    children: HashMap<FieldId, Vec<FieldId>>,
}

impl TopoOrder {
    pub fn as_slice(&self) -> &[FieldId] { &self.order }
    pub fn iter(&self) -> impl Iterator<Item = &FieldId> { self.order.iter() }
    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    pub fn children_of(&self, id: &FieldId) -> &[FieldId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Derived fields whose value can change when any of `changed` changes.
    /// Used for incremental re-derivation.
    pub fn downstream_from(&self, changed: &[FieldId]) -> HashSet<FieldId> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&FieldId> = changed.iter().collect();

        while let Some(node) = queue.pop_front() {
            for child in self.children_of(node) {
                if visited.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
        }
        visited
    }
}

/// Builds the derivation graph and returns the derived fields in topological order.
///
/// Only derived -> derived edges constrain the order; ordinary parents have
/// their values supplied directly. Parent ids that name no field are left for
/// the resolver, which reads them as empty.
pub fn build_graph(fields: &[FieldDefinition]) -> Result<TopoOrder, GraphError> {
    // Rank derived fields by display order, position breaking ties.
    let mut derived: Vec<(usize, &FieldDefinition)> =
        fields.iter().enumerate().filter(|(_, f)| f.is_derived()).collect();
    derived.sort_by_key(|(pos, f)| (f.order, *pos));
    let derived: Vec<&FieldDefinition> = derived.into_iter().map(|(_, f)| f).collect();

    let rank: HashMap<&str, usize> =
        derived.iter().enumerate().map(|(r, f)| (f.id.as_str(), r)).collect();

    let mut children: HashMap<FieldId, Vec<FieldId>> = HashMap::new();
    let mut in_degree = vec![0usize; derived.len()];
    let mut child_ranks: Vec<Vec<usize>> = vec![Vec::new(); derived.len()];

    // 1. Edges and in-degrees
    for (r, field) in derived.iter().enumerate() {
        let Some(spec) = field.derived_spec() else { continue };
        let mut seen = HashSet::new();
        for parent in &spec.parent_fields {
            if parent == &field.id {
                return Err(GraphError::SelfReference { field: field.id.clone() });
            }
            if !seen.insert(parent.as_str()) {
                continue;
            }
            children.entry(parent.clone()).or_default().push(field.id.clone());
            if let Some(&p) = rank.get(parent.as_str()) {
                in_degree[r] += 1;
                child_ranks[p].push(r);
            }
        }
    }

    // 2. Process ready set, lowest rank first
    let mut ready: BTreeSet<usize> = (0..derived.len()).filter(|&r| in_degree[r] == 0).collect();
    let mut order = Vec::with_capacity(derived.len());

    while let Some(r) = ready.pop_first() {
        order.push(derived[r].id.clone());
        for &child in &child_ranks[r] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() != derived.len() {
        return Err(GraphError::Cycle { fields: cycle_members(&derived, &child_ranks, &in_degree) });
    }

    tracing::debug!(derived = order.len(), fields = fields.len(), "built derivation graph");
    Ok(TopoOrder { order, children })
}

/// Names the fields that actually sit on a cycle, leaving out fields that are
/// merely downstream of one.
fn cycle_members(derived: &[&FieldDefinition], child_ranks: &[Vec<usize>], in_degree: &[usize]) -> Vec<FieldId> {
    let mut graph = DiGraphMap::<usize, ()>::new();
    for (p, kids) in child_ranks.iter().enumerate() {
        if in_degree[p] == 0 {
            continue;
        }
        graph.add_node(p);
        for &c in kids {
            if in_degree[c] > 0 {
                graph.add_edge(p, c, ());
            }
        }
    }

    let mut members: Vec<usize> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1)
        .flatten()
        .collect();
    members.sort_unstable();
    members.into_iter().map(|r| derived[r].id.clone()).collect()
}
