use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::TableDescriptor;

/// Summary of FK graph structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FkGraphSummary {
    pub nodes: usize,
    pub edges: usize,
}

/// Report for FK dependency ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FkGraphReport {
    pub summary: FkGraphSummary,
    pub insertion_order: Option<Vec<String>>,
    pub cycle: Option<Vec<String>>,
}

/// Build a deterministic FK dependency report for a set of tables.
pub fn build_fk_graph_report(tables: &[TableDescriptor]) -> FkGraphReport {
    let children = build_adjacency(tables);
    let edges = children.iter().map(|targets| targets.len()).sum();
    let summary = FkGraphSummary {
        nodes: tables.len(),
        edges,
    };

    match toposort(&children) {
        Ok(order) => FkGraphReport {
            summary,
            insertion_order: Some(order.into_iter().map(|idx| tables[idx].name.clone()).collect()),
            cycle: None,
        },
        Err(cycle) => FkGraphReport {
            summary,
            insertion_order: None,
            cycle: Some(cycle.into_iter().map(|idx| tables[idx].name.clone()).collect()),
        },
    }
}

/// Indices of `tables` ordered so every parent precedes its children.
///
/// Ties keep the input order, so an already sorted list comes back unchanged.
/// Self references never block ordering.
pub fn insertion_order(tables: &[TableDescriptor]) -> Result<Vec<usize>> {
    let children = build_adjacency(tables);
    toposort(&children).map_err(|cycle| {
        let names: Vec<&str> = cycle.iter().map(|idx| tables[*idx].name.as_str()).collect();
        Error::InvalidSchema(format!(
            "foreign key cycle between tables: {}",
            names.join(", ")
        ))
    })
}

/// Indices of `tables` ordered so every child precedes its parents.
pub fn deletion_order(tables: &[TableDescriptor]) -> Result<Vec<usize>> {
    let mut order = insertion_order(tables)?;
    order.reverse();
    Ok(order)
}

/// `children[parent]` holds the indices of tables referencing `parent`.
/// References to tables outside the set are ignored.
fn build_adjacency(tables: &[TableDescriptor]) -> Vec<BTreeSet<usize>> {
    let index: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(idx, table)| (table.name.as_str(), idx))
        .collect();

    let mut children = vec![BTreeSet::new(); tables.len()];
    for (child, table) in tables.iter().enumerate() {
        for parent in table.parents() {
            if let Some(&parent) = index.get(parent) {
                children[parent].insert(child);
            }
        }
    }
    children
}

fn toposort(children: &[BTreeSet<usize>]) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut indegree: BTreeMap<usize, usize> = (0..children.len()).map(|idx| (idx, 0)).collect();
    for targets in children {
        for target in targets {
            if let Some(count) = indegree.get_mut(target) {
                *count += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .filter_map(|(node, count)| if *count == 0 { Some(*node) } else { None })
        .collect();

    let mut order = Vec::with_capacity(children.len());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for target in &children[node] {
            if let Some(count) = indegree.get_mut(target) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.insert(*target);
                }
            }
        }
    }

    if order.len() == children.len() {
        Ok(order)
    } else {
        Err(indegree
            .into_iter()
            .filter_map(|(node, count)| if count > 0 { Some(node) } else { None })
            .collect())
    }
}
