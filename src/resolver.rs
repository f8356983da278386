// ABOUTME: Foreign-key aware processing order for a set of tables
// ABOUTME: Depth-first topological sort that drops cyclic edges instead of failing

use crate::table_name::TableName;
use std::collections::{BTreeMap, HashMap};

/// Table -> tables it references through a foreign key.
pub type DependencyGraph = BTreeMap<TableName, Vec<TableName>>;

/// An FK edge that was ignored for ordering because it closed a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEdge {
    pub from: TableName,
    pub to: TableName,
}

/// Result of [`resolve_order`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOrder {
    pub order: Vec<TableName>,
    pub dropped_edges: Vec<DroppedEdge>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

struct Resolver<'a> {
    tables: &'a [TableName],
    index: HashMap<&'a TableName, usize>,
    edges: Vec<Vec<usize>>,
    marks: Vec<Mark>,
    order: Vec<usize>,
    dropped: Vec<(usize, usize)>,
}

impl<'a> Resolver<'a> {
    fn new(tables: &'a [TableName], graph: &'a DependencyGraph) -> Self {
        let mut index = HashMap::with_capacity(tables.len());
        for (i, table) in tables.iter().enumerate() {
            index.entry(table).or_insert(i);
        }

        let edges = tables
            .iter()
            .enumerate()
            .map(|(i, table)| {
                graph
                    .get(table)
                    .map(|deps| {
                        deps.iter()
                            .filter_map(|dep| index.get(dep).copied())
                            .filter(|&j| j != i)
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        Self {
            tables,
            index,
            edges,
            marks: vec![Mark::Unvisited; tables.len()],
            order: Vec::with_capacity(tables.len()),
            dropped: Vec::new(),
        }
    }

    fn visit(&mut self, node: usize) {
        if self.marks[node] != Mark::Unvisited {
            return;
        }
        self.marks[node] = Mark::InProgress;

        for k in 0..self.edges[node].len() {
            let dep = self.edges[node][k];
            match self.marks[dep] {
                Mark::Done => {}
                Mark::InProgress => self.dropped.push((node, dep)),
                Mark::Unvisited => self.visit(dep),
            }
        }

        self.marks[node] = Mark::Done;
        self.order.push(node);
    }
}

/// Compute a processing order for `tables` from the FK adjacency in `graph`.
///
/// Every table appears after the tables it references, except where an edge
/// closes a cycle: that edge is dropped, logged at warning level and returned
/// in [`ResolvedOrder::dropped_edges`]. Self-references and references to
/// tables outside `tables` are ignored. Visitation starts from `tables` in the
/// given order, so an input without constraints comes back unchanged.
/// Duplicate input names are emitted once.
///
/// # Examples
///
/// ```
/// # use seren_snapshot::resolver::{resolve_order, DependencyGraph};
/// # use seren_snapshot::table_name::TableName;
/// let orders = TableName::new("orders").unwrap();
/// let customers = TableName::new("customers").unwrap();
/// let mut graph = DependencyGraph::new();
/// graph.insert(orders.clone(), vec![customers.clone()]);
///
/// let resolved = resolve_order(&[orders.clone(), customers.clone()], &graph);
/// assert_eq!(resolved.order, vec![customers, orders]);
/// ```
pub fn resolve_order(tables: &[TableName], graph: &DependencyGraph) -> ResolvedOrder {
    let mut resolver = Resolver::new(tables, graph);

    for start in 0..tables.len() {
        // Duplicates map to their first occurrence
        if resolver.index.get(&tables[start]) == Some(&start) {
            resolver.visit(start);
        }
    }

    let dropped_edges: Vec<DroppedEdge> = resolver
        .dropped
        .iter()
        .map(|&(from, to)| DroppedEdge {
            from: resolver.tables[from].clone(),
            to: resolver.tables[to].clone(),
        })
        .collect();

    for edge in &dropped_edges {
        tracing::warn!(
            from = %edge.from,
            to = %edge.to,
            "Foreign key cycle: '{}' may be processed before '{}', which it references",
            edge.from,
            edge.to
        );
    }

    ResolvedOrder {
        order: resolver
            .order
            .iter()
            .map(|&i| resolver.tables[i].clone())
            .collect(),
        dropped_edges,
    }
}
