//! Column coloring of a sparsity pattern.
//!
//! Two columns that never have a non-zero in the same row can be perturbed with a single
//! Jacobian-vector product. The column intersection graph joins columns that do share a row,
//! and a proper coloring of that graph groups the columns into such independent sets.

use petgraph::graph::{NodeIndex, UnGraph};

pub type ColumnGraph = UnGraph<(), ()>;

/// Build the column intersection graph of the `(row, column)` pattern of a matrix with `ncols`
/// columns.
pub fn column_intersection_graph(non_zeros: &[(usize, usize)], ncols: usize) -> ColumnGraph {
    let nrows = non_zeros.iter().map(|&(i, _)| i + 1).max().unwrap_or(0);
    let mut cols_in_row = vec![Vec::new(); nrows];
    for &(i, j) in non_zeros {
        cols_in_row[i].push(j);
    }
    let mut graph = ColumnGraph::with_capacity(ncols, non_zeros.len());
    for _ in 0..ncols {
        graph.add_node(());
    }
    for cols in cols_in_row.iter_mut() {
        cols.sort_unstable();
        cols.dedup();
        for (a, &ja) in cols.iter().enumerate() {
            for &jb in &cols[a + 1..] {
                graph.update_edge(NodeIndex::new(ja), NodeIndex::new(jb), ());
            }
        }
    }
    graph
}

/// Greedy coloring in vertex order: each vertex takes the smallest color not used by an
/// already colored neighbour. Colors start at 1; the number of colors used is at most one more
/// than the maximum vertex degree.
pub fn greedy_coloring(graph: &ColumnGraph) -> Vec<usize> {
    let n = graph.node_count();
    let mut colors = vec![0; n];
    // forbidden[c] == v marks color c + 1 as taken by a neighbour of vertex v
    let mut forbidden = vec![usize::MAX; n + 1];
    for v in 0..n {
        for w in graph.neighbors(NodeIndex::new(v)) {
            let c = colors[w.index()];
            if c != 0 {
                forbidden[c - 1] = v;
            }
        }
        colors[v] = forbidden
            .iter()
            .position(|&f| f != v)
            .map(|c| c + 1)
            .unwrap_or(n + 1);
    }
    colors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colorings_of_small_patterns() {
        let cases = [
            (vec![(0, 0), (1, 1)], vec![1, 1]),
            (vec![(0, 0), (0, 1), (1, 1)], vec![1, 2]),
            (vec![(1, 1)], vec![1, 1]),
            (vec![(0, 0), (1, 0), (0, 1), (1, 1)], vec![1, 2]),
        ];
        for (pattern, expect) in cases {
            let graph = column_intersection_graph(&pattern, 2);
            assert_eq!(greedy_coloring(&graph), expect);
        }
    }

    #[test]
    fn tridiagonal_needs_three_colors() {
        let n: usize = 7;
        let mut pattern = Vec::new();
        for i in 0..n {
            for j in i.saturating_sub(1)..(i + 2).min(n) {
                pattern.push((i, j));
            }
        }
        let graph = column_intersection_graph(&pattern, n);
        let colors = greedy_coloring(&graph);
        insta::assert_snapshot!(format!("{:?}", colors), @"[1, 2, 3, 1, 2, 3, 1]");
    }

    #[test]
    fn empty_graph() {
        let graph = column_intersection_graph(&[], 0);
        assert!(greedy_coloring(&graph).is_empty());
    }
}
