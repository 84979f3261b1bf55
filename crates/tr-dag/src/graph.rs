//! DAG builder (§4.4): produces a dependency graph from a stage's
//! steps and detects cycles in O(V+E).
//!
//! A node is keyed by the step's action reference (§3, "DAG: mapping
//! from step key (== action name referenced) to a node"), carries its
//! prerequisite list as incoming edges, and an arbitrary payload `T` owned
//! by the caller (the resolved step + action, in `tr-core`).

use std::collections::HashMap;

use tr_types::{DependencyError, OnError};

/// One node's static data, as supplied to [`Dag::build`].
pub struct NodeSpec<T> {
    pub id: String,
    pub requires: Vec<String>,
    pub onerror: OnError,
    pub data: T,
}

struct Node<T> {
    id: String,
    requires: Vec<usize>,
    onerror: OnError,
    data: T,
}

/// A built, acyclic dependency graph over `T`-labeled nodes.
///
/// Node order mirrors declaration order in the input (the order in which
/// `NodeSpec`s were passed to [`Dag::build`]) — this is also the order the
/// ordered output manager uses for declaration-order emission (§4.7).
pub struct Dag<T> {
    nodes: Vec<Node<T>>,
    index: HashMap<String, usize>,
    dependents: Vec<Vec<usize>>,
}

impl<T> Dag<T> {
    /// Build the graph. Fails with [`DependencyError::UnknownPrerequisite`]
    /// if a `requires` entry does not name another node in the same input,
    /// or [`DependencyError::Cycle`] if a depth-first search finds a back
    /// edge (the cycle path is returned root-to-repeat).
    pub fn build(specs: Vec<NodeSpec<T>>) -> Result<Self, DependencyError> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            index.insert(spec.id.clone(), i);
        }

        let mut nodes = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut requires = Vec::with_capacity(spec.requires.len());
            for r in &spec.requires {
                let idx = index.get(r).copied().ok_or_else(|| DependencyError::UnknownPrerequisite {
                    step: spec.id.clone(),
                    requires: r.clone(),
                })?;
                requires.push(idx);
            }
            nodes.push(Node { id: spec.id, requires, onerror: spec.onerror, data: spec.data });
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for &dep in &node.requires {
                dependents[dep].push(i);
            }
        }

        let dag = Dag { nodes, index, dependents };
        dag.check_acyclic()?;
        Ok(dag)
    }

    fn check_acyclic(&self) -> Result<(), DependencyError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color { White, Gray, Black }
        let mut color = vec![Color::White; self.nodes.len()];
        let mut path = Vec::new();

        fn visit<T>(
            dag: &Dag<T>,
            i: usize,
            color: &mut [Color],
            path: &mut Vec<usize>,
        ) -> Result<(), DependencyError> {
            color[i] = Color::Gray;
            path.push(i);
            for &dep in &dag.nodes[i].requires {
                match color[dep] {
                    Color::White => visit(dag, dep, color, path)?,
                    Color::Gray => {
                        let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..].iter().map(|&p| dag.nodes[p].id.clone()).collect();
                        cycle.push(dag.nodes[dep].id.clone());
                        return Err(DependencyError::Cycle { path: cycle });
                    }
                    Color::Black => {}
                }
            }
            path.pop();
            color[i] = Color::Black;
            Ok(())
        }

        for i in 0..self.nodes.len() {
            if color[i] == Color::White {
                visit(self, i, &mut color, &mut path)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_id(&self, idx: usize) -> &str {
        &self.nodes[idx].id
    }

    pub fn node_data(&self, idx: usize) -> &T {
        &self.nodes[idx].data
    }

    pub fn onerror(&self, idx: usize) -> OnError {
        self.nodes[idx].onerror
    }

    pub fn requires(&self, idx: usize) -> &[usize] {
        &self.nodes[idx].requires
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Declaration-order node indices.
    pub fn declaration_order(&self) -> impl Iterator<Item = usize> {
        0..self.nodes.len()
    }

    /// The transitive closure of prerequisites for `idx`, including `idx`
    /// itself (used by `RunStageStep --with-requires`, §4.8).
    pub fn transitive_closure(&self, idx: usize) -> Vec<usize> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![idx];
        let mut out = Vec::new();
        while let Some(i) = stack.pop() {
            if seen[i] {
                continue;
            }
            seen[i] = true;
            out.push(i);
            for &dep in &self.nodes[i].requires {
                stack.push(dep);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, requires: &[&str]) -> NodeSpec<()> {
        NodeSpec { id: id.to_string(), requires: requires.iter().map(|s| s.to_string()).collect(), onerror: OnError::Stop, data: () }
    }

    #[test]
    fn accepts_linear_chain() {
        let dag = Dag::build(vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])]).unwrap();
        assert_eq!(dag.len(), 3);
        assert_eq!(dag.requires(dag.index_of("c").unwrap()), &[dag.index_of("b").unwrap()]);
    }

    #[test]
    fn rejects_unknown_prerequisite() {
        let err = Dag::build(vec![spec("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, DependencyError::UnknownPrerequisite { .. }));
    }

    #[test]
    fn rejects_direct_cycle() {
        let err = Dag::build(vec![spec("a", &["b"]), spec("b", &["a"])]).unwrap_err();
        assert!(matches!(err, DependencyError::Cycle { .. }));
    }

    #[test]
    fn rejects_self_cycle() {
        let err = Dag::build(vec![spec("a", &["a"])]).unwrap_err();
        assert!(matches!(err, DependencyError::Cycle { .. }));
    }

    #[test]
    fn accepts_diamond() {
        let dag = Dag::build(vec![
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["a"]),
            spec("d", &["b", "c"]),
        ])
        .unwrap();
        assert_eq!(dag.len(), 4);
    }

    #[test]
    fn transitive_closure_includes_self_and_ancestors() {
        let dag = Dag::build(vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])]).unwrap();
        let closure: Vec<&str> = dag.transitive_closure(dag.index_of("c").unwrap()).into_iter().map(|i| dag.node_id(i)).collect();
        assert_eq!(closure.len(), 3);
        assert!(closure.contains(&"a"));
        assert!(closure.contains(&"b"));
        assert!(closure.contains(&"c"));
    }

    #[test]
    fn declaration_order_matches_input_order() {
        let dag = Dag::build(vec![spec("z", &[]), spec("a", &[]), spec("m", &[])]).unwrap();
        let order: Vec<&str> = dag.declaration_order().map(|i| dag.node_id(i)).collect();
        assert_eq!(order, vec!["z", "a", "m"]);
    }
}
