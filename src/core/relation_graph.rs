use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::Bfs;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::models::relation::{NodeKey, Relation};

/// 从焦点出发可达的节点集合，总是包含焦点本身
pub type ConnectedComponent = BTreeSet<NodeKey>;

/// 由已启用关系构成的无向多重图，每次编译时新建，构建后不再修改
pub struct RelationGraph {
    graph: UnGraph<NodeKey, usize>,
    node_index: HashMap<NodeKey, NodeIndex>,
    // 按 RelationId 排序并去重，边权重是这里的下标
    relations: Vec<Relation>,
}

impl RelationGraph {
    pub fn build(relations: &[Relation]) -> Self {
        let mut unique: Vec<Relation> = Vec::with_capacity(relations.len());
        let mut seen = HashSet::new();
        for rel in relations {
            if seen.insert(rel.id.clone()) {
                unique.push(rel.clone());
            }
        }
        unique.sort_by(|a, b| a.id.cmp(&b.id));

        let mut graph = UnGraph::new_undirected();
        let mut node_index: HashMap<NodeKey, NodeIndex> = HashMap::new();
        for (pos, rel) in unique.iter().enumerate() {
            let a = *node_index
                .entry(rel.domain.node())
                .or_insert_with_key(|k| graph.add_node(k.clone()));
            let b = *node_index
                .entry(rel.range.node())
                .or_insert_with_key(|k| graph.add_node(k.clone()));
            graph.add_edge(a, b, pos);
        }

        debug!(
            "关系图构建完成: {} 个节点, {} 条关系",
            graph.node_count(),
            unique.len()
        );

        Self {
            graph,
            node_index,
            relations: unique,
        }
    }

    pub fn contains(&self, node: &NodeKey) -> bool {
        self.node_index.contains_key(node)
    }

    /// 所有被关系触及的端点，已去重并排序
    pub fn participants(&self) -> Vec<NodeKey> {
        let mut nodes: Vec<NodeKey> = self.node_index.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// 与节点相连的关系，按 RelationId 排序
    pub fn relations_touching(&self, node: &NodeKey) -> Vec<&Relation> {
        let Some(idx) = self.node_index.get(node) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self.graph.edges(*idx).map(|e| *e.weight()).collect();
        positions.sort_unstable();
        positions.dedup();
        positions.into_iter().map(|p| &self.relations[p]).collect()
    }

    /// 广度优先遍历求焦点所在的连通分量；Bfs 自带 visited 集合，环上也会终止
    pub fn reachable(&self, focus: &NodeKey) -> ConnectedComponent {
        let mut component = ConnectedComponent::new();
        component.insert(focus.clone());

        let Some(start) = self.node_index.get(focus) else {
            return component;
        };

        let mut bfs = Bfs::new(&self.graph, *start);
        while let Some(nx) = bfs.next(&self.graph) {
            component.insert(self.graph[nx].clone());
        }
        debug!("焦点 {} 的连通分量: {:?}", focus, component);
        component
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::relation::Endpoint;

    fn rel(a: &str, b: &str) -> Relation {
        Relation::new(
            format!("{}-{}", a, b),
            Endpoint::new(a, format!("{}_id", b)),
            Endpoint::new(b, "id"),
        )
    }

    fn keys(names: &[&str]) -> ConnectedComponent {
        names.iter().map(|n| NodeKey::new(*n)).collect()
    }

    #[test]
    fn test_reachable_excludes_other_islands() {
        let g = RelationGraph::build(&[rel("A", "B"), rel("B", "C"), rel("D", "E")]);
        assert_eq!(g.reachable(&NodeKey::new("A")), keys(&["A", "B", "C"]));
        assert_eq!(g.reachable(&NodeKey::new("E")), keys(&["D", "E"]));
    }

    #[test]
    fn test_focus_always_in_component() {
        let g = RelationGraph::build(&[rel("A", "B")]);
        assert!(g.reachable(&NodeKey::new("A")).contains(&NodeKey::new("A")));
        assert_eq!(g.reachable(&NodeKey::new("Z")), keys(&["Z"]));

        let empty = RelationGraph::build(&[]);
        assert_eq!(empty.reachable(&NodeKey::new("A")), keys(&["A"]));
    }

    #[test]
    fn test_reachable_is_order_independent() {
        let mut rels = vec![
            rel("A", "B"),
            rel("B", "C"),
            rel("C", "A"),
            rel("D", "E"),
            rel("C", "F"),
        ];
        let expected = RelationGraph::build(&rels).reachable(&NodeKey::new("A"));
        assert_eq!(expected, keys(&["A", "B", "C", "F"]));

        for _ in 0..rels.len() {
            rels.rotate_left(1);
            assert_eq!(RelationGraph::build(&rels).reachable(&NodeKey::new("A")), expected);
            let reversed: Vec<_> = rels.iter().rev().cloned().collect();
            assert_eq!(
                RelationGraph::build(&reversed).reachable(&NodeKey::new("A")),
                expected
            );
        }
    }

    #[test]
    fn test_disabling_bridge_isolates_focus() {
        let all = vec![rel("A", "B"), rel("B", "C")];
        let enabled: Vec<_> = all.into_iter().filter(|r| r.label != "A-B").collect();
        let g = RelationGraph::build(&enabled);
        assert_eq!(g.reachable(&NodeKey::new("A")), keys(&["A"]));
    }

    #[test]
    fn test_duplicate_relations_are_collapsed() {
        let forward = rel("A", "B");
        let backward = Relation::new("again", forward.range.clone(), forward.domain.clone());
        let g = RelationGraph::build(&[forward, backward, rel("A", "C")]);
        assert_eq!(g.relations_touching(&NodeKey::new("B")).len(), 1);
        assert_eq!(g.relations_touching(&NodeKey::new("A")).len(), 2);
        assert_eq!(g.participants(), vec![NodeKey::new("A"), NodeKey::new("B"), NodeKey::new("C")]);
    }

    #[test]
    fn test_typed_nodes_are_distinct() {
        let r = Relation::new(
            "typed",
            Endpoint::new("docs", "author").typed("pdf"),
            Endpoint::new("people", "id"),
        );
        let g = RelationGraph::build(&[r]);
        assert!(g.contains(&NodeKey::with_type("docs", "pdf")));
        assert!(!g.contains(&NodeKey::new("docs")));
    }

    #[test]
    fn test_self_relation_touches_node_once() {
        let r = Relation::new("parent", Endpoint::new("A", "parent_id"), Endpoint::new("A", "id"));
        let g = RelationGraph::build(&[r]);
        assert_eq!(g.relations_touching(&NodeKey::new("A")).len(), 1);
        assert_eq!(g.reachable(&NodeKey::new("A")), keys(&["A"]));
    }
}
