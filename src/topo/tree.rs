//! Tree assembly: turn level output into the exported tree shape.

use super::error::{Result, TopoError};
use super::schema::{as_i64, FIELD_DEFAULT, KIND_MODULE, KIND_SET};
use super::types::{BizBriefTopology, BizInfo, BizTopo, BriefNode, Node, TopoTree};

/// Assembles nested nodes and business info into an exported tree.
pub trait Tree: Send + Sync {
    fn build(&self, biz: BizInfo, nodes: Vec<Node>) -> Result<TopoTree>;
}

/// Passes nodes through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericTree;

impl Tree for GenericTree {
    fn build(&self, biz: BizInfo, nodes: Vec<Node>) -> Result<TopoTree> {
        Ok(TopoTree::Generic(BizTopo { biz, nodes }))
    }
}

/// Splits top-level idle sets from normal ones.
///
/// Set and module nodes must carry an integer `default` flag in `extra`.
/// A node whose flag is non-zero is idle; only top-level placement depends
/// on it.
#[derive(Debug, Default, Clone, Copy)]
pub struct BriefTree;

impl BriefTree {
    fn convert(node: Node) -> Result<BriefNode> {
        let default = match node.kind.as_str() {
            KIND_SET | KIND_MODULE => Some(Self::default_flag(&node)?),
            _ => None,
        };
        let sub_nodes = node
            .sub_nodes
            .into_iter()
            .map(Self::convert)
            .collect::<Result<Vec<_>>>()?;

        Ok(BriefNode {
            kind: node.kind,
            id: node.id,
            name: node.name,
            default,
            sub_nodes,
        })
    }

    fn default_flag(node: &Node) -> Result<i64> {
        let invalid = |reason: String| TopoError::InvalidNode {
            kind: node.kind.clone(),
            id: node.id,
            reason,
        };
        let value = node
            .extra
            .as_ref()
            .and_then(|extra| extra.get(FIELD_DEFAULT))
            .ok_or_else(|| invalid("missing default flag".to_string()))?;
        as_i64(value).ok_or_else(|| invalid(format!("default flag is not an integer: {}", value)))
    }
}

impl Tree for BriefTree {
    fn build(&self, biz: BizInfo, nodes: Vec<Node>) -> Result<TopoTree> {
        let mut idle = Vec::new();
        let mut normal = Vec::new();
        for node in nodes {
            let brief = Self::convert(node)?;
            if brief.default.unwrap_or_default() != 0 {
                idle.push(brief);
            } else {
                normal.push(brief);
            }
        }

        Ok(TopoTree::Brief(BizBriefTopology {
            biz,
            idle,
            nodes: normal,
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn set(id: i64, default: serde_json::Value) -> Node {
        let mut node = Node::new("set", id, format!("set-{}", id), 1);
        node.extra = Some(json!({ "default": default }));
        node
    }

    fn module(id: i64, parent: i64, default: i64) -> Node {
        let mut node = Node::new("module", id, format!("module-{}", id), parent);
        node.extra = Some(json!({ "default": default }));
        node
    }

    fn biz() -> BizInfo {
        BizInfo {
            id: 1,
            name: "biz".to_string(),
            default: 0,
        }
    }

    fn brief(tree: TopoTree) -> BizBriefTopology {
        match tree {
            TopoTree::Brief(brief) => brief,
            other => panic!("expected brief tree, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_tree_passes_through() {
        let mut cluster = Node::new("cluster", 10, "c", 1);
        cluster.count = Some(3);
        cluster.sub_nodes.push(Node::new("namespace", 20, "n", 10));

        let tree = GenericTree.build(biz(), vec![cluster]).unwrap();

        assert_eq!(
            tree.to_json().unwrap(),
            r#"{"biz":{"id":1,"nm":"biz","default":0},"nds":[{"kind":"cluster","id":10,"nm":"c","cnt":3,"nds":[{"kind":"namespace","id":20,"nm":"n"}]}]}"#
        );
    }

    #[test]
    fn test_idle_set_goes_to_idle_bucket_wherever_it_is() {
        for position in 0..3 {
            let mut nodes = vec![set(5, json!(0)), set(6, json!(0))];
            nodes.insert(position, set(2, json!(1)));

            let tree = brief(BriefTree.build(biz(), nodes).unwrap());

            assert_eq!(tree.idle.iter().map(|n| n.id).collect::<Vec<_>>(), vec![2]);
            assert_eq!(tree.nodes.iter().map(|n| n.id).collect::<Vec<_>>(), vec![5, 6]);
        }
    }

    #[test]
    fn test_idle_child_stays_under_its_parent() {
        let mut normal = set(5, json!(0));
        normal.sub_nodes = vec![module(50, 5, 0), module(51, 5, 2)];

        let tree = brief(BriefTree.build(biz(), vec![normal]).unwrap());

        assert!(tree.idle.is_empty());
        let children: Vec<(i64, Option<i64>)> = tree.nodes[0]
            .sub_nodes
            .iter()
            .map(|n| (n.id, n.default))
            .collect();
        assert_eq!(children, vec![(50, Some(0)), (51, Some(2))]);
    }

    #[test]
    fn test_missing_or_bad_default_is_an_error() {
        let mut missing = set(7, json!(0));
        missing.extra = None;
        assert!(matches!(
            BriefTree.build(biz(), vec![missing]),
            Err(TopoError::InvalidNode { id: 7, .. })
        ));

        assert!(matches!(
            BriefTree.build(biz(), vec![set(8, json!("1"))]),
            Err(TopoError::InvalidNode { id: 8, .. })
        ));

        let mut parent = set(9, json!(0));
        let mut bad_child = module(90, 9, 0);
        bad_child.extra = Some(json!({"default": 1.5}));
        parent.sub_nodes.push(bad_child);
        assert!(matches!(
            BriefTree.build(biz(), vec![parent]),
            Err(TopoError::InvalidNode { id: 90, .. })
        ));
    }

    #[test]
    fn test_brief_json_shape() {
        let mut idle = set(2, json!(1));
        idle.sub_nodes.push(module(20, 2, 1));

        let tree = BriefTree.build(biz(), vec![idle]).unwrap();

        assert_eq!(
            tree.to_json().unwrap(),
            r#"{"biz":{"id":1,"nm":"biz","default":0},"idle":[{"obj":"set","id":2,"nm":"set-2","default":1,"nds":[{"obj":"module","id":20,"nm":"module-20","default":1,"nds":[]}]}],"nds":[]}"#
        );
    }
}
