//! 连接过滤树 (filterjoin) 的构建与序列化
//!
//! 树由 `FilterJoinNode` 组成：`Query` 是已经成形的子句，`Hop` 表示一次
//! "从源字段连接到目标索引的目标字段"。`Hop` 的 `must_children` / `must_not_children`
//! 里可以继续嵌套 `Hop`，对应 A -> B -> C 的多跳连接。
//!
//! 序列化输出的结构：
//!
//! ```text
//! { filterjoin: { <source_path>: {
//!     indices, path, types?, orderBy?, maxTermsPerShard?, termsEncoding?, task_timeout?,
//!     query: { bool: {
//!       must: [scored...], must_not?: [scored...],
//!       filter: { bool: { must: [...], must_not?: [ { bool: { must: [...] } } ] } }
//! } } } } }
//! ```
//!
//! 注意两处 `must_not` 的不对称：查询层是取反查询的扁平列表，过滤层是唯一一个
//! 包裹了 `must` 列表的 bool。

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::JoinSetError;

/// 单个类型或类型列表，统一按列表处理
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSelection {
    One(String),
    Many(Vec<String>),
}

impl TypeSelection {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            TypeSelection::One(t) => vec![t],
            TypeSelection::Many(ts) => ts,
        }
    }
}

impl From<&str> for TypeSelection {
    fn from(t: &str) -> Self {
        TypeSelection::One(t.to_string())
    }
}

impl From<String> for TypeSelection {
    fn from(t: String) -> Self {
        TypeSelection::One(t)
    }
}

impl From<Vec<String>> for TypeSelection {
    fn from(ts: Vec<String>) -> Self {
        TypeSelection::Many(ts)
    }
}

impl From<Vec<&str>> for TypeSelection {
    fn from(ts: Vec<&str>) -> Self {
        TypeSelection::Many(ts.into_iter().map(String::from).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HopOptions {
    pub source_path: String,
    pub target_indices: Vec<String>,
    pub target_path: String,
    pub target_types: Option<TypeSelection>,
    pub order_by: Option<String>,
    pub max_terms_per_shard: Option<u64>,
    pub terms_encoding: Option<String>,
    pub task_timeout: Option<u64>,
}

impl HopOptions {
    pub fn new(
        source_path: impl Into<String>,
        target_indices: Vec<String>,
        target_path: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            target_indices,
            target_path: target_path.into(),
            ..Default::default()
        }
    }
}

/// 子句在下游引擎中的角色：参与打分的查询，或纯过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Scored,
    Filter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryNode {
    pub clause: Value,
    pub kind: ClauseKind,
    pub negated: bool,
}

impl QueryNode {
    pub fn filter(clause: Value) -> Self {
        Self {
            clause,
            kind: ClauseKind::Filter,
            negated: false,
        }
    }

    /// 带 `query` 键的子句按打分查询处理 (取出内部查询)，其余按过滤处理
    pub fn classify(clause: Value, negated: bool) -> Self {
        match clause {
            Value::Object(mut map) if map.contains_key("query") => {
                let inner = map.remove("query").unwrap_or(Value::Null);
                Self {
                    clause: inner,
                    kind: ClauseKind::Scored,
                    negated,
                }
            }
            other => Self {
                clause: other,
                kind: ClauseKind::Filter,
                negated,
            },
        }
    }

    fn match_all() -> Self {
        Self {
            clause: json!({ "match_all": {} }),
            kind: ClauseKind::Scored,
            negated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterJoinNode {
    Query(QueryNode),
    Hop(HopNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HopNode {
    pub options: HopOptions,
    pub must_children: Vec<FilterJoinNode>,
    /// 取反分支共享的唯一 must_not 桶
    pub must_not_children: Vec<FilterJoinNode>,
}

impl HopNode {
    pub fn new(options: HopOptions) -> Result<Self, JoinSetError> {
        if options.target_indices.is_empty() {
            return Err(JoinSetError::InvalidHop(format!(
                "hop on `{}` has no target index",
                options.source_path
            )));
        }
        Ok(Self {
            options,
            must_children: vec![FilterJoinNode::Query(QueryNode::match_all())],
            must_not_children: Vec::new(),
        })
    }

    /// 为每个类型追加一个 `{type: {value}}` 过滤，空值不做任何事
    pub fn attach_source_type_filter(&mut self, types: Option<TypeSelection>) -> &mut Self {
        for t in types.map(TypeSelection::into_vec).unwrap_or_default() {
            self.must_children
                .push(FilterJoinNode::Query(QueryNode::filter(json!({ "type": { "value": t } }))));
        }
        self
    }

    /// 新建子跳转并挂到 must 或共享的 must_not 桶，返回子跳转以便继续嵌套
    pub fn nest_hop(&mut self, options: HopOptions, negate: bool) -> Result<&mut HopNode, JoinSetError> {
        let child = HopNode::new(options)?;
        let bucket = if negate {
            &mut self.must_not_children
        } else {
            &mut self.must_children
        };
        bucket.push(FilterJoinNode::Hop(child));
        match bucket.last_mut() {
            Some(FilterJoinNode::Hop(hop)) => Ok(hop),
            _ => Err(JoinSetError::InvalidHop("nested hop was not stored".to_string())),
        }
    }

    pub fn attach_query(&mut self, query: Value, negate: bool) -> &mut Self {
        let node = FilterJoinNode::Query(QueryNode::classify(query, negate));
        if negate {
            self.must_not_children.push(node);
        } else {
            self.must_children.push(node);
        }
        self
    }

    pub fn to_value(&self) -> Value {
        let (scored_must, filter_must) = split_bucket(&self.must_children);
        let (scored_must_not, filter_must_not) = split_bucket(&self.must_not_children);

        let mut filter_bool = Map::new();
        filter_bool.insert("must".to_string(), Value::Array(filter_must));
        if !filter_must_not.is_empty() {
            filter_bool.insert(
                "must_not".to_string(),
                json!([{ "bool": { "must": filter_must_not } }]),
            );
        }

        let mut query_bool = Map::new();
        query_bool.insert("must".to_string(), Value::Array(scored_must));
        if !scored_must_not.is_empty() {
            query_bool.insert("must_not".to_string(), Value::Array(scored_must_not));
        }
        query_bool.insert("filter".to_string(), json!({ "bool": filter_bool }));

        let opts = &self.options;
        let mut body = Map::new();
        body.insert("indices".to_string(), json!(opts.target_indices));
        body.insert("path".to_string(), json!(opts.target_path));
        if let Some(types) = &opts.target_types {
            body.insert("types".to_string(), json!(types.clone().into_vec()));
        }
        if let Some(v) = &opts.order_by {
            body.insert("orderBy".to_string(), json!(v));
        }
        if let Some(v) = opts.max_terms_per_shard {
            body.insert("maxTermsPerShard".to_string(), json!(v));
        }
        if let Some(v) = &opts.terms_encoding {
            body.insert("termsEncoding".to_string(), json!(v));
        }
        if let Some(v) = opts.task_timeout {
            body.insert("task_timeout".to_string(), json!(v));
        }
        body.insert("query".to_string(), json!({ "bool": query_bool }));

        let mut keyed = Map::new();
        keyed.insert(opts.source_path.clone(), Value::Object(body));
        json!({ "filterjoin": keyed })
    }
}

/// 把一个桶拆成 (打分查询, 过滤子句与嵌套跳转)，保持原有顺序
fn split_bucket(children: &[FilterJoinNode]) -> (Vec<Value>, Vec<Value>) {
    let mut scored = Vec::new();
    let mut filters = Vec::new();
    for child in children {
        match child {
            FilterJoinNode::Query(q) if q.kind == ClauseKind::Scored => scored.push(q.clause.clone()),
            FilterJoinNode::Query(q) => filters.push(q.clause.clone()),
            FilterJoinNode::Hop(hop) => filters.push(hop.to_value()),
        }
    }
    (scored, filters)
}

/// 逐个展开顶层节点，输出与输入一一对应；不修改输入树
pub fn serialize(roots: &[FilterJoinNode]) -> Vec<Value> {
    roots
        .iter()
        .map(|node| match node {
            FilterJoinNode::Hop(hop) => hop.to_value(),
            // 顶层取反子句没有外层 bool 可挂，只能自己包一层
            FilterJoinNode::Query(q) if q.negated => json!({ "bool": { "must_not": [q.clause] } }),
            FilterJoinNode::Query(q) => q.clause.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(source: &str, index: &str, path: &str) -> HopOptions {
        HopOptions::new(source, vec![index.to_string()], path)
    }

    fn body<'a>(doc: &'a Value, source: &str) -> &'a Value {
        &doc["filterjoin"][source]
    }

    #[test]
    fn test_new_hop_shape() {
        let mut o = opts("a1", "b", "b1");
        o.target_types = Some("company".into());
        o.max_terms_per_shard = Some(10);
        o.task_timeout = Some(500);
        let hop = HopNode::new(o).unwrap();

        assert_eq!(
            hop.to_value(),
            json!({ "filterjoin": { "a1": {
                "indices": ["b"],
                "path": "b1",
                "types": ["company"],
                "maxTermsPerShard": 10,
                "task_timeout": 500,
                "query": { "bool": {
                    "must": [{ "match_all": {} }],
                    "filter": { "bool": { "must": [] } }
                } }
            } } })
        );
    }

    #[test]
    fn test_hop_requires_target() {
        let result = HopNode::new(HopOptions::new("a1", vec![], "b1"));
        assert!(matches!(result, Err(JoinSetError::InvalidHop(_))));
    }

    #[test]
    fn test_nested_hop_appears_once_under_parent_filter() {
        let mut root = HopNode::new(opts("a1", "b", "b1")).unwrap();
        {
            let child = root.nest_hop(opts("b2", "c", "c1"), false).unwrap();
            child.nest_hop(opts("c2", "d", "d1"), false).unwrap();
        }
        let tree = vec![FilterJoinNode::Hop(root)];
        let out = serialize(&tree);

        assert_eq!(out.len(), 1);
        let must = &body(&out[0], "a1")["query"]["bool"]["filter"]["bool"]["must"];
        assert_eq!(must.as_array().unwrap().len(), 1);
        assert_eq!(body(&must[0], "b2")["indices"], json!(["c"]));
        let inner = &body(&must[0], "b2")["query"]["bool"]["filter"]["bool"]["must"];
        assert_eq!(body(&inner[0], "c2")["path"], json!("d1"));
        assert!(out[0].to_string().matches("\"c2\"").count() == 1);
    }

    #[test]
    fn test_negated_hops_share_one_bucket() {
        let mut root = HopNode::new(opts("a1", "b", "b1")).unwrap();
        root.nest_hop(opts("b2", "c", "c1"), true).unwrap();
        root.nest_hop(opts("b3", "d", "d1"), true).unwrap();
        root.attach_query(json!({ "term": { "status": "closed" } }), true);
        assert_eq!(root.must_children.len(), 1);
        assert_eq!(root.must_not_children.len(), 3);

        let doc = root.to_value();
        let filter = &body(&doc, "a1")["query"]["bool"]["filter"]["bool"];
        let must_not = filter["must_not"].as_array().unwrap();
        assert_eq!(must_not.len(), 1);
        assert_eq!(must_not[0]["bool"]["must"].as_array().unwrap().len(), 3);
        assert_eq!(filter["must"], json!([]));
        assert!(body(&doc, "a1")["query"]["bool"].get("must_not").is_none());
    }

    #[test]
    fn test_positive_and_negative_nesting_are_distinguishable() {
        let mut pos = HopNode::new(opts("a1", "b", "b1")).unwrap();
        pos.nest_hop(opts("b2", "c", "c1"), false).unwrap();
        let mut neg = HopNode::new(opts("a1", "b", "b1")).unwrap();
        neg.nest_hop(opts("b2", "c", "c1"), true).unwrap();

        assert_eq!(pos.must_children.len(), 2);
        assert!(pos.must_not_children.is_empty());
        assert_eq!(neg.must_children.len(), 1);
        assert_eq!(neg.must_not_children.len(), 1);
        assert_ne!(pos.to_value(), neg.to_value());
    }

    #[test]
    fn test_attach_query_classification() {
        let mut hop = HopNode::new(opts("a1", "b", "b1")).unwrap();
        hop.attach_query(json!({ "query": { "match": { "name": "acme" } } }), false)
            .attach_query(json!({ "query": { "match": { "name": "evil" } } }), true)
            .attach_query(json!({ "term": { "country": "fr" } }), false);

        let doc = hop.to_value();
        let q = &body(&doc, "a1")["query"]["bool"];
        assert_eq!(q["must"], json!([{ "match_all": {} }, { "match": { "name": "acme" } }]));
        assert_eq!(q["must_not"], json!([{ "match": { "name": "evil" } }]));
        assert_eq!(q["filter"]["bool"]["must"], json!([{ "term": { "country": "fr" } }]));
    }

    #[test]
    fn test_source_type_filter_single_or_list() {
        let mut single = HopNode::new(opts("a1", "b", "b1")).unwrap();
        single.attach_source_type_filter(Some("X".into()));
        let mut list = HopNode::new(opts("a1", "b", "b1")).unwrap();
        list.attach_source_type_filter(Some(vec!["X"].into()));
        assert_eq!(single, list);
        assert_eq!(
            body(&single.to_value(), "a1")["query"]["bool"]["filter"]["bool"]["must"],
            json!([{ "type": { "value": "X" } }])
        );

        let mut none = HopNode::new(opts("a1", "b", "b1")).unwrap();
        none.attach_source_type_filter(None);
        none.attach_source_type_filter(Some(TypeSelection::Many(vec![])));
        assert_eq!(none.must_children.len(), 1);
    }

    #[test]
    fn test_serialize_is_idempotent_and_keeps_top_level_queries() {
        let mut hop = HopNode::new(opts("a1", "b", "b1")).unwrap();
        hop.nest_hop(opts("b2", "c", "c1"), false)
            .unwrap()
            .attach_query(json!({ "term": { "x": 1 } }), false);
        let tree = vec![
            FilterJoinNode::Query(QueryNode::filter(json!({ "type": { "value": "t" } }))),
            FilterJoinNode::Hop(hop),
        ];
        let snapshot = tree.clone();

        let first = serialize(&tree);
        let second = serialize(&tree);
        assert_eq!(first, second);
        assert_eq!(tree, snapshot);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], json!({ "type": { "value": "t" } }));
    }

    #[test]
    fn test_type_selection_deserializes_both_forms() {
        let one: TypeSelection = serde_json::from_value(json!("X")).unwrap();
        let many: TypeSelection = serde_json::from_value(json!(["X"])).unwrap();
        assert_eq!(one.into_vec(), many.into_vec());
    }
}
