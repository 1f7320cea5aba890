use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::JoinSetError;

/// 关系图中的节点：数据源 (索引) 以及可选的类型限定
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub source_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl NodeKey {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            type_name: None,
        }
    }

    pub fn with_type(source_id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            type_name: Some(type_name.into()),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(t) => write!(f, "{}[{}]", self.source_id, t),
            None => write!(f, "{}", self.source_id),
        }
    }
}

/// 关系的一端：索引、可选类型、参与连接的字段路径
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub source_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub path: String,
}

impl Endpoint {
    pub fn new(source_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            type_name: None,
            path: path.into(),
        }
    }

    pub fn typed(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn node(&self) -> NodeKey {
        NodeKey {
            source_id: self.source_id.clone(),
            type_name: self.type_name.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node(), self.path)
    }
}

/// 关系标识：两端按序排列后的结构化二元组，与声明顺序无关
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId {
    pub low: Endpoint,
    pub high: Endpoint,
}

impl RelationId {
    pub fn between(a: &Endpoint, b: &Endpoint) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.clone(),
            high: high.clone(),
        }
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.low, self.high)
    }
}

/// 连接引擎的可选调优参数，按关系声明
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_terms_per_shard: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct EndpointDeclaration {
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    pub path: Option<String>,
}

/// 外部持久化的关系声明原文，字段可能缺失，需经 `Relation::try_from` 校验
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RelationDeclaration {
    #[serde(default)]
    pub label: Option<String>,
    pub domain: Option<EndpointDeclaration>,
    pub range: Option<EndpointDeclaration>,
    #[serde(default)]
    pub options: RelationOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: RelationId,
    pub label: String,
    pub domain: Endpoint,
    pub range: Endpoint,
    pub options: RelationOptions,
}

impl Relation {
    pub fn new(label: impl Into<String>, domain: Endpoint, range: Endpoint) -> Self {
        Self {
            id: RelationId::between(&domain, &range),
            label: label.into(),
            domain,
            range,
            options: RelationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RelationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_self_relation(&self) -> bool {
        self.domain.node() == self.range.node()
    }

    /// 以 `node` 为出发点时的 (源端, 目标端)；自关联时固定 domain -> range
    pub fn oriented_from(&self, node: &NodeKey) -> Option<(&Endpoint, &Endpoint)> {
        if self.domain.node() == *node {
            Some((&self.domain, &self.range))
        } else if self.range.node() == *node {
            Some((&self.range, &self.domain))
        } else {
            None
        }
    }
}

fn endpoint_from(
    label: &str,
    side: &str,
    decl: Option<EndpointDeclaration>,
) -> Result<Endpoint, JoinSetError> {
    let decl = decl.ok_or_else(|| JoinSetError::invalid_relation(label, format!("missing {}", side)))?;
    let source_id = decl
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| JoinSetError::invalid_relation(label, format!("{} has no index id", side)))?;
    let path = decl
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| JoinSetError::invalid_relation(label, format!("{} has no path", side)))?;
    Ok(Endpoint {
        source_id,
        type_name: decl.type_name.filter(|t| !t.is_empty()),
        path,
    })
}

impl TryFrom<RelationDeclaration> for Relation {
    type Error = JoinSetError;

    fn try_from(decl: RelationDeclaration) -> Result<Self, Self::Error> {
        let label = decl.label.unwrap_or_default();
        let domain = endpoint_from(&label, "domain", decl.domain)?;
        let range = endpoint_from(&label, "range", decl.range)?;
        let label = if label.is_empty() {
            format!("{} -> {}", domain, range)
        } else {
            label
        };
        Ok(Relation::new(label, domain, range).with_options(decl.options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relation_id_ignores_endpoint_order() {
        let a = Endpoint::new("articles", "companies");
        let b = Endpoint::new("companies", "id");
        assert_eq!(RelationId::between(&a, &b), RelationId::between(&b, &a));
        assert_eq!(
            Relation::new("x", a.clone(), b.clone()).id,
            Relation::new("y", b, a).id
        );
    }

    #[test]
    fn test_type_is_part_of_identity() {
        let plain = Endpoint::new("docs", "id");
        let typed = Endpoint::new("docs", "id").typed("pdf");
        assert_ne!(plain.node(), typed.node());
        assert_eq!(typed.node(), NodeKey::with_type("docs", "pdf"));
    }

    #[test]
    fn test_declaration_parses_into_relation() {
        let decl: RelationDeclaration = serde_json::from_value(json!({
            "label": "mentions",
            "domain": { "id": "articles", "path": "companies" },
            "range": { "id": "companies", "type": "company", "path": "id" },
            "options": { "maxTermsPerShard": 100, "orderBy": "doc_score" }
        }))
        .unwrap();

        let rel = Relation::try_from(decl).unwrap();
        assert_eq!(rel.label, "mentions");
        assert_eq!(rel.range.type_name.as_deref(), Some("company"));
        assert_eq!(rel.options.max_terms_per_shard, Some(100));
        assert_eq!(rel.options.order_by.as_deref(), Some("doc_score"));
    }

    #[test]
    fn test_malformed_declarations_are_rejected() {
        let missing_range: RelationDeclaration = serde_json::from_value(json!({
            "label": "broken",
            "domain": { "id": "a", "path": "x" }
        }))
        .unwrap();
        assert!(matches!(
            Relation::try_from(missing_range),
            Err(JoinSetError::InvalidRelation { .. })
        ));

        let missing_path: RelationDeclaration = serde_json::from_value(json!({
            "domain": { "id": "a", "path": "x" },
            "range": { "id": "b" }
        }))
        .unwrap();
        assert!(matches!(
            Relation::try_from(missing_path),
            Err(JoinSetError::InvalidRelation { .. })
        ));
    }

    #[test]
    fn test_oriented_from_either_side() {
        let rel = Relation::new("r", Endpoint::new("a", "a1"), Endpoint::new("b", "b1"));
        let (src, dst) = rel.oriented_from(&NodeKey::new("b")).unwrap();
        assert_eq!(src.path, "b1");
        assert_eq!(dst.path, "a1");
        assert!(rel.oriented_from(&NodeKey::new("c")).is_none());
    }
}
