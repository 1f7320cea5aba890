use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::models::filter_state::DashboardId;
use crate::models::relation::{NodeKey, Relation, RelationDeclaration, RelationId};

/// 编译所需的外部只读状态：关系声明、看板到索引的映射、各端点的过滤器与查询
#[async_trait]
pub trait JoinSetSource: Send + Sync {
    /// `None` 表示尚未声明任何关系
    async fn relation_declarations(&self) -> anyhow::Result<Option<Vec<RelationDeclaration>>>;

    /// 看板 -> 保存的搜索 -> 索引；查不到时返回 `None`
    async fn resolve_index_for_dashboard(&self, dashboard: &str) -> anyhow::Result<Option<NodeKey>>;

    async fn filters_per_endpoint(
        &self,
        endpoints: &[NodeKey],
    ) -> anyhow::Result<HashMap<NodeKey, Vec<Value>>>;

    async fn queries_per_endpoint(&self, endpoints: &[NodeKey]) -> anyhow::Result<HashMap<NodeKey, Value>>;

    async fn current_focus_id(&self) -> Option<DashboardId>;
}

/// 过滤器列表保存的位置
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterScope {
    CurrentView,
    Dashboard(DashboardId),
}

#[async_trait]
pub trait FilterStore: Send + Sync {
    async fn load_filters(&self, scope: &FilterScope) -> anyhow::Result<Vec<Value>>;
    async fn save_filters(&self, scope: &FilterScope, filters: Vec<Value>) -> anyhow::Result<()>;
}

/// 关系是否参与某个看板的编译，由调用方决定
pub trait RelationEnablement: Send + Sync {
    fn is_enabled(&self, dashboard: &str, relation: &Relation) -> bool;
}

pub struct AllRelations;

impl RelationEnablement for AllRelations {
    fn is_enabled(&self, _dashboard: &str, _relation: &Relation) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnabledRelations(pub HashSet<RelationId>);

impl EnabledRelations {
    pub fn of<'a>(relations: impl IntoIterator<Item = &'a Relation>) -> Self {
        Self(relations.into_iter().map(|r| r.id.clone()).collect())
    }
}

impl RelationEnablement for EnabledRelations {
    fn is_enabled(&self, _dashboard: &str, relation: &Relation) -> bool {
        self.0.contains(&relation.id)
    }
}

impl<F> RelationEnablement for F
where
    F: Fn(&str, &Relation) -> bool + Send + Sync,
{
    fn is_enabled(&self, dashboard: &str, relation: &Relation) -> bool {
        self(dashboard, relation)
    }
}
