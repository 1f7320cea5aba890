use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::collaborators::{FilterScope, FilterStore, JoinSetSource};
use crate::models::filter_state::{is_match_all, DashboardId};
use crate::models::relation::{NodeKey, RelationDeclaration};

/// 看板记录：背后的索引 (来自保存的搜索)、过滤器、查询
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardRecord {
    pub id: DashboardId,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub filters: Vec<Value>,
    #[serde(default)]
    pub query: Option<Value>,
}

impl DashboardRecord {
    pub fn node(&self) -> Option<NodeKey> {
        self.index.as_ref().map(|index| NodeKey {
            source_id: index.clone(),
            type_name: self.type_name.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceFile {
    #[serde(default)]
    pub relations: Option<Vec<RelationDeclaration>>,
    #[serde(default)]
    pub dashboards: Vec<DashboardRecord>,
    #[serde(default)]
    pub current_focus: Option<DashboardId>,
    #[serde(default)]
    pub current_view_filters: Vec<Value>,
}

/// 基于内存的外部协作方实现，可从 JSON 工作区文件加载
pub struct InMemoryWorkspace {
    relations: Option<Vec<RelationDeclaration>>,
    dashboards: DashMap<DashboardId, DashboardRecord>,
    current_focus: RwLock<Option<DashboardId>>,
    current_view: RwLock<Vec<Value>>,
}

impl InMemoryWorkspace {
    pub fn new(file: WorkspaceFile) -> Self {
        let dashboards = DashMap::new();
        for d in file.dashboards {
            dashboards.insert(d.id.clone(), d);
        }
        Self {
            relations: file.relations,
            dashboards,
            current_focus: RwLock::new(file.current_focus),
            current_view: RwLock::new(file.current_view_filters),
        }
    }

    pub fn from_json(value: Value) -> anyhow::Result<Self> {
        let file: WorkspaceFile = serde_json::from_value(value).context("工作区 JSON 格式错误")?;
        Ok(Self::new(file))
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("无法读取工作区文件 {}", path.display()))?;
        let file: WorkspaceFile =
            serde_json::from_str(&raw).with_context(|| format!("工作区文件解析失败 {}", path.display()))?;
        info!(
            "工作区已加载: {} 个看板, {} 条关系声明",
            file.dashboards.len(),
            file.relations.as_ref().map(|r| r.len()).unwrap_or(0)
        );
        Ok(Self::new(file))
    }

    pub async fn set_current_focus(&self, dashboard: Option<DashboardId>) {
        *self.current_focus.write().await = dashboard;
    }

    pub fn dashboard(&self, id: &str) -> Option<DashboardRecord> {
        self.dashboards.get(id).map(|d| d.value().clone())
    }

    pub async fn current_view_filters(&self) -> Vec<Value> {
        self.current_view.read().await.clone()
    }

    /// 按看板 id 排序，保证同一索引下多个看板的合并顺序稳定
    fn records_for(&self, endpoints: &[NodeKey]) -> Vec<(NodeKey, DashboardRecord)> {
        let mut out: Vec<(NodeKey, DashboardRecord)> = self
            .dashboards
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                record
                    .node()
                    .filter(|node| endpoints.contains(node))
                    .map(|node| (node, record.clone()))
            })
            .collect();
        out.sort_by(|a, b| a.1.id.cmp(&b.1.id));
        out
    }
}

fn unwrap_query(query: Value) -> Value {
    match query {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("query") => {
            map.remove("query").unwrap_or(Value::Null)
        }
        Value::String(s) => json!({ "query_string": { "query": s } }),
        other => other,
    }
}

#[async_trait]
impl JoinSetSource for InMemoryWorkspace {
    async fn relation_declarations(&self) -> anyhow::Result<Option<Vec<RelationDeclaration>>> {
        Ok(self.relations.clone())
    }

    async fn resolve_index_for_dashboard(&self, dashboard: &str) -> anyhow::Result<Option<NodeKey>> {
        Ok(self.dashboards.get(dashboard).and_then(|d| d.value().node()))
    }

    async fn filters_per_endpoint(
        &self,
        endpoints: &[NodeKey],
    ) -> anyhow::Result<HashMap<NodeKey, Vec<Value>>> {
        let mut out: HashMap<NodeKey, Vec<Value>> = HashMap::new();
        for (node, record) in self.records_for(endpoints) {
            out.entry(node).or_default().extend(record.filters);
        }
        debug!("已拉取 {} 个端点的过滤器", out.len());
        Ok(out)
    }

    async fn queries_per_endpoint(&self, endpoints: &[NodeKey]) -> anyhow::Result<HashMap<NodeKey, Value>> {
        let mut grouped: HashMap<NodeKey, Vec<Value>> = HashMap::new();
        for (node, record) in self.records_for(endpoints) {
            if let Some(q) = record.query.filter(|q| !is_match_all(q)) {
                grouped.entry(node).or_default().push(q);
            }
        }
        // 同一索引下多个看板的查询合并成一个 bool.must
        let out = grouped
            .into_iter()
            .map(|(node, mut list)| {
                let merged = if list.len() == 1 {
                    list.remove(0)
                } else {
                    let inner: Vec<Value> = list.into_iter().map(unwrap_query).collect();
                    json!({ "query": { "bool": { "must": inner } } })
                };
                (node, merged)
            })
            .collect();
        Ok(out)
    }

    async fn current_focus_id(&self) -> Option<DashboardId> {
        self.current_focus.read().await.clone()
    }
}

#[async_trait]
impl FilterStore for InMemoryWorkspace {
    async fn load_filters(&self, scope: &FilterScope) -> anyhow::Result<Vec<Value>> {
        match scope {
            FilterScope::CurrentView => Ok(self.current_view.read().await.clone()),
            FilterScope::Dashboard(id) => self
                .dashboards
                .get(id)
                .map(|d| d.value().filters.clone())
                .ok_or_else(|| anyhow::anyhow!("dashboard `{}` not found", id)),
        }
    }

    async fn save_filters(&self, scope: &FilterScope, filters: Vec<Value>) -> anyhow::Result<()> {
        match scope {
            FilterScope::CurrentView => {
                *self.current_view.write().await = filters;
                Ok(())
            }
            FilterScope::Dashboard(id) => {
                let mut record = self
                    .dashboards
                    .get_mut(id)
                    .ok_or_else(|| anyhow::anyhow!("dashboard `{}` not found", id))?;
                record.filters = filters;
                Ok(())
            }
        }
    }
}
