use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::core::collaborators::{FilterScope, FilterStore, JoinSetSource, RelationEnablement};
use crate::core::filterjoin::{serialize, FilterJoinNode, HopNode, HopOptions, QueryNode, TypeSelection};
use crate::core::relation_graph::RelationGraph;
use crate::error::JoinSetError;
use crate::infra::config::JoinSetConfig;
use crate::models::filter_state::{remove_join_set, replace_join_set, DashboardId, EndpointState, JoinSetFilter};
use crate::models::relation::{Endpoint, NodeKey, Relation, RelationId};

/// 单个看板的更新结果
#[derive(Debug)]
pub enum DashboardOutcome {
    Applied,
    Removed { reason: JoinSetError },
    StoreFailed { reason: anyhow::Error },
}

impl DashboardOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, DashboardOutcome::Applied)
    }
}

#[derive(Debug, Default)]
pub struct UpdateReport {
    pub current: Option<(DashboardId, DashboardOutcome)>,
    pub others: Vec<(DashboardId, DashboardOutcome)>,
}

pub struct JoinFilterCompiler {
    source: Arc<dyn JoinSetSource>,
    config: JoinSetConfig,
}

/// 建树过程中的请求内状态
struct TreeContext<'a> {
    graph: &'a RelationGraph,
    states: &'a HashMap<NodeKey, EndpointState>,
    used: HashSet<RelationId>,
    path: Vec<NodeKey>,
    labels: Vec<String>,
    // 整棵树上挂载的子句数
    attached: usize,
}

impl JoinFilterCompiler {
    pub fn new(source: Arc<dyn JoinSetSource>, config: JoinSetConfig) -> Self {
        Self { source, config }
    }

    /// 为看板编译连接集合过滤器；任何一步失败都直接返回带类型的错误，不会产出半成品
    #[instrument(skip_all, fields(dashboard = %dashboard))]
    pub async fn compile(
        &self,
        dashboard: &str,
        enablement: &dyn RelationEnablement,
    ) -> Result<JoinSetFilter, JoinSetError> {
        // 1. 加载关系声明
        let declarations = match self.source.relation_declarations().await? {
            Some(decls) if !decls.is_empty() => decls,
            _ => return Err(JoinSetError::NoRelationsConfigured),
        };

        // 2. 校验并筛选出已启用的关系
        let mut enabled: Vec<Relation> = Vec::new();
        for decl in declarations {
            match Relation::try_from(decl) {
                Ok(rel) if enablement.is_enabled(dashboard, &rel) => enabled.push(rel),
                Ok(rel) => debug!("关系未启用，跳过: {}", rel.label),
                Err(e) => warn!("丢弃非法关系声明: {}", e),
            }
        }
        let graph = RelationGraph::build(&enabled);
        let participants = graph.participants();
        debug!("参与连接的端点: {:?}", participants);

        // 3 + 6. 焦点索引解析与各端点状态拉取互不依赖，并发执行；结果按步骤顺序检查
        let (resolved, filters, queries) = tokio::join!(
            self.source.resolve_index_for_dashboard(dashboard),
            self.source.filters_per_endpoint(&participants),
            self.source.queries_per_endpoint(&participants),
        );

        let focus = resolved?.ok_or_else(|| JoinSetError::UnresolvedFocusIndex {
            dashboard: dashboard.to_string(),
        })?;
        let (filters, queries) = (filters?, queries?);

        // 4. 焦点必须出现在某个已启用关系中
        if !graph.contains(&focus) {
            return Err(JoinSetError::FocusNotInEnabledRelations {
                dashboard: dashboard.to_string(),
                focus,
            });
        }

        // 7. 连通分量
        let component = graph.reachable(&focus);

        // 8. 剪枝：分量之外的过滤器与查询全部丢弃
        let mut states: HashMap<NodeKey, EndpointState> = HashMap::new();
        for (node, list) in filters {
            if component.contains(&node) {
                states.entry(node).or_default().filters = list;
            }
        }
        for (node, query) in queries {
            if component.contains(&node) {
                states.entry(node).or_default().query = Some(query);
            }
        }
        debug!(
            "剪枝完成: 分量内 {} 个端点, 保留 {} 个端点的状态",
            component.len(),
            states.len()
        );

        // 9. 建树
        let mut ctx = TreeContext {
            graph: &graph,
            states: &states,
            used: HashSet::new(),
            path: vec![focus.clone()],
            labels: Vec::new(),
            attached: 0,
        };
        let roots = self.build_roots(&focus, &mut ctx)?;
        if ctx.attached == 0 {
            debug!("分量内没有可挂载的过滤器或查询: {}", focus);
            return Err(JoinSetError::EmptyComponent { focus });
        }

        // 10. 序列化
        let queries = serialize(&roots);
        info!(
            "连接过滤器编译完成: 焦点 {}, {} 个顶层连接, 关系 {:?}",
            focus,
            queries.len(),
            ctx.labels
        );
        Ok(JoinSetFilter {
            focus: dashboard.to_string(),
            queries,
            relations: ctx.labels,
        })
    }

    /// 合成根节点：焦点侧每条关系一个顶层跳转，按焦点侧字段路径分键
    fn build_roots(&self, focus: &NodeKey, ctx: &mut TreeContext<'_>) -> Result<Vec<FilterJoinNode>, JoinSetError> {
        let mut roots = Vec::new();
        if let Some(t) = &focus.type_name {
            roots.push(FilterJoinNode::Query(QueryNode::filter(
                serde_json::json!({ "type": { "value": t } }),
            )));
        }

        let graph = ctx.graph;
        for rel in graph.relations_touching(focus) {
            if !ctx.used.insert(rel.id.clone()) {
                continue;
            }
            let Some((src, dst)) = rel.oriented_from(focus) else {
                continue;
            };
            let mut hop = HopNode::new(self.hop_options(rel, src, dst))?;
            ctx.labels.push(rel.label.clone());
            self.fill_hop(&mut hop, rel, dst, ctx)?;
            roots.push(FilterJoinNode::Hop(hop));
        }
        Ok(roots)
    }

    /// 给指向 `dst` 的跳转挂上目标端的子句，再从目标端继续向外展开
    fn fill_hop(
        &self,
        hop: &mut HopNode,
        rel: &Relation,
        dst: &Endpoint,
        ctx: &mut TreeContext<'_>,
    ) -> Result<(), JoinSetError> {
        let target = dst.node();
        if let Some(state) = ctx.states.get(&target) {
            for (clause, negated) in state.clauses() {
                hop.attach_query(clause, negated);
                ctx.attached += 1;
            }
        }

        // 自关联只做一跳
        if rel.is_self_relation() {
            return Ok(());
        }

        ctx.path.push(target.clone());
        let graph = ctx.graph;
        let mut source_typed = false;
        for next in graph.relations_touching(&target) {
            if ctx.used.contains(&next.id) {
                continue;
            }
            let Some((next_src, next_dst)) = next.oriented_from(&target) else {
                continue;
            };
            // 回到当前路径上的祖先会形成环，不展开
            if !next.is_self_relation() && ctx.path.contains(&next_dst.node()) {
                continue;
            }
            ctx.used.insert(next.id.clone());
            ctx.labels.push(next.label.clone());

            // 源端类型约束每个跳转只挂一次
            if !source_typed {
                hop.attach_source_type_filter(next_src.type_name.clone().map(TypeSelection::One));
                source_typed = true;
            }
            let child = hop.nest_hop(self.hop_options(next, next_src, next_dst), false)?;
            self.fill_hop(child, next, next_dst, ctx)?;
        }
        ctx.path.pop();
        Ok(())
    }

    fn hop_options(&self, rel: &Relation, src: &Endpoint, dst: &Endpoint) -> HopOptions {
        let opts = &rel.options;
        HopOptions {
            source_path: src.path.clone(),
            target_indices: vec![dst.source_id.clone()],
            target_path: dst.path.clone(),
            target_types: dst.type_name.clone().map(TypeSelection::One),
            order_by: opts.order_by.clone(),
            max_terms_per_shard: opts.max_terms_per_shard.or(self.config.default_max_terms_per_shard),
            terms_encoding: opts
                .terms_encoding
                .clone()
                .or_else(|| self.config.default_terms_encoding.clone()),
            task_timeout: opts.task_timeout.or(self.config.default_task_timeout),
        }
    }

    /// 更新当前视图以及 `others` 中每个看板的连接集合过滤器
    ///
    /// `others` 严格按顺序逐个处理，单个看板失败只会移除它自己的过滤器，不影响后续看板
    #[instrument(skip(self, others, enablement, store))]
    pub async fn update_join_set_filter(
        &self,
        current_focus: Option<&str>,
        others: &[DashboardId],
        enablement: &dyn RelationEnablement,
        store: &dyn FilterStore,
    ) -> UpdateReport {
        let mut report = UpdateReport::default();

        let current = match current_focus {
            Some(id) => Some(id.to_string()),
            None => self.source.current_focus_id().await,
        };
        match current {
            Some(id) => {
                let outcome = self.apply(&id, FilterScope::CurrentView, enablement, store).await;
                report.current = Some((id, outcome));
            }
            None => debug!("没有焦点看板，当前视图保持不变"),
        }

        for id in others {
            let scope = FilterScope::Dashboard(id.clone());
            let outcome = self.apply(id, scope, enablement, store).await;
            report.others.push((id.clone(), outcome));
        }
        report
    }

    async fn apply(
        &self,
        dashboard: &str,
        scope: FilterScope,
        enablement: &dyn RelationEnablement,
        store: &dyn FilterStore,
    ) -> DashboardOutcome {
        let compiled = self.compile(dashboard, enablement).await;

        let mut filters = match store.load_filters(&scope).await {
            Ok(f) => f,
            Err(e) => {
                error!("读取过滤器失败: {:?} {}", scope, e);
                return DashboardOutcome::StoreFailed { reason: e };
            }
        };

        let (outcome, changed) = match compiled {
            Ok(join_set) => {
                replace_join_set(&mut filters, join_set.to_value());
                info!("已应用连接过滤器: {:?}", scope);
                (DashboardOutcome::Applied, true)
            }
            Err(reason) => {
                if reason.is_no_join() {
                    debug!("无需连接过滤器 ({}): {}", dashboard, reason);
                } else {
                    warn!("连接过滤器编译失败，移除旧过滤器 ({}): {}", dashboard, reason);
                }
                let changed = remove_join_set(&mut filters);
                (DashboardOutcome::Removed { reason }, changed)
            }
        };

        if changed {
            if let Err(e) = store.save_filters(&scope, filters).await {
                error!("保存过滤器失败: {:?} {}", scope, e);
                return DashboardOutcome::StoreFailed { reason: e };
            }
        }
        outcome
    }
}
