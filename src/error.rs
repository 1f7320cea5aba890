//! 连接过滤器编译过程中的错误类型
//!
//! - "无需连接" 类：`NoRelationsConfigured`、`FocusNotInEnabledRelations`、`EmptyComponent`，
//!   调用方只需移除旧的连接过滤器，不必告警
//! - 硬错误：`UnresolvedFocusIndex`、`Source`，通常意味着看板配置有误或外部服务异常
//! - `InvalidRelation` / `InvalidHop`：关系声明或跳转参数不合法，在建图、建树前即被拒绝

use thiserror::Error;

use crate::models::relation::NodeKey;

#[derive(Debug, Error)]
pub enum JoinSetError {
    #[error("no relations are configured")]
    NoRelationsConfigured,
    #[error("dashboard `{dashboard}` (index `{focus}`) is not part of any enabled relation")]
    FocusNotInEnabledRelations { dashboard: String, focus: NodeKey },
    #[error("could not resolve the index behind dashboard `{dashboard}`")]
    UnresolvedFocusIndex { dashboard: String },
    #[error("nothing is reachable from `{focus}` through the enabled relations")]
    EmptyComponent { focus: NodeKey },
    #[error("invalid relation `{label}`: {reason}")]
    InvalidRelation { label: String, reason: String },
    #[error("invalid join hop: {0}")]
    InvalidHop(String),
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

impl JoinSetError {
    pub fn invalid_relation(label: impl Into<String>, reason: impl Into<String>) -> Self {
        JoinSetError::InvalidRelation {
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// 该错误是否仅表示 "不需要连接过滤器"
    pub fn is_no_join(&self) -> bool {
        matches!(
            self,
            JoinSetError::NoRelationsConfigured
                | JoinSetError::FocusNotInEnabledRelations { .. }
                | JoinSetError::EmptyComponent { .. }
        )
    }
}
