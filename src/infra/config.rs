use anyhow::Context;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_WORKSPACE: &str = "demos/workspace.json";

/// 连接过滤器的全局默认参数，关系自身的 options 优先
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSetConfig {
    pub default_task_timeout: Option<u64>,
    pub default_max_terms_per_shard: Option<u64>,
    pub default_terms_encoding: Option<String>,
    pub workspace_path: PathBuf,
}

impl Default for JoinSetConfig {
    fn default() -> Self {
        Self {
            default_task_timeout: None,
            default_max_terms_per_shard: None,
            default_terms_encoding: None,
            workspace_path: PathBuf::from(DEFAULT_WORKSPACE),
        }
    }
}

impl JoinSetConfig {
    /// 从环境变量读取；调用前由 main 执行 `dotenvy::dotenv()`
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let number = |key: &str| -> anyhow::Result<Option<u64>> {
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .with_context(|| format!("{} must be a non-negative integer, got `{}`", key, raw)),
                None => Ok(None),
            }
        };

        Ok(Self {
            default_task_timeout: number("JOINSET_TASK_TIMEOUT_MS")?,
            default_max_terms_per_shard: number("JOINSET_MAX_TERMS_PER_SHARD")?,
            default_terms_encoding: lookup("JOINSET_TERMS_ENCODING").filter(|v| !v.trim().is_empty()),
            workspace_path: lookup("JOINSET_WORKSPACE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE)),
        })
    }
}
