use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 看板标识
pub type DashboardId = String;

/// 连接集合过滤器在过滤器列表中的识别键
pub const JOIN_SET_KEY: &str = "join_set";

/// 某个端点 (索引) 当前的常规过滤器与查询
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointState {
    pub filters: Vec<Value>,
    pub query: Option<Value>,
}

impl EndpointState {
    /// 需要挂到跳转节点上的子句，(子句, 是否取反)
    ///
    /// 已禁用的过滤器、已有的连接集合过滤器、匹配全部的查询都会被跳过
    pub fn clauses(&self) -> Vec<(Value, bool)> {
        let mut out: Vec<(Value, bool)> = self
            .filters
            .iter()
            .filter(|f| !is_disabled(f) && !is_join_set(f))
            .map(|f| (strip_meta(f), is_negated(f)))
            .collect();
        if let Some(q) = self.query.as_ref().filter(|q| !is_match_all(q)) {
            out.push((expand_query(q), false));
        }
        out
    }
}

fn meta_flag(filter: &Value, flag: &str) -> bool {
    filter
        .get("meta")
        .and_then(|m| m.get(flag))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn is_disabled(filter: &Value) -> bool {
    meta_flag(filter, "disabled")
}

pub fn is_negated(filter: &Value) -> bool {
    meta_flag(filter, "negate")
}

pub fn is_join_set(filter: &Value) -> bool {
    filter.get(JOIN_SET_KEY).is_some()
}

/// 去掉界面层附加的 `meta` / `$state`
pub fn strip_meta(filter: &Value) -> Value {
    match filter {
        Value::Object(map) => {
            let mut map = map.clone();
            map.remove("meta");
            map.remove("$state");
            Value::Object(map)
        }
        other => other.clone(),
    }
}

/// 紧凑的字符串查询展开成完整的打分查询
fn expand_query(query: &Value) -> Value {
    match query {
        Value::String(s) => json!({ "query": { "query_string": { "query": s } } }),
        other => other.clone(),
    }
}

/// 识别各种 "匹配全部" 的紧凑写法：`"*"`、`match_all`、`query_string: *`，可再包一层 `query`
pub fn is_match_all(query: &Value) -> bool {
    match query {
        Value::Null => true,
        Value::String(s) => s.trim() == "*" || s.trim().is_empty(),
        Value::Object(map) => {
            if let Some(inner) = map.get("query") {
                return map.len() == 1 && is_match_all(inner);
            }
            if map.len() != 1 {
                return false;
            }
            if map.contains_key("match_all") {
                return true;
            }
            map.get("query_string")
                .and_then(|qs| qs.get("query"))
                .and_then(Value::as_str)
                .map(|s| s.trim() == "*")
                .unwrap_or(false)
        }
        _ => false,
    }
}

/// 保存在看板过滤器列表中的连接集合过滤器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSetFilter {
    pub focus: DashboardId,
    pub queries: Vec<Value>,
    /// 参与连接的关系名，用作过滤器别名
    #[serde(default)]
    pub relations: Vec<String>,
}

impl JoinSetFilter {
    pub fn alias(&self) -> String {
        if self.relations.is_empty() {
            format!("Relational filter ({})", self.focus)
        } else {
            self.relations.join(" + ")
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "join_set": {
                "focus": self.focus,
                "queries": self.queries,
            },
            "meta": {
                "alias": self.alias(),
                "disabled": false,
                "negate": false,
            }
        })
    }
}

/// 按类型原地替换：第一个连接集合过滤器被替换，其余的删除；不存在时追加
pub fn replace_join_set(filters: &mut Vec<Value>, fresh: Value) {
    match filters.iter().position(is_join_set) {
        Some(pos) => {
            filters[pos] = fresh;
            let mut idx = 0;
            filters.retain(|f| {
                let keep = idx == pos || !is_join_set(f);
                idx += 1;
                keep
            });
        }
        None => filters.push(fresh),
    }
}

/// 删除所有连接集合过滤器，返回是否有删除
pub fn remove_join_set(filters: &mut Vec<Value>) -> bool {
    let before = filters.len();
    filters.retain(|f| !is_join_set(f));
    before != filters.len()
}
