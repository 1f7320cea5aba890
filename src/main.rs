use serde_json::json;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use joinset_backend::infra::memory_store::InMemoryWorkspace;
use joinset_backend::{AllRelations, DashboardOutcome, JoinFilterCompiler, JoinSetConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = JoinSetConfig::from_env()?;
    let workspace = Arc::new(InMemoryWorkspace::load(&config.workspace_path).await?);

    // 参数: [焦点看板] [其他看板...]
    let mut args = env::args().skip(1);
    let focus = args.next();
    let others: Vec<String> = args.collect();

    let compiler = JoinFilterCompiler::new(workspace.clone(), config);
    let report = compiler
        .update_join_set_filter(focus.as_deref(), &others, &AllRelations, workspace.as_ref())
        .await;

    let describe = |outcome: &DashboardOutcome| match outcome {
        DashboardOutcome::Applied => json!({ "status": "applied" }),
        DashboardOutcome::Removed { reason } => json!({ "status": "removed", "reason": reason.to_string() }),
        DashboardOutcome::StoreFailed { reason } => json!({ "status": "store_failed", "reason": reason.to_string() }),
    };

    let mut dashboards = serde_json::Map::new();
    for (id, outcome) in &report.others {
        let filters = workspace.dashboard(id).map(|d| d.filters).unwrap_or_default();
        dashboards.insert(id.clone(), json!({ "outcome": describe(outcome), "filters": filters }));
    }

    let output = json!({
        "current": report.current.as_ref().map(|(id, outcome)| json!({
            "dashboard": id,
            "outcome": describe(outcome),
        })),
        "current_view_filters": workspace.current_view_filters().await,
        "dashboards": dashboards,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
