//! Runner commands.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

use super::api::ApiClient;

#[derive(Debug, Deserialize)]
struct RunnerView {
    project_id: String,
    sha: String,
    build_number: Option<i64>,
    status: String,
    trigger: String,
    credential: String,
    registered_at: String,
}

fn print_runner(runner: &RunnerView) {
    let number = runner
        .build_number
        .map(|n| format!("#{}", n))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<20} {:<12} {:<6} {:<10} {:<13} {:<12} {}",
        runner.project_id,
        &runner.sha[..runner.sha.len().min(12)],
        number,
        runner.status,
        runner.trigger,
        runner.credential,
        runner.registered_at
    );
}

pub async fn list(api: &ApiClient) -> Result<()> {
    let runners: Vec<RunnerView> = api.get("runners").await?;
    if runners.is_empty() {
        println!("No active runners");
        return Ok(());
    }
    for runner in &runners {
        print_runner(runner);
    }
    Ok(())
}

pub async fn show(api: &ApiClient, project: &str, sha: &str) -> Result<()> {
    let runner: RunnerView = api.get(&format!("runners/{}/{}", project, sha)).await?;
    print_runner(&runner);
    Ok(())
}

pub async fn abort(api: &ApiClient, project: &str, sha: &str) -> Result<()> {
    let _: Value = api.delete(&format!("runners/{}/{}", project, sha)).await?;
    println!("Abort requested for {} at {}", project, sha);
    Ok(())
}
