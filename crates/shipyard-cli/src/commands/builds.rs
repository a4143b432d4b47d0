//! Build commands.

use anyhow::Result;
use shipyard_core::Build;
use shipyard_core::agent::LogLine;

use super::api::ApiClient;

fn print_build(build: &Build) {
    println!("Build #{} ({})", build.number, build.id);
    println!("  project:  {}", build.project_id);
    println!("  commit:   {}", build.sha);
    println!("  trigger:  {}", build.trigger);
    println!("  status:   {}", build.status);
    if let Some(description) = &build.description {
        println!("  details:  {}", description);
    }
    if let Some(exit) = build.exit_status {
        println!("  exit:     {}", exit);
    }
    println!("  created:  {}", build.created_at);
    if let Some(finished) = build.finished_at {
        println!("  finished: {}", finished);
    }
}

pub async fn show(api: &ApiClient, id: &str) -> Result<()> {
    let build: Build = api.get(&format!("builds/{}", id)).await?;
    print_build(&build);
    Ok(())
}

pub async fn logs(api: &ApiClient, id: &str) -> Result<()> {
    let lines: Vec<LogLine> = api.get(&format!("builds/{}/logs", id)).await?;
    for line in lines.iter().filter(|l| !l.is_exit_status()) {
        println!("[{}] {}", line.level.as_str(), line.message);
    }
    Ok(())
}

pub async fn history(api: &ApiClient, project: &str, sha: &str) -> Result<()> {
    let builds: Vec<Build> = api
        .get(&format!("builds/project/{}/commit/{}", project, sha))
        .await?;
    if builds.is_empty() {
        println!("No builds for {} at {}", project, sha);
    }
    for build in &builds {
        println!(
            "#{:<5} {:<10} {:<13} {}",
            build.number, build.status, build.trigger, build.id
        );
    }
    Ok(())
}
