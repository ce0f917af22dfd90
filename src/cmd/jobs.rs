//! On-demand job runner: `ecosphere run-job <name>`.

use anyhow::Result;
use ecosphere::config::EcoToml;
use ecosphere::jobs::{self, Job};
use ecosphere::server::build_state;

pub async fn cmd_run_job(config: &EcoToml, name: &str) -> Result<()> {
    let job: Job = name.parse()?;
    let state = build_state(&config.database.path, &config.ai)?;
    let report = jobs::run_job(&state, job).await?;
    println!("{}: {}", job, report);
    Ok(())
}
