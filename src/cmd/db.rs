//! Database maintenance commands: `ecosphere init-db` and `ecosphere seed`.

use anyhow::{Context, Result};
use ecosphere::config::EcoToml;
use ecosphere::db::EcoDb;

/// Open the configured database, creating its directory and schema.
pub fn open_db(config: &EcoToml) -> Result<EcoDb> {
    let path = &config.database.path;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    EcoDb::new(path).with_context(|| format!("Failed to open database at {}", path.display()))
}

pub fn cmd_init_db(config: &EcoToml) -> Result<()> {
    open_db(config)?;
    println!("Database initialized at {}", config.database.path.display());
    Ok(())
}

pub fn cmd_seed(config: &EcoToml) -> Result<()> {
    let db = open_db(config)?;
    let report = ecosphere::seed::seed(&db)?;

    if report.users.is_empty() {
        println!("Demo users already exist; no new tokens issued.");
    } else {
        println!("Created users (tokens are shown only once):");
        for (username, token) in &report.users {
            println!("  {:<12} {}", username, token);
        }
    }
    println!("Challenges created: {}", report.challenges);
    println!("Achievements created: {}", report.achievements);
    println!("Articles created: {}", report.articles);
    println!("Climate data points written: {}", report.climate_points);
    println!("Sample carbon entries: {}", report.carbon_entries);
    println!("Notification templates: {}", report.templates);
    println!("Successfully seeded database with sample data!");
    Ok(())
}
