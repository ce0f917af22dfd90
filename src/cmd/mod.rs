//! CLI command implementations.
//!
//! | Module   | Commands handled               |
//! |----------|--------------------------------|
//! | `serve`  | `Serve`                        |
//! | `db`     | `InitDb`, `Seed`               |
//! | `users`  | `Users`, `Token`               |
//! | `jobs`   | `RunJob`                       |

pub mod db;
pub mod jobs;
pub mod serve;
pub mod users;

pub use db::{cmd_init_db, cmd_seed, open_db};
pub use jobs::cmd_run_job;
pub use serve::cmd_serve;
pub use users::{cmd_token, cmd_users};

use anyhow::Result;
use ecosphere::config::EcoToml;

use super::Cli;

/// Layer the configuration: file, then environment, then CLI flags.
pub fn load_config(cli: &Cli) -> Result<EcoToml> {
    let mut config = EcoToml::load_or_default(&cli.config)?;
    config.apply_env()?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    Ok(config)
}
