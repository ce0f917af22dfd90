//! User and token commands: `ecosphere users` and `ecosphere token`.

use anyhow::{Context, Result, anyhow};
use ecosphere::auth;
use ecosphere::config::EcoToml;
use ecosphere::models::UserRole;

use super::super::{TokenCommands, UsersCommands};
use super::open_db;

pub fn cmd_users(config: &EcoToml, command: UsersCommands) -> Result<()> {
    let db = open_db(config)?;
    match command {
        UsersCommands::Add {
            username,
            email,
            role,
            location,
        } => {
            let role: UserRole = role
                .to_uppercase()
                .parse()
                .map_err(|e: String| anyhow!("role: {}", e))?;
            let user = db.create_user(&username, &email, role, &location)?;
            println!("Created user {} (id {}, {})", user.username, user.id, user.role);
        }
        UsersCommands::List => {
            let users = db.list_active_users()?;
            if users.is_empty() {
                println!("No users.");
                return Ok(());
            }
            println!("{:<6} {:<16} {:<12} {:>8}  {}", "ID", "USERNAME", "ROLE", "POINTS", "LOCATION");
            for user in users {
                println!(
                    "{:<6} {:<16} {:<12} {:>8}  {}",
                    user.id, user.username, user.role, user.total_points, user.location
                );
            }
        }
    }
    Ok(())
}

pub fn cmd_token(config: &EcoToml, command: TokenCommands) -> Result<()> {
    let db = open_db(config)?;
    match command {
        TokenCommands::Issue { username } => {
            let user = db
                .get_user_by_username(&username)?
                .with_context(|| format!("User '{}' not found", username))?;
            let token = auth::issue_token(&db, user.id)?;
            // Bare token on stdout so it can be captured by scripts.
            println!("{}", token);
        }
    }
    Ok(())
}
