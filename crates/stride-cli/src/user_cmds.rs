use anyhow::{Context, Result, bail};
use sqlx::PgPool;

use stride_db::queries::users;

use crate::UserCommands;

pub async fn run_user_command(
    command: UserCommands,
    pool: &PgPool,
    default_quota: i32,
) -> Result<()> {
    match command {
        UserCommands::Add { email, quota } => {
            let email = email.trim();
            if email.is_empty() {
                bail!("email must not be empty");
            }
            let quota = quota.unwrap_or(default_quota);
            if quota < 0 {
                bail!("quota must not be negative");
            }
            let user = users::insert_user(pool, email, quota)
                .await
                .with_context(|| format!("could not add user {email}"))?;
            println!("User {} created (id {}, quota {}).", user.email, user.id, user.generation_quota);
        }
        UserCommands::SetQuota { user_id, quota } => {
            if quota < 0 {
                bail!("quota must not be negative");
            }
            if users::get_user(pool, user_id).await?.is_none() {
                bail!("user {user_id} not found");
            }
            users::set_quota(pool, user_id, quota).await?;
            println!("User {user_id} quota set to {quota}.");
        }
    }
    Ok(())
}
