use sea_orm_migration::MigratorTrait;
use tracing::{error, info};

use storefront_api::{config, db, migrator::Migrator};

/// `migration [up|down|status|fresh]`, defaulting to `up`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());

    let cfg = config::load_config()?;
    info!("Connecting to database for `{}`", command);
    let conn = db::establish_connection_from_app_config(&cfg).await?;

    let result = match command.as_str() {
        "up" => Migrator::up(&conn, None).await,
        "down" => Migrator::down(&conn, Some(1)).await,
        "status" => Migrator::status(&conn).await,
        "fresh" => Migrator::fresh(&conn).await,
        other => {
            error!("Unknown migration command: {}", other);
            anyhow::bail!("usage: migration [up|down|status|fresh]");
        }
    };

    if let Err(e) = result {
        error!("Migration `{}` failed: {}", command, e);
        return Err(e.into());
    }

    info!("Migration `{}` completed successfully", command);
    Ok(())
}
