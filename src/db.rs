//! Connection pool and schema migrations.
//!
//! The schema is applied before the API starts serving requests; startup is
//! aborted when a migration fails or checksums drift.

use rocket_db_pools::sqlx::{self, PgPool, migrate::Migrator};
use rocket_db_pools::Database;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Database)]
#[database("lifeos_db")]
pub struct LifeosDb(sqlx::PgPool);

/// Apply pending migrations. Already applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    log::info!("checking database migration state");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}
