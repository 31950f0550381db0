//! Migration application.
//!
//! Migrations move through Defined → Built → Rendered → Applied. Each unit
//! runs inside one transaction: rendered statements plus the history upsert
//! either all commit or all roll back, so a failed unit leaves no partial
//! schema change visible.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::executor::Executor;
use crate::metadata::Model;
use crate::migrations::builder::MigrationBuilder;
use crate::migrations::history::HistoryRepository;
use crate::migrations::sql_generator::MigrationsSqlGenerator;
use crate::query::SqlScript;

/// A named, versioned migration unit.
///
/// The create and destroy steps are pure: they record operations on the
/// builder and nothing else. Side effects happen only when the migrator
/// applies the rendered statements.
pub trait DataMigration: Send + Sync {
    /// Stable identifier stored in the history table.
    fn id(&self) -> &str;

    /// Version this migration brings the schema to.
    fn version(&self) -> i32 {
        1
    }

    /// Record the operations that establish this migration's schema.
    fn create(&self, builder: &mut MigrationBuilder) -> Result<()>;

    /// Record the operations that tear this migration's schema down.
    fn destroy(&self, builder: &mut MigrationBuilder) -> Result<()> {
        let _ = builder;
        Ok(())
    }
}

/// Applies migrations in a deterministic, caller-supplied order.
pub struct Migrator {
    model: Arc<Model>,
    renderer: Arc<dyn MigrationsSqlGenerator>,
    executor: Arc<dyn Executor>,
    history: HistoryRepository,
}

impl Migrator {
    /// Create a migrator over the model, a dialect renderer and an
    /// executor.
    pub fn new(
        model: Arc<Model>,
        renderer: Arc<dyn MigrationsSqlGenerator>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let history = HistoryRepository::new(&model, Arc::clone(&executor));
        Self {
            model,
            renderer,
            executor,
            history,
        }
    }

    /// The history repository backing this migrator.
    pub fn history(&self) -> &HistoryRepository {
        &self.history
    }

    /// Apply every pending migration, in slice order. Creates the history
    /// table on first run and skips units whose recorded version is equal
    /// to or higher than theirs. Stops at the first failed unit.
    pub async fn migrate(
        &self,
        migrations: &[Box<dyn DataMigration>],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.history.ensure_created(cancel).await?;

        for migration in migrations {
            let applied = self.history.get_version(migration.id(), cancel).await?;
            if let Some(version) = applied {
                if version >= migration.version() {
                    info!(
                        "skipping migration {} (applied version {} >= {})",
                        migration.id(),
                        version,
                        migration.version()
                    );
                    continue;
                }
            }
            self.apply(migration.as_ref(), cancel).await?;
        }
        Ok(())
    }

    /// Build, render and apply one migration unit, then record its version.
    pub async fn apply(
        &self,
        migration: &dyn DataMigration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut builder = MigrationBuilder::new(Arc::clone(&self.model));
        migration.create(&mut builder)?;
        let mut scripts = self.renderer.generate(builder.operations())?;
        scripts.push(
            self.history
                .save_version_script(migration.id(), migration.version()),
        );

        self.run_unit(migration.id(), scripts, cancel).await?;
        info!(
            "applied migration {} at version {}",
            migration.id(),
            migration.version()
        );
        Ok(())
    }

    /// Build, render and apply one migration's destroy step, removing its
    /// history row in the same transaction.
    pub async fn destroy(
        &self,
        migration: &dyn DataMigration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut builder = MigrationBuilder::new(Arc::clone(&self.model));
        migration.destroy(&mut builder)?;
        let mut scripts = self.renderer.generate(builder.operations())?;
        scripts.push(self.history.delete_script(migration.id()));

        self.run_unit(migration.id(), scripts, cancel).await?;
        info!("destroyed migration {}", migration.id());
        Ok(())
    }

    /// Execute one unit's statements inside a single transaction. Any
    /// statement failure rolls the whole unit back.
    async fn run_unit(
        &self,
        id: &str,
        scripts: Vec<SqlScript>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut tx = self.executor.begin().await?;
        for script in &scripts {
            if let Err(err) = tx.execute(script.sql(), script.parameters(), cancel).await {
                error!("migration {} failed, rolling back: {}", id, err);
                tx.rollback().await?;
                return Err(err);
            }
        }
        tx.commit().await
    }
}
