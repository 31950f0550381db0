//! Migrator behavior against a scripted executor: history bootstrap,
//! version skipping, per-unit transactions and rollback on failure.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{model_and_generator, FakeExecutor, User};
use pretty_assertions::assert_eq;
use stratum::{
    col, DataMigration, MigrationBuilder, Migrator, MigrationsSqlServerGenerator, Parameters,
    Result, StratumError, Value,
};

struct CreateUsers;

impl DataMigration for CreateUsers {
    fn id(&self) -> &str {
        "app.users"
    }

    fn create(&self, builder: &mut MigrationBuilder) -> Result<()> {
        builder.create_table::<User>(|t| {
            t.columns_from_metadata();
            t.unique_constraint(&["Name"]);
            Ok(())
        })?;
        builder.create_index::<User>(&["Score"], false);
        builder.sql_create(&User {
            id: 0,
            name: Some("admin".to_string()),
            score: 0,
        });
        Ok(())
    }

    fn destroy(&self, builder: &mut MigrationBuilder) -> Result<()> {
        builder.drop_table::<User>();
        Ok(())
    }
}

struct BumpScores;

impl DataMigration for BumpScores {
    fn id(&self) -> &str {
        "app.users.scores"
    }

    fn version(&self) -> i32 {
        2
    }

    fn create(&self, builder: &mut MigrationBuilder) -> Result<()> {
        let mut statement = Parameters::new();
        statement.add("Score", 100i32);
        builder.sql_update::<User>(col("Name").eq("admin"), statement);
        Ok(())
    }
}

fn migrator(executor: &FakeExecutor) -> Migrator {
    let (model, generator) = model_and_generator();
    let renderer = Arc::new(MigrationsSqlServerGenerator::new(
        Arc::clone(&model),
        generator,
    ));
    Migrator::new(model, renderer, Arc::new(executor.clone()))
}

#[tokio::test]
async fn test_first_run_creates_history_table_and_applies() {
    let executor = FakeExecutor::new();
    let migrator = migrator(&executor);
    let cancel = CancellationToken::new();

    let migrations: Vec<Box<dyn DataMigration>> = vec![Box::new(CreateUsers)];
    migrator.migrate(&migrations, &cancel).await.unwrap();

    let recorded = executor.state.recorded();
    // existence probe, history DDL, version lookup, then the unit
    assert_eq!(recorded[0].sql, "SELECT OBJECT_ID(N'$pre:Migrations');");
    assert!(recorded[1].sql.starts_with("CREATE TABLE [$pre:Migrations]("));
    assert!(recorded[2].sql.starts_with("SELECT [Version] FROM [$pre:Migrations]"));

    assert!(recorded[3].sql.starts_with("CREATE TABLE [$pre:app_users_User]("));
    assert!(recorded[4].sql.starts_with("CREATE INDEX [IX_$pre:app_users_User_Score]"));
    assert!(recorded[5].sql.starts_with("INSERT INTO [$pre:app_users_User]"));
    assert!(recorded[6].sql.contains("IF EXISTS"));
    assert_eq!(
        recorded[6].parameters,
        vec![
            ("Id".to_string(), Value::Text("app.users".to_string())),
            ("Version".to_string(), Value::I32(1)),
        ]
    );

    assert_eq!(executor.state.commits.load(Ordering::SeqCst), 1);
    assert_eq!(executor.state.rollbacks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_applied_version_is_skipped() {
    let executor = FakeExecutor::new();
    let migrator = migrator(&executor);
    let cancel = CancellationToken::new();

    // history table exists; both lookups report version 2
    executor.state.push_scalar(Some(Value::I32(1)));
    executor.state.push_scalar(Some(Value::I32(2)));
    executor.state.push_scalar(Some(Value::I32(2)));

    let migrations: Vec<Box<dyn DataMigration>> =
        vec![Box::new(CreateUsers), Box::new(BumpScores)];
    migrator.migrate(&migrations, &cancel).await.unwrap();

    // no unit ran: probe + two version lookups only
    assert_eq!(executor.state.recorded().len(), 3);
    assert_eq!(executor.state.commits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lower_applied_version_is_reapplied() {
    let executor = FakeExecutor::new();
    let migrator = migrator(&executor);
    let cancel = CancellationToken::new();

    executor.state.push_scalar(Some(Value::I32(1))); // history exists
    executor.state.push_scalar(Some(Value::I32(1))); // BumpScores applied at 1 < 2

    let migrations: Vec<Box<dyn DataMigration>> = vec![Box::new(BumpScores)];
    migrator.migrate(&migrations, &cancel).await.unwrap();

    let recorded = executor.state.recorded();
    assert!(recorded[2].sql.starts_with("UPDATE [$pre:app_users_User] SET [Score]=@Score"));
    assert_eq!(executor.state.commits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_statement_rolls_back_whole_unit() {
    let executor = FakeExecutor::new();
    let migrator = migrator(&executor);
    let cancel = CancellationToken::new();

    // CreateUsers renders four transactional statements (table, index,
    // seed, history upsert); fail the third.
    *executor.state.fail_on_tx_statement.lock().unwrap() = Some(3);

    let migrations: Vec<Box<dyn DataMigration>> = vec![Box::new(CreateUsers)];
    let err = migrator.migrate(&migrations, &cancel).await.unwrap_err();
    assert!(matches!(err, StratumError::Execution(_)));

    assert_eq!(executor.state.commits.load(Ordering::SeqCst), 0);
    assert_eq!(executor.state.rollbacks.load(Ordering::SeqCst), 1);

    // nothing after the failing statement was issued
    let transactional: Vec<_> = executor
        .state
        .recorded()
        .into_iter()
        .filter(|r| !r.sql.contains("OBJECT_ID") && !r.sql.starts_with("SELECT [Version]"))
        .collect();
    assert_eq!(transactional.len(), 3); // history DDL + two unit statements
}

#[tokio::test]
async fn test_destroy_removes_history_row() {
    let executor = FakeExecutor::new();
    let migrator = migrator(&executor);
    let cancel = CancellationToken::new();

    migrator.destroy(&CreateUsers, &cancel).await.unwrap();

    let recorded = executor.state.recorded();
    assert_eq!(recorded[0].sql, "DROP TABLE [$pre:app_users_User];");
    assert!(recorded[1].sql.starts_with("DELETE FROM [$pre:Migrations]"));
    assert_eq!(
        recorded[1].parameters,
        vec![("Id".to_string(), Value::Text("app.users".to_string()))]
    );
    assert_eq!(executor.state.commits.load(Ordering::SeqCst), 1);
}
