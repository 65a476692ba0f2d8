//! End-to-end migration runs against a SQLite database through the
//! embeddable migrate command

use async_trait::async_trait;
use clap::Parser;
use gofr::commands::migrate::fetch_status;
use gofr::MigrateCommand;
use gofr_config::GofrConfig;
use gofr_migration::{Method, Migration, MigrationError, MigrationSet, Version};
use sea_orm::{ConnectionTrait, Database, DatabaseTransaction, Statement};
use tempfile::TempDir;

struct CreateTable(&'static str);

#[async_trait]
impl Migration<DatabaseTransaction> for CreateTable {
    async fn up(&self, txn: &mut DatabaseTransaction) -> anyhow::Result<()> {
        txn.execute_unprepared(&format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", self.0))
            .await?;
        Ok(())
    }

    async fn down(&self, txn: &mut DatabaseTransaction) -> anyhow::Result<()> {
        txn.execute_unprepared(&format!("DROP TABLE {}", self.0)).await?;
        Ok(())
    }
}

/// Creates its table, then writes to a table that does not exist
struct Broken;

#[async_trait]
impl Migration<DatabaseTransaction> for Broken {
    async fn up(&self, txn: &mut DatabaseTransaction) -> anyhow::Result<()> {
        txn.execute_unprepared("CREATE TABLE payments (id INTEGER PRIMARY KEY)")
            .await?;
        txn.execute_unprepared("INSERT INTO no_such_table (id) VALUES (1)")
            .await?;
        Ok(())
    }
}

fn test_config(dir: &TempDir) -> GofrConfig {
    let mut config = GofrConfig::default();
    config.app.name = "shop".to_string();
    config.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("shop.db").display());
    config.database.max_connections = 1;
    config
}

fn command(args: &[&str]) -> MigrateCommand {
    MigrateCommand::parse_from(std::iter::once("migrate").chain(args.iter().copied()))
}

fn shop_migrations() -> MigrationSet<DatabaseTransaction> {
    MigrationSet::new()
        .with("20240101000000", CreateTable("users"))
        .unwrap()
        .with("20240201000000", CreateTable("orders"))
        .unwrap()
        .with("20240301000000", CreateTable("invoices"))
        .unwrap()
}

async fn table_exists(config: &GofrConfig, table: &str) -> bool {
    let db = Database::connect(config.database.url.as_str()).await.unwrap();
    let stmt = Statement::from_string(
        db.get_database_backend(),
        format!("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '{}'", table),
    );
    db.query_one(stmt).await.unwrap().is_some()
}

#[tokio::test]
async fn test_up_then_tagged_down() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let ran = command(&[]).execute_sql(&config, shop_migrations()).await.unwrap();
    assert_eq!(ran.len(), 3);
    for table in ["users", "orders", "invoices"] {
        assert!(table_exists(&config, table).await);
    }

    // UP again is a no-op
    let ran = command(&[]).execute_sql(&config, shop_migrations()).await.unwrap();
    assert!(ran.is_empty());

    let ran = command(&["--method", "DOWN", "--tag", "20240201000000"])
        .execute_sql(&config, shop_migrations())
        .await
        .unwrap();
    assert_eq!(ran, vec![Version::new(20240201000000)]);
    assert!(!table_exists(&config, "orders").await);
    assert!(table_exists(&config, "invoices").await);

    // the untagged DOWN skips what is already reverted, newest first
    let ran = command(&["--method", "DOWN"])
        .execute_sql(&config, shop_migrations())
        .await
        .unwrap();
    assert_eq!(ran, vec![Version::new(20240301000000), Version::new(20240101000000)]);

    let records = fetch_status(&config, "shop").await.unwrap();
    assert_eq!(records.iter().filter(|r| r.method == Method::Up).count(), 3);
    assert_eq!(records.iter().filter(|r| r.method == Method::Down).count(), 3);
    assert!(records.iter().all(|r| r.is_finished()));
}

#[tokio::test]
async fn test_failure_keeps_earlier_migrations() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let set = MigrationSet::new()
        .with("20240101000000", CreateTable("users"))
        .unwrap()
        .with("20240201000000", Broken)
        .unwrap()
        .with("20240301000000", CreateTable("invoices"))
        .unwrap();

    let err = command(&[]).execute_sql(&config, set).await.unwrap_err();

    let migration_err = err.downcast_ref::<MigrationError>().unwrap();
    assert!(migration_err.is_execution());
    assert!(table_exists(&config, "users").await);
    assert!(!table_exists(&config, "payments").await);
    assert!(!table_exists(&config, "invoices").await);

    let records = fetch_status(&config, "shop").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].version, Version::new(20240101000000));

    // a fixed set picks up where the failed batch stopped
    let fixed = MigrationSet::new()
        .with("20240101000000", CreateTable("users"))
        .unwrap()
        .with("20240201000000", CreateTable("payments"))
        .unwrap()
        .with("20240301000000", CreateTable("invoices"))
        .unwrap();
    let ran = command(&[]).execute_sql(&config, fixed).await.unwrap();
    assert_eq!(ran, vec![Version::new(20240201000000), Version::new(20240301000000)]);
}

#[tokio::test]
async fn test_dirty_record_blocks_app() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    command(&["--app", "billing"])
        .execute_sql(&config, MigrationSet::new())
        .await
        .unwrap();

    let db = Database::connect(config.database.url.as_str()).await.unwrap();
    db.execute_unprepared(
        "INSERT INTO gofr_migrations (app, version, start_time, method) \
         VALUES ('shop', 20231201000000, '2023-12-01 00:00:00+00:00', 'UP')",
    )
    .await
    .unwrap();
    drop(db);

    let err = command(&[]).execute_sql(&config, shop_migrations()).await.unwrap_err();
    assert!(err.downcast_ref::<MigrationError>().unwrap().is_dirty());
    assert!(!table_exists(&config, "users").await);

    // another app on the same database is unaffected
    let ran = command(&["--app", "billing"])
        .execute_sql(&config, shop_migrations())
        .await
        .unwrap();
    assert_eq!(ran.len(), 3);
}
