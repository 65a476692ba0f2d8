use anyhow::Result;
use gofr_config::{DatabaseKind, GofrConfig};
use gofr_migration::{Method, MigrationRecord};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::generate::{generate_migration, GeneratedMigration, MigrationGenerationConfig};
use crate::migrate::sql_driver;

/// Handle `migrate create`
pub fn handle_migrate_create(
    config: &GofrConfig,
    name: &str,
    dir: Option<PathBuf>,
    database: Option<&str>,
) -> Result<GeneratedMigration> {
    let database = match database {
        Some(db) => DatabaseKind::from_str(db).map_err(|e| anyhow::anyhow!(e))?,
        None => config.database.backend,
    };
    let dir = dir.unwrap_or_else(|| config.migrations.directory.clone());

    let generated = generate_migration(
        MigrationGenerationConfig::new(name)
            .with_dir(dir)
            .with_database(database),
    )?;

    println!("Created {}", generated.path.display());
    println!("Registered {} migrations in mod.rs", generated.registered.len());
    Ok(generated)
}

/// Records of an app in the configured relational database
pub async fn fetch_status(config: &GofrConfig, app: &str) -> Result<Vec<MigrationRecord>> {
    if config.database.backend != DatabaseKind::Sql {
        return Err(anyhow::anyhow!(
            "migrate status reads the relational tracking table; backend '{}' is queried through the application",
            config.database.backend
        ));
    }

    let mut driver = sql_driver(config).await?;
    Ok(driver.records(app).await?)
}

/// One line per record: version, method, start and end time
pub fn render_status(app: &str, records: &[MigrationRecord]) -> String {
    if records.is_empty() {
        return format!("No migrations recorded for app '{}'\n", app);
    }

    let mut out = format!("Migrations for app '{}':\n", app);
    out.push_str(&format!("{:<16} {:<6} {:<27} {}\n", "VERSION", "METHOD", "STARTED", "FINISHED"));
    for record in records {
        let finished = match record.end_time {
            Some(end) => end.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            None => "DIRTY".to_string(),
        };
        out.push_str(&format!(
            "{:<16} {:<6} {:<27} {}\n",
            record.version.get(),
            record.method.as_str(),
            record.start_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            finished
        ));
    }

    let applied = records
        .iter()
        .filter(|r| r.method == Method::Up && r.is_finished())
        .count();
    out.push_str(&format!("{} applied UP migrations\n", applied));
    out
}

/// Handle `migrate status`
pub async fn handle_migrate_status(config: &GofrConfig, app: Option<String>) -> Result<()> {
    let app = app.unwrap_or_else(|| config.app.name.clone());
    info!("Reading migration status for app '{}'", app);

    let records = fetch_status(config, &app).await?;
    print!("{}", render_status(&app, &records));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gofr_migration::Version;
    use tempfile::TempDir;

    #[test]
    fn test_render_status_marks_dirty() {
        let mut done = MigrationRecord::start("orders", Version::new(20240101000000), Method::Up);
        done.finish();
        let dirty = MigrationRecord::start("orders", Version::new(20240201000000), Method::Up);

        let out = render_status("orders", &[done, dirty]);

        assert!(out.contains("20240101000000"));
        assert!(out.contains("DIRTY"));
        assert!(out.contains("1 applied UP migrations"));
        assert!(render_status("billing", &[]).contains("No migrations recorded"));
    }

    #[test]
    fn test_create_uses_configured_directory() {
        let dir = TempDir::new().unwrap();
        let mut config = GofrConfig::default();
        config.migrations.directory = dir.path().join("db");

        let generated = handle_migrate_create(&config, "create_users", None, Some("ycql")).unwrap();

        assert!(generated.path.starts_with(dir.path().join("db")));
        let source = std::fs::read_to_string(&generated.path).unwrap();
        assert!(source.contains("impl<S: CqlSession> Migration<S> for CreateUsers"));
    }

    #[tokio::test]
    async fn test_status_on_empty_database() {
        let dir = TempDir::new().unwrap();
        let mut config = GofrConfig::default();
        config.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("status.db").display());

        let records = fetch_status(&config, "orders").await.unwrap();
        assert!(records.is_empty());

        config.database.backend = DatabaseKind::Mongo;
        assert!(fetch_status(&config, "orders").await.is_err());
    }
}
