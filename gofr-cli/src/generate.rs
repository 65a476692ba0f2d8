//! Migration file scaffolding for `gofr migrate create`

use anyhow::{Context, Result};
use gofr_config::DatabaseKind;
use gofr_migration::Version;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration for generating a new migration
#[derive(Debug, Clone)]
pub struct MigrationGenerationConfig {
    pub name: String,
    pub dir: PathBuf,
    pub database: DatabaseKind,
    pub version: Option<Version>,
}

impl MigrationGenerationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: PathBuf::from("migrations"),
            database: DatabaseKind::Sql,
            version: None,
        }
    }

    /// Set the migrations directory
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the backend the migration body is written against
    pub fn with_database(mut self, database: DatabaseKind) -> Self {
        self.database = database;
        self
    }

    /// Use a fixed version instead of the current UTC timestamp
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }
}

/// Information about a generated migration
#[derive(Debug, Clone)]
pub struct GeneratedMigration {
    pub path: PathBuf,
    pub version: Version,
    pub module: String,
    pub struct_name: String,
    /// Modules listed in the regenerated `mod.rs`, oldest first
    pub registered: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MigrationFile {
    version: Version,
    module: String,
    struct_name: String,
}

/// Write `m<version>_<name>.rs` and regenerate `mod.rs` with an `all()`
/// function registering every migration in the directory
pub fn generate_migration(config: MigrationGenerationConfig) -> Result<GeneratedMigration> {
    let snake = snake_name(&config.name)?;
    let version = match config.version {
        Some(version) => version,
        None => chrono::Utc::now()
            .format("%Y%m%d%H%M%S")
            .to_string()
            .parse()
            .context("Failed to derive a version from the current time")?,
    };

    fs::create_dir_all(&config.dir)
        .with_context(|| format!("Failed to create migrations directory {:?}", config.dir))?;

    let existing = scan_migrations(&config.dir)?;
    if let Some(clash) = existing.iter().find(|m| m.version == version) {
        return Err(anyhow::anyhow!(
            "A migration with version {} already exists: {}.rs",
            version,
            clash.module
        ));
    }

    let file = MigrationFile {
        version,
        module: format!("m{}_{}", version, snake),
        struct_name: camel_name(&snake),
    };
    let path = config.dir.join(format!("{}.rs", file.module));
    info!("Generating migration {} at {:?}", version, path);

    fs::write(&path, migration_source(&file.struct_name, config.database))
        .with_context(|| format!("Failed to write {:?}", path))?;

    let mut all = existing;
    all.push(file.clone());
    all.sort_by_key(|m| m.version);

    let mod_path = config.dir.join("mod.rs");
    fs::write(&mod_path, mod_source(&all, config.database))
        .with_context(|| format!("Failed to write {:?}", mod_path))?;
    debug!("Registered {} migrations in {:?}", all.len(), mod_path);

    Ok(GeneratedMigration {
        path,
        version,
        module: file.module,
        struct_name: file.struct_name,
        registered: all.into_iter().map(|m| m.module).collect(),
    })
}

fn snake_name(name: &str) -> Result<String> {
    let snake = name.trim().to_lowercase().replace(['-', ' '], "_");
    let valid = snake
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_lowercase())
        && snake.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(anyhow::anyhow!(
            "Invalid migration name '{}': use letters, digits, '-' or '_', starting with a letter",
            name
        ));
    }
    Ok(snake)
}

fn camel_name(snake: &str) -> String {
    snake
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn parse_file_name(file_name: &str) -> Option<MigrationFile> {
    let module = file_name.strip_suffix(".rs")?;
    let (digits, name) = module.strip_prefix('m')?.split_once('_')?;
    let version: Version = digits.parse().ok()?;
    Some(MigrationFile {
        version,
        module: module.to_string(),
        struct_name: camel_name(name),
    })
}

fn scan_migrations(dir: &Path) -> Result<Vec<MigrationFile>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
        let entry = entry?;
        if let Some(file) = entry.file_name().to_str().and_then(parse_file_name) {
            found.push(file);
        }
    }
    found.sort_by_key(|m| m.version);
    Ok(found)
}

/// Connection type, its import and the generic bound, per backend
fn connection_parts(database: DatabaseKind) -> (&'static str, &'static str, Option<&'static str>) {
    match database {
        DatabaseKind::Sql => (
            "DatabaseTransaction",
            "use sea_orm::{ConnectionTrait, DatabaseTransaction};",
            None,
        ),
        DatabaseKind::Cassandra | DatabaseKind::Ycql => {
            ("S", "use gofr_migration::backends::CqlSession;", Some("S: CqlSession"))
        }
        DatabaseKind::Mongo => ("D", "use gofr_migration::backends::DocumentStore;", Some("D: DocumentStore")),
        DatabaseKind::Redis => ("K", "use gofr_migration::backends::KeyValueStore;", Some("K: KeyValueStore")),
    }
}

fn migration_source(struct_name: &str, database: DatabaseKind) -> String {
    let (conn, import, bound) = connection_parts(database);
    let generics = bound.map(|b| format!("<{}>", b)).unwrap_or_default();
    let body = match database {
        DatabaseKind::Sql => "        // conn.execute_unprepared(\"...\").await?;\n",
        _ => "",
    };

    format!(
        r#"use async_trait::async_trait;
use gofr_migration::Migration;
{import}

pub struct {struct_name};

#[async_trait]
impl{generics} Migration<{conn}> for {struct_name} {{
    async fn up(&self, conn: &mut {conn}) -> anyhow::Result<()> {{
        let _ = conn;
{body}        Ok(())
    }}

    async fn down(&self, conn: &mut {conn}) -> anyhow::Result<()> {{
        let _ = conn;
{body}        Ok(())
    }}
}}
"#
    )
}

fn mod_source(migrations: &[MigrationFile], database: DatabaseKind) -> String {
    let (conn, import, bound) = connection_parts(database);
    // the trait import is only needed by the migration files
    let import = match database {
        DatabaseKind::Sql => "use sea_orm::DatabaseTransaction;",
        _ => import,
    };
    let generics = bound
        .map(|b| format!("<{} + 'static>", b))
        .unwrap_or_default();

    let mut out = String::from("// Generated by `gofr migrate create`. Do not edit by hand.\n\n");
    for m in migrations {
        out.push_str(&format!("mod {};\n", m.module));
    }
    out.push_str("\nuse gofr_migration::{MigrationResult, MigrationSet};\n");
    out.push_str(import);
    out.push_str("\n\n/// Every migration in this directory, keyed by version\n");
    out.push_str(&format!(
        "pub fn all{}() -> MigrationResult<MigrationSet<{}>> {{\n",
        generics, conn
    ));
    out.push_str("    let mut set = MigrationSet::new();\n");
    for m in migrations {
        out.push_str(&format!(
            "    set.insert(\"{}\", {}::{})?;\n",
            m.version, m.module, m.struct_name
        ));
    }
    out.push_str("    Ok(set)\n}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_names() {
        assert_eq!(snake_name("Create-Users").unwrap(), "create_users");
        assert_eq!(camel_name("create_users_v2"), "CreateUsersV2");
        assert!(snake_name("").is_err());
        assert!(snake_name("9lives").is_err());
        assert!(snake_name("drop;table").is_err());
    }

    #[test]
    fn test_parse_file_name() {
        let parsed = parse_file_name("m20240101120000_create_users.rs").unwrap();
        assert_eq!(parsed.version, Version::new(20240101120000));
        assert_eq!(parsed.struct_name, "CreateUsers");
        assert!(parse_file_name("mod.rs").is_none());
        assert!(parse_file_name("helpers.rs").is_none());
        assert!(parse_file_name("m2024_notes.txt").is_none());
    }

    #[test]
    fn test_generate_sql_migration() {
        let dir = TempDir::new().unwrap();
        let config = MigrationGenerationConfig::new("create-users")
            .with_dir(dir.path())
            .with_version(Version::new(20240101120000));

        let generated = generate_migration(config).unwrap();

        assert_eq!(generated.module, "m20240101120000_create_users");
        let source = fs::read_to_string(&generated.path).unwrap();
        assert!(source.contains("impl Migration<DatabaseTransaction> for CreateUsers"));
        let module = fs::read_to_string(dir.path().join("mod.rs")).unwrap();
        assert!(module.contains("mod m20240101120000_create_users;"));
        assert!(module.contains("pub fn all() -> MigrationResult<MigrationSet<DatabaseTransaction>>"));
        assert!(module.contains("set.insert(\"20240101120000\", m20240101120000_create_users::CreateUsers)?;"));
    }

    #[test]
    fn test_mod_lists_migrations_in_version_order() {
        let dir = TempDir::new().unwrap();
        for (name, version) in [("add_index", 20240301000000), ("create_orders", 999)] {
            generate_migration(
                MigrationGenerationConfig::new(name)
                    .with_dir(dir.path())
                    .with_database(DatabaseKind::Redis)
                    .with_version(Version::new(version)),
            )
            .unwrap();
        }

        let module = fs::read_to_string(dir.path().join("mod.rs")).unwrap();
        let older = module.find("m999_create_orders::CreateOrders").unwrap();
        let newer = module.find("m20240301000000_add_index::AddIndex").unwrap();
        assert!(older < newer);
        assert!(module.contains("pub fn all<K: KeyValueStore + 'static>()"));
    }

    #[test]
    fn test_duplicate_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = MigrationGenerationConfig::new("first")
            .with_dir(dir.path())
            .with_database(DatabaseKind::Cassandra)
            .with_version(Version::new(1));
        generate_migration(config.clone()).unwrap();

        let err = generate_migration(MigrationGenerationConfig { name: "second".into(), ..config }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
