//! Relational driver over SeaORM
//!
//! Each migration runs in its own database transaction together with its
//! tracking row, so a failing body leaves neither its changes nor a record
//! behind. Statements are built with `sea_query` and rendered for whichever
//! backend the connection speaks (SQLite, PostgreSQL or MySQL).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Alias, ColumnDef, Expr, Func, Index, Order, Query, Table};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, TransactionTrait,
};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::driver::MigrationDriver;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::{self, Migration};
use crate::record::{version_from_row, AppliedMigrations, Method, MigrationRecord, Version};

use super::DEFAULT_TRACKING_TABLE;

/// Pool settings used by [`SqlDriver::connect`]
#[derive(Debug, Clone)]
pub struct SqlConnectOptions {
    pub max_connections: u32,
    pub connection_timeout: Duration,
}

impl Default for SqlConnectOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Transactional migration driver for relational databases
pub struct SqlDriver {
    db: DatabaseConnection,
    table: String,
    table_ready: bool,
}

impl SqlDriver {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            table: DEFAULT_TRACKING_TABLE.to_string(),
            table_ready: false,
        }
    }

    /// Open a pool for `url` and wrap it in a driver
    pub async fn connect(url: &str, options: SqlConnectOptions) -> MigrationResult<Self> {
        info!("Connecting to migration database: {}", url);

        let mut opts = ConnectOptions::new(url.to_string());
        opts.max_connections(options.max_connections)
            .min_connections(1)
            .connect_timeout(options.connection_timeout)
            .acquire_timeout(options.connection_timeout)
            .sqlx_logging(true)
            .sqlx_logging_level(log::LevelFilter::Debug);

        let db = Database::connect(opts).await?;
        debug!("Migration database connected with {} max connections", options.max_connections);
        Ok(Self::new(db))
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self.table_ready = false;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn col(name: &str) -> Alias {
        Alias::new(name)
    }

    fn table_ident(&self) -> Alias {
        Alias::new(self.table.as_str())
    }

    /// `CREATE TABLE IF NOT EXISTS`, outside any migration transaction
    async fn ensure_table(&mut self) -> MigrationResult<()> {
        if self.table_ready {
            return Ok(());
        }

        let stmt = Table::create()
            .table(self.table_ident())
            .if_not_exists()
            .col(ColumnDef::new(Self::col("app")).string().not_null())
            .col(ColumnDef::new(Self::col("version")).big_integer().not_null())
            .col(ColumnDef::new(Self::col("start_time")).timestamp_with_time_zone().not_null())
            .col(ColumnDef::new(Self::col("end_time")).timestamp_with_time_zone().null())
            .col(ColumnDef::new(Self::col("method")).string_len(4).not_null())
            .primary_key(
                Index::create()
                    .col(Self::col("app"))
                    .col(Self::col("version"))
                    .col(Self::col("method")),
            )
            .to_owned();

        let backend = self.db.get_database_backend();
        self.db.execute(backend.build(&stmt)).await?;
        self.table_ready = true;
        debug!("Migration tracking table '{}' is ready", self.table);
        Ok(())
    }

    async fn is_dirty<C: ConnectionTrait>(&self, conn: &C, app: &str) -> MigrationResult<bool> {
        let query = Query::select()
            .expr_as(Func::count(Expr::col(Self::col("app"))), Self::col("unfinished"))
            .from(self.table_ident())
            .and_where(Expr::col(Self::col("app")).eq(app))
            .and_where(Expr::col(Self::col("end_time")).is_null())
            .to_owned();

        let backend = conn.get_database_backend();
        let unfinished: i64 = match conn.query_one(backend.build(&query)).await? {
            Some(row) => row.try_get("", "unfinished")?,
            None => 0,
        };
        Ok(unfinished > 0)
    }

    async fn pre_run(
        &self,
        txn: &DatabaseTransaction,
        app: &str,
        version: Version,
        method: Method,
    ) -> MigrationResult<()> {
        if self.is_dirty(txn, app).await? {
            return Err(MigrationError::Dirty { app: app.to_string() });
        }

        let record = MigrationRecord::start(app, version, method);
        let insert = Query::insert()
            .into_table(self.table_ident())
            .columns([
                Self::col("app"),
                Self::col("version"),
                Self::col("start_time"),
                Self::col("method"),
            ])
            .values([
                record.app.as_str().into(),
                record.version.get().into(),
                record.start_time.into(),
                record.method.as_str().into(),
            ])
            .map_err(MigrationError::backend)?
            .to_owned();

        let backend = txn.get_database_backend();
        txn.execute(backend.build(&insert)).await?;
        Ok(())
    }

    async fn post_run(
        &self,
        txn: &DatabaseTransaction,
        app: &str,
        version: Version,
        method: Method,
    ) -> MigrationResult<()> {
        let update = Query::update()
            .table(self.table_ident())
            .value(Self::col("end_time"), Utc::now())
            .and_where(Expr::col(Self::col("app")).eq(app))
            .and_where(Expr::col(Self::col("version")).eq(version.get()))
            .and_where(Expr::col(Self::col("method")).eq(method.as_str()))
            .to_owned();

        let backend = txn.get_database_backend();
        let result = txn.execute(backend.build(&update)).await?;
        if result.rows_affected() != 1 {
            return Err(MigrationError::backend(format!(
                "expected to finish one tracking row for {} {}, updated {}",
                method,
                version,
                result.rows_affected()
            )));
        }
        Ok(())
    }

    async fn run_in_transaction(
        &self,
        txn: &mut DatabaseTransaction,
        migration: &dyn Migration<DatabaseTransaction>,
        app: &str,
        version: Version,
        method: Method,
    ) -> MigrationResult<()> {
        self.pre_run(txn, app, version, method).await?;

        migration::apply(migration, method, txn)
            .await
            .map_err(|e| MigrationError::execution(version, method, e))?;

        self.post_run(txn, app, version, method).await
    }

    /// Every tracking row of the app, oldest version first
    pub async fn records(&mut self, app: &str) -> MigrationResult<Vec<MigrationRecord>> {
        self.ensure_table().await?;

        let query = Query::select()
            .columns([
                Self::col("version"),
                Self::col("method"),
                Self::col("start_time"),
                Self::col("end_time"),
            ])
            .from(self.table_ident())
            .and_where(Expr::col(Self::col("app")).eq(app))
            .order_by(Self::col("version"), Order::Asc)
            .to_owned();

        let backend = self.db.get_database_backend();
        let rows = self.db.query_all(backend.build(&query)).await?;

        rows.iter()
            .map(|row| {
                let version: i64 = row.try_get("", "version")?;
                let method: String = row.try_get("", "method")?;
                let start_time: DateTime<Utc> = row.try_get("", "start_time")?;
                let end_time: Option<DateTime<Utc>> = row.try_get("", "end_time")?;
                Ok(MigrationRecord {
                    app: app.to_string(),
                    version: version_from_row(version)?,
                    method: method.parse()?,
                    start_time,
                    end_time,
                })
            })
            .collect()
    }
}

#[async_trait]
impl MigrationDriver for SqlDriver {
    type Connection = DatabaseTransaction;

    fn name(&self) -> &'static str {
        "sql"
    }

    async fn run(
        &mut self,
        migration: &dyn Migration<DatabaseTransaction>,
        app: &str,
        version: Version,
        method: Method,
    ) -> MigrationResult<()> {
        self.ensure_table().await?;

        let mut txn = self.db.begin().await?;
        match self.run_in_transaction(&mut txn, migration, app, version, method).await {
            Ok(()) => {
                txn.commit().await?;
                debug!("{} {} committed for app '{}'", method, version, app);
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(
                        "Rollback of {} {} for app '{}' failed: {}",
                        method, version, app, rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn last_run_version(&mut self, app: &str, method: Method) -> MigrationResult<Version> {
        self.ensure_table().await?;

        let query = Query::select()
            .expr_as(Func::max(Expr::col(Self::col("version"))), Self::col("last_version"))
            .from(self.table_ident())
            .and_where(Expr::col(Self::col("app")).eq(app))
            .and_where(Expr::col(Self::col("method")).eq(method.as_str()))
            .and_where(Expr::col(Self::col("end_time")).is_not_null())
            .to_owned();

        let backend = self.db.get_database_backend();
        let last: Option<i64> = match self.db.query_one(backend.build(&query)).await? {
            Some(row) => row.try_get("", "last_version")?,
            None => None,
        };
        last.map(version_from_row)
            .transpose()
            .map(|v| v.unwrap_or(Version::NONE))
    }

    async fn applied_migrations(&mut self, app: &str) -> MigrationResult<AppliedMigrations> {
        let records = self.records(app).await?;
        Ok(AppliedMigrations::from_records(&records))
    }

    async fn finish_migration(&mut self) -> MigrationResult<()> {
        // every migration commits on its own
        Ok(())
    }
}
