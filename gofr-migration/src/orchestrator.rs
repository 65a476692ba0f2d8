//! Backend-agnostic orchestration of a migration batch

use tracing::{debug, error, info, warn};

use crate::driver::MigrationDriver;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::MigrationSet;
use crate::record::{Method, Version};

/// Run the pending migrations of `app` in `method` order.
///
/// UP applies every registered version newer than the last completed UP,
/// oldest first. DOWN reverts, newest first, every registered version whose
/// UP is recorded and whose DOWN is not. [`MigrationDriver::begin`] runs
/// before that history is read. The batch stops at the first
/// failing migration. `finish_migration` is called exactly once afterwards,
/// on success and on failure, so that completed attempts are flushed and
/// backend locks are released.
///
/// Returns the versions that ran, in the order they ran.
pub async fn migrate<D>(
    app: &str,
    driver: Option<&mut D>,
    migrations: &MigrationSet<D::Connection>,
    method: Method,
) -> MigrationResult<Vec<Version>>
where
    D: MigrationDriver + ?Sized,
{
    let driver = driver.ok_or(MigrationError::NoDatabase)?;
    if app.trim().is_empty() {
        return Err(MigrationError::InvalidApp);
    }

    debug!(
        "Running {} migrations for app '{}' on {} ({} registered)",
        method,
        app,
        driver.name(),
        migrations.len()
    );

    let outcome = match driver.begin(app).await {
        Err(e) => Err((Vec::new(), e)),
        Ok(()) => match method {
            Method::Up => run_up(app, &mut *driver, migrations).await,
            Method::Down => run_down(app, &mut *driver, migrations).await,
        },
    };

    match outcome {
        Ok(ran) => {
            driver.finish_migration().await?;
            if ran.is_empty() {
                info!("No {} migrations to run for app '{}'", method, app);
            } else {
                info!(
                    "Migrations ran successfully for app '{}' ({}): {:?}",
                    app,
                    method,
                    ran.iter().map(|v| v.get()).collect::<Vec<_>>()
                );
            }
            Ok(ran)
        }
        Err((ran, err)) => {
            if !ran.is_empty() {
                info!(
                    "Migrations completed before the failure for app '{}' ({}): {:?}",
                    app,
                    method,
                    ran.iter().map(|v| v.get()).collect::<Vec<_>>()
                );
            }
            if let Err(flush_err) = driver.finish_migration().await {
                warn!(
                    "Failed to finalize migration batch for app '{}' after an error: {}",
                    app, flush_err
                );
            }
            error!("Migration batch for app '{}' aborted: {}", app, err);
            Err(err)
        }
    }
}

type BatchOutcome = Result<Vec<Version>, (Vec<Version>, MigrationError)>;

async fn run_up<D>(app: &str, driver: &mut D, migrations: &MigrationSet<D::Connection>) -> BatchOutcome
where
    D: MigrationDriver + ?Sized,
{
    let mut ran = Vec::new();
    let last = driver
        .last_run_version(app, Method::Up)
        .await
        .map_err(|e| (Vec::new(), e))?;

    for (version, migration) in migrations.iter().filter(|(v, _)| *v > last) {
        debug!("Applying migration {} for app '{}'", version, app);
        if let Err(err) = driver.run(migration, app, version, Method::Up).await {
            return Err((ran, err));
        }
        ran.push(version);
    }

    Ok(ran)
}

async fn run_down<D>(app: &str, driver: &mut D, migrations: &MigrationSet<D::Connection>) -> BatchOutcome
where
    D: MigrationDriver + ?Sized,
{
    let mut ran = Vec::new();
    let applied = driver
        .applied_migrations(app)
        .await
        .map_err(|e| (Vec::new(), e))?;

    for (version, migration) in migrations.iter().rev() {
        if !applied.can_revert(version) {
            debug!("Skipping DOWN of {} for app '{}'", version, app);
            continue;
        }
        debug!("Reverting migration {} for app '{}'", version, app);
        if let Err(err) = driver.run(migration, app, version, Method::Down).await {
            return Err((ran, err));
        }
        ran.push(version);
    }

    Ok(ran)
}
