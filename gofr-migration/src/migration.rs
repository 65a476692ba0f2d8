//! The user-supplied migration contract and the set an application registers

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::{MigrationError, MigrationResult};
use crate::record::{Method, Version};

/// A versioned unit of change with paired up/down logic.
///
/// `C` is the backend connection handle the driver hands to the body: the
/// open `DatabaseTransaction` for the relational driver, or the session/store
/// for the tracked backends.
#[async_trait]
pub trait Migration<C: ?Sized + Send>: Send + Sync {
    /// Apply the migration
    async fn up(&self, conn: &mut C) -> anyhow::Result<()>;

    /// Revert the migration. Not every migration can be reverted, so the
    /// default does nothing.
    async fn down(&self, _conn: &mut C) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Invoke the body matching `method`
pub(crate) async fn apply<C: ?Sized + Send>(
    migration: &dyn Migration<C>,
    method: Method,
    conn: &mut C,
) -> anyhow::Result<()> {
    match method {
        Method::Up => migration.up(conn).await,
        Method::Down => migration.down(conn).await,
    }
}

/// Migrations available to an application, ordered by version
pub struct MigrationSet<C: ?Sized + Send> {
    migrations: BTreeMap<Version, Box<dyn Migration<C>>>,
}

impl<C: ?Sized + Send> MigrationSet<C> {
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// Register a migration under a numeric key such as `"20220329122401"`
    pub fn insert<M>(&mut self, key: &str, migration: M) -> MigrationResult<()>
    where
        M: Migration<C> + 'static,
    {
        let version: Version = key.parse()?;
        self.insert_version(version, migration)
    }

    /// Register a migration under an already-parsed version
    pub fn insert_version<M>(&mut self, version: Version, migration: M) -> MigrationResult<()>
    where
        M: Migration<C> + 'static,
    {
        if self.migrations.contains_key(&version) {
            return Err(MigrationError::DuplicateVersion(version));
        }
        self.migrations.insert(version, Box::new(migration));
        Ok(())
    }

    /// Builder-style registration
    pub fn with<M>(mut self, key: &str, migration: M) -> MigrationResult<Self>
    where
        M: Migration<C> + 'static,
    {
        self.insert(key, migration)?;
        Ok(self)
    }

    pub fn get(&self, version: Version) -> Option<&dyn Migration<C>> {
        self.migrations.get(&version).map(|m| m.as_ref())
    }

    pub fn contains(&self, version: Version) -> bool {
        self.migrations.contains_key(&version)
    }

    /// Registered versions, ascending
    pub fn versions(&self) -> Vec<Version> {
        self.migrations.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Iterate in ascending version order; `.rev()` gives newest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Version, &dyn Migration<C>)> + '_ {
        self.migrations.iter().map(|(v, m)| (*v, m.as_ref()))
    }

    /// Keep only the tagged versions. Every tag must name a registered
    /// migration.
    pub fn retain_versions(&mut self, tags: &[Version]) -> MigrationResult<()> {
        if let Some(unknown) = tags.iter().find(|t| !self.migrations.contains_key(*t)) {
            return Err(MigrationError::UnknownTag(*unknown));
        }
        self.migrations.retain(|version, _| tags.contains(version));
        Ok(())
    }
}

impl<C: ?Sized + Send> Default for MigrationSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized + Send> std::fmt::Debug for MigrationSet<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationSet")
            .field("versions", &self.versions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Migration<()> for Noop {
        async fn up(&self, _conn: &mut ()) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_versions_are_sorted_numerically() {
        let set = MigrationSet::<()>::new()
            .with("20200201", Noop)
            .unwrap()
            .with("999", Noop)
            .unwrap()
            .with("20200101", Noop)
            .unwrap();

        assert_eq!(
            set.versions(),
            vec![Version::new(999), Version::new(20200101), Version::new(20200201)]
        );
        let newest_first: Vec<_> = set.iter().rev().map(|(v, _)| v).collect();
        assert_eq!(newest_first[0], Version::new(20200201));
    }

    #[test]
    fn test_rejects_bad_and_duplicate_keys() {
        let mut set = MigrationSet::<()>::new();
        assert!(matches!(
            set.insert("create_users", Noop),
            Err(MigrationError::InvalidVersion(_))
        ));
        set.insert("1", Noop).unwrap();
        assert!(matches!(
            set.insert("01", Noop),
            Err(MigrationError::DuplicateVersion(_))
        ));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_retain_versions() {
        let mut set = MigrationSet::<()>::new()
            .with("1", Noop)
            .unwrap()
            .with("2", Noop)
            .unwrap()
            .with("3", Noop)
            .unwrap();

        assert!(matches!(
            set.retain_versions(&[Version::new(4)]),
            Err(MigrationError::UnknownTag(_))
        ));
        assert_eq!(set.len(), 3);

        set.retain_versions(&[Version::new(3), Version::new(1)]).unwrap();
        assert_eq!(set.versions(), vec![Version::new(1), Version::new(3)]);
    }

    #[tokio::test]
    async fn test_default_down_is_noop() {
        assert!(apply::<()>(&Noop, Method::Down, &mut ()).await.is_ok());
    }
}
