//! The database handle: pool, model registry, and session factory.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::DbError;
use crate::pool::{create_pool, DbPool, DbSettings};
use crate::registry::{Registry, ResolvedModel};
use crate::scoped::ScopedSession;
use crate::schema::{ModelDecl, TableSchema};
use crate::session::{Model, Session};
use crate::transaction::TestTransaction;
use crate::url::{parse_sqlite_url, UrlParts};

/// A connected database with its registered models.
///
/// Cloning is cheap; clones share the pool, the registry, and the scoped
/// sessions.
///
/// ```
/// use sqlwrap_db::Database;
///
/// let db = Database::connect("sqlite://").unwrap();
/// assert_eq!(db.to_string(), "<Database('sqlite://')>");
/// ```
#[derive(Clone)]
pub struct Database {
    url: String,
    pool: DbPool,
    registry: Arc<RwLock<Registry>>,
    scoped: Arc<ScopedSession>,
}

impl Database {
    /// Connects with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns `DbError::UnsupportedDialect` for non-SQLite URLs and
    /// `DbError::Pool` if the pool cannot be built.
    pub fn connect(url: &str) -> Result<Self, DbError> {
        Self::connect_with(url, DbSettings::default())
    }

    /// Connects with explicit pool settings.
    pub fn connect_with(url: &str, settings: DbSettings) -> Result<Self, DbError> {
        let target = parse_sqlite_url(url)?;
        let pool = create_pool(&target, settings)?;
        let registry = Arc::new(RwLock::new(Registry::new()));
        let scoped = Arc::new(ScopedSession::new(pool.clone(), Arc::clone(&registry)));

        tracing::info!(url, "connected to database");
        Ok(Self {
            url: url.to_string(),
            pool,
            registry,
            scoped,
        })
    }

    /// Connects to the URL composed from `parts`.
    pub fn from_parts(parts: &UrlParts, settings: DbSettings) -> Result<Self, DbError> {
        Self::connect_with(&parts.to_url(), settings)
    }

    /// The URL this database was opened with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Registers a model type.
    pub fn register<M: Model>(&self) -> Result<ResolvedModel, DbError> {
        self.register_decl(M::declaration())
    }

    /// Registers a model from its declaration.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Schema` if the declaration is inconsistent with
    /// the models registered so far.
    pub fn register_decl(&self, decl: ModelDecl) -> Result<ResolvedModel, DbError> {
        let mut registry = self.write_registry()?;
        Ok(registry.register(decl)?.clone())
    }

    /// Looks up a registered model.
    pub fn model(&self, name: &str) -> Result<ResolvedModel, DbError> {
        self.read_registry()?
            .model(name)
            .cloned()
            .ok_or_else(|| DbError::UnknownModel(name.to_string()))
    }

    /// Registered tables in creation order.
    pub fn tables(&self) -> Result<Vec<TableSchema>, DbError> {
        Ok(self.read_registry()?.tables().to_vec())
    }

    /// Creates every registered table that does not exist yet.
    pub fn create_all(&self) -> Result<(), DbError> {
        let tables = self.tables()?;
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        for table in &tables {
            tracing::debug!(table = %table.name, "creating table");
            tx.execute_batch(&table.create_sql())?;
        }
        tx.commit()?;
        tracing::info!(tables = tables.len(), "created tables");
        Ok(())
    }

    /// Drops every registered table, children first.
    pub fn drop_all(&self) -> Result<(), DbError> {
        let tables = self.tables()?;
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        for table in tables.iter().rev() {
            tracing::debug!(table = %table.name, "dropping table");
            tx.execute_batch(&table.drop_sql())?;
        }
        tx.commit()?;
        tracing::info!(tables = tables.len(), "dropped tables");
        Ok(())
    }

    /// The thread-scoped sessions.
    pub fn session(&self) -> &ScopedSession {
        &self.scoped
    }

    /// A new session not tied to the calling thread.
    pub fn new_session(&self) -> Result<Session, DbError> {
        Ok(Session::new(self.pool.get()?, Arc::clone(&self.registry)))
    }

    /// Starts a transaction that is rolled back when closed or dropped.
    pub fn test_transaction(&self, savepoint: bool) -> Result<TestTransaction, DbError> {
        TestTransaction::begin(&self.pool, Arc::clone(&self.registry), savepoint)
    }

    fn read_registry(&self) -> Result<RwLockReadGuard<'_, Registry>, DbError> {
        self.registry.read().map_err(|_| DbError::RegistryPoisoned)
    }

    fn write_registry(&self) -> Result<RwLockWriteGuard<'_, Registry>, DbError> {
        self.registry.write().map_err(|_| DbError::RegistryPoisoned)
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Database('{}')>", self.url)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("url", &self.url)
            .field("scoped", &self.scoped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use sqlwrap_types::ColumnType;

    use super::*;
    use crate::schema::Column;

    #[test]
    fn connects_from_parts() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("parts.db");
        let parts = UrlParts {
            name: Some(path.display().to_string()),
            ..UrlParts::default()
        };
        let db = Database::from_parts(&parts, DbSettings::default()).expect("should build from parts");
        assert!(db.url().starts_with("sqlite:///"));
        db.pool().get().expect("should check out connection");
        assert!(path.exists());
    }

    #[test]
    fn rejects_server_dialects() {
        let err = Database::connect("postgresql://localhost/app").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedDialect(_)));
    }

    #[test]
    fn create_and_drop_all() {
        let db = Database::connect("sqlite://").expect("should open database");
        db.register_decl(ModelDecl::new("Person").column(Column::id("id")))
            .expect("should register model");
        db.register_decl(
            ModelDecl::new("Engineer")
                .parent("Person")
                .column(Column::id("id"))
                .column(Column::new("language", ColumnType::Text)),
        )
        .expect("should register model");

        db.create_all().expect("should create tables");
        db.create_all().expect("should create tables");

        let conn = db.pool().get().expect("should check out connection");
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .expect("should prepare")
            .query_map([], |r| r.get(0))
            .expect("should query map")
            .collect::<Result<_, _>>()
            .expect("should collect");
        assert_eq!(tables, vec!["engineers", "people"]);
        drop(conn);

        db.drop_all().expect("should drop tables");
        let remaining: i64 = db
            .pool()
            .get()
            .expect("should check out connection")
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'", [], |r| {
                r.get(0)
            })
            .expect("should query row");
        assert_eq!(remaining, 0);
    }

    #[test]
    fn unknown_model_lookup() {
        let db = Database::connect("sqlite://").expect("should open database");
        assert!(matches!(db.model("Ghost"), Err(DbError::UnknownModel(_))));
    }
}
