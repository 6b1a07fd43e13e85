//! Test transactions that roll everything back.

use std::sync::{Arc, RwLock};

use crate::error::DbError;
use crate::pool::DbPool;
use crate::registry::Registry;
use crate::session::{Session, TEST_SAVEPOINT};

/// A session inside an outer transaction that is always rolled back.
///
/// With `savepoint` set, the session works inside a savepoint that is
/// restarted after every commit or rollback, so code under test can call
/// [`Session::rollback`] without discarding earlier work of the test.
/// Without it, commits are no-ops and a rollback discards everything.
///
/// ```
/// use sqlwrap_db::Database;
///
/// let db = Database::connect("sqlite://").unwrap();
/// {
///     let tt = db.test_transaction(false).unwrap();
///     tt.session().execute_batch("CREATE TABLE t (n INTEGER)").unwrap();
///     tt.session().commit().unwrap();
/// }
/// let conn = db.pool().get().unwrap();
/// let exists: bool = conn
///     .query_row("SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 't')", [], |r| r.get(0))
///     .unwrap();
/// assert!(!exists);
/// ```
#[derive(Debug)]
pub struct TestTransaction {
    session: Session,
    closed: bool,
}

impl TestTransaction {
    pub(crate) fn begin(
        pool: &DbPool,
        registry: Arc<RwLock<Registry>>,
        savepoint: bool,
    ) -> Result<Self, DbError> {
        let conn = pool.get()?;
        conn.execute_batch("BEGIN")?;
        if savepoint {
            conn.execute_batch(&format!("SAVEPOINT {TEST_SAVEPOINT};"))?;
        }
        tracing::debug!(savepoint, "started test transaction");

        Ok(Self {
            session: Session::external(conn, registry, savepoint),
            closed: false,
        })
    }

    /// The session bound to the outer transaction.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Rolls back everything and returns the connection to the pool.
    pub fn close(mut self) -> Result<(), DbError> {
        self.closed = true;
        rollback_all(&self.session)
    }
}

impl Drop for TestTransaction {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = rollback_all(&self.session) {
            tracing::warn!(error = %e, "failed to roll back test transaction");
        }
    }
}

fn rollback_all(session: &Session) -> Result<(), DbError> {
    if session.in_transaction() {
        session.connection().execute_batch("ROLLBACK")?;
    }
    tracing::debug!("rolled back test transaction");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbSettings};
    use crate::url::SqliteTarget;

    fn setup() -> (tempfile::TempDir, DbPool, Arc<RwLock<Registry>>) {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let pool = create_pool(
            &SqliteTarget::File(dir.path().join("tt.db")),
            DbSettings::default(),
        )
        .expect("should create pool");
        pool.get()
            .expect("should check out connection")
            .execute_batch("CREATE TABLE t (n INTEGER)")
            .expect("should execute batch");
        (dir, pool, Arc::new(RwLock::new(Registry::new())))
    }

    fn count(session: &Session) -> i64 {
        session
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .expect("should query row")
    }

    #[test]
    fn everything_is_rolled_back_on_close() {
        let (_dir, pool, registry) = setup();
        let tt = TestTransaction::begin(&pool, registry, false).expect("should begin transaction");
        tt.session().execute("INSERT INTO t (n) VALUES (1)", []).expect("should execute statement");
        tt.session().commit().expect("should commit");
        assert_eq!(count(tt.session()), 1);
        tt.close().expect("should close transaction");

        let n: i64 = pool
            .get()
            .expect("should check out connection")
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .expect("should query row");
        assert_eq!(n, 0);
    }

    #[test]
    fn savepoint_keeps_committed_work_across_rollbacks() {
        let (_dir, pool, registry) = setup();
        let tt = TestTransaction::begin(&pool, registry, true).expect("should begin transaction");
        let session = tt.session();

        session.execute("INSERT INTO t (n) VALUES (1)", []).expect("should execute statement");
        session.commit().expect("should commit");
        session.execute("INSERT INTO t (n) VALUES (2)", []).expect("should execute statement");
        session.rollback().expect("should roll back");
        assert_eq!(count(session), 1);

        session.execute("INSERT INTO t (n) VALUES (3)", []).expect("should execute statement");
        session.rollback().expect("should roll back");
        assert_eq!(count(session), 1);
    }

    #[test]
    fn rollback_without_savepoint_discards_everything() {
        let (_dir, pool, registry) = setup();
        let tt = TestTransaction::begin(&pool, registry, false).expect("should begin transaction");
        tt.session().execute("INSERT INTO t (n) VALUES (1)", []).expect("should execute statement");
        tt.session().rollback().expect("should roll back");
        assert_eq!(count(tt.session()), 0);
        assert!(tt.session().in_transaction());
    }

    #[test]
    fn drop_rolls_back() {
        let (_dir, pool, registry) = setup();
        {
            let tt = TestTransaction::begin(&pool, registry, true).expect("should begin transaction");
            tt.session().execute("INSERT INTO t (n) VALUES (1)", []).expect("should execute statement");
        }
        let n: i64 = pool
            .get()
            .expect("should check out connection")
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .expect("should query row");
        assert_eq!(n, 0);
    }
}
