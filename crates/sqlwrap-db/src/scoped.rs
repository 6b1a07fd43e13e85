//! Thread-scoped sessions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use crate::error::DbError;
use crate::pool::DbPool;
use crate::registry::Registry;
use crate::session::{Attr, Model, Session};

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Sessions of the current thread, keyed by scope id.
    static SESSIONS: RefCell<HashMap<u64, Slot>> = RefCell::new(HashMap::new());
}

/// One thread's session for one scope. Dropping the slot, on `remove` or
/// when the thread exits, releases it from the scope's count.
struct Slot {
    session: Rc<Session>,
    active: Arc<AtomicUsize>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hands every thread its own [`Session`], created on first use.
///
/// Nested calls from the same thread share that session, so work done
/// inside [`with`](ScopedSession::with) is visible to any helper it calls.
/// Call [`remove`](ScopedSession::remove) when a thread's unit of work ends
/// (for example at the end of a request) to release its connection.
pub struct ScopedSession {
    id: u64,
    pool: DbPool,
    registry: Arc<RwLock<Registry>>,
    active: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ScopedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSession")
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}

impl ScopedSession {
    pub(crate) fn new(pool: DbPool, registry: Arc<RwLock<Registry>>) -> Self {
        Self {
            id: NEXT_SCOPE.fetch_add(1, Ordering::Relaxed),
            pool,
            registry,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs `f` with the calling thread's session.
    ///
    /// The session is kept for the next call from the same thread, so
    /// uncommitted work stays pending between calls.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Checkout` if a new session needs a connection and
    /// none can be taken from the pool, or whatever `f` returns.
    pub fn with<T>(&self, f: impl FnOnce(&Session) -> Result<T, DbError>) -> Result<T, DbError> {
        let existing = SESSIONS.with(|sessions| {
            sessions
                .borrow()
                .get(&self.id)
                .map(|slot| Rc::clone(&slot.session))
        });
        let session = match existing {
            Some(session) => session,
            None => self.open()?,
        };
        f(&session)
    }

    /// Closes the calling thread's session, rolling back uncommitted work.
    ///
    /// Called from inside [`with`](ScopedSession::with), the session stays
    /// usable until the outermost call returns.
    pub fn remove(&self) {
        let slot = SESSIONS.with(|sessions| sessions.borrow_mut().remove(&self.id));
        if let Some(slot) = slot {
            tracing::debug!(thread = ?thread::current().id(), "closing scoped session");
            drop(slot);
        }
    }

    /// Number of threads currently holding a session.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// See [`Session::commit`].
    pub fn commit(&self) -> Result<(), DbError> {
        self.with(Session::commit)
    }

    /// See [`Session::rollback`].
    pub fn rollback(&self) -> Result<(), DbError> {
        self.with(Session::rollback)
    }

    /// See [`Session::all`].
    pub fn all<M: Model>(&self, filters: &[Attr<'_>]) -> Result<Vec<M>, DbError> {
        self.with(|s| s.all::<M>(filters))
    }

    /// See [`Session::first`].
    pub fn first<M: Model>(&self, filters: &[Attr<'_>]) -> Result<Option<M>, DbError> {
        self.with(|s| s.first::<M>(filters))
    }

    /// See [`Session::create`].
    pub fn create<M: Model>(&self, attrs: &[Attr<'_>]) -> Result<M, DbError> {
        self.with(|s| s.create::<M>(attrs))
    }

    /// See [`Session::first_or_create`].
    pub fn first_or_create<M: Model>(&self, attrs: &[Attr<'_>]) -> Result<M, DbError> {
        self.with(|s| s.first_or_create::<M>(attrs))
    }

    /// See [`Session::create_or_first`].
    pub fn create_or_first<M: Model>(&self, attrs: &[Attr<'_>]) -> Result<M, DbError> {
        self.with(|s| s.create_or_first::<M>(attrs))
    }

    fn open(&self) -> Result<Rc<Session>, DbError> {
        tracing::debug!(thread = ?thread::current().id(), "opening scoped session");
        let session = Rc::new(Session::new(self.pool.get()?, Arc::clone(&self.registry)));
        self.active.fetch_add(1, Ordering::SeqCst);
        let slot = Slot {
            session: Rc::clone(&session),
            active: Arc::clone(&self.active),
        };
        SESSIONS.with(|sessions| {
            sessions.borrow_mut().insert(self.id, slot);
        });
        Ok(session)
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        // Other threads drop their slots when they exit.
        let _ = SESSIONS.try_with(|sessions| sessions.borrow_mut().remove(&self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbSettings};
    use crate::url::SqliteTarget;

    fn scoped() -> (tempfile::TempDir, ScopedSession) {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let pool = create_pool(
            &SqliteTarget::File(dir.path().join("scoped.db")),
            DbSettings::default(),
        )
        .expect("should create pool");
        (dir, ScopedSession::new(pool, Arc::new(RwLock::new(Registry::new()))))
    }

    #[test]
    fn same_thread_reuses_its_session() {
        let (_dir, scoped) = scoped();
        scoped
            .with(|s| s.execute_batch("CREATE TABLE t (n INTEGER)"))
            .expect("should run in scoped session");
        let pending = scoped
            .with(|s| Ok(s.in_transaction()))
            .expect("should run in scoped session");
        assert!(pending);
        assert_eq!(scoped.active(), 1);

        scoped.commit().expect("should commit");
        let pending = scoped
            .with(|s| Ok(s.in_transaction()))
            .expect("should run in scoped session");
        assert!(!pending);
    }

    #[test]
    fn nested_calls_reuse_the_open_session() {
        let (_dir, scoped) = scoped();
        scoped
            .with(|outer| {
                outer.execute_batch("CREATE TABLE t (n INTEGER)")?;
                outer.execute("INSERT INTO t (n) VALUES (1)", [])?;
                let seen: i64 = scoped.with(|inner| {
                    assert!(std::ptr::eq(outer, inner));
                    inner.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
                })?;
                assert_eq!(seen, 1);
                scoped.commit()?;
                assert!(!outer.in_transaction());
                Ok(())
            })
            .expect("should run in scoped session");
        assert_eq!(scoped.active(), 1);
    }

    #[test]
    fn remove_inside_with_closes_after_the_outer_call() {
        let (_dir, scoped) = scoped();
        scoped
            .with(|s| {
                s.execute_batch("CREATE TABLE t (n INTEGER)")?;
                s.commit()
            })
            .expect("should run in scoped session");
        scoped
            .with(|s| {
                scoped.remove();
                s.execute("INSERT INTO t (n) VALUES (1)", [])
            })
            .expect("should run in scoped session");
        assert_eq!(scoped.active(), 0);

        let count: i64 = scoped
            .with(|s| s.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)))
            .expect("should run in scoped session");
        assert_eq!(count, 0);
    }

    #[test]
    fn threads_get_separate_sessions() {
        let (_dir, scoped) = scoped();
        let scoped = Arc::new(scoped);
        scoped
            .with(|s| {
                s.execute_batch("CREATE TABLE t (n INTEGER)")?;
                s.commit()
            })
            .expect("should run in scoped session");

        let other = Arc::clone(&scoped);
        thread::spawn(move || {
            other
                .with(|s| {
                    s.execute("INSERT INTO t (n) VALUES (1)", [])?;
                    s.commit()
                })
                .expect("should run in scoped session");
            assert_eq!(other.active(), 2);
            other.remove();
        })
        .join()
        .expect("should join thread");

        assert_eq!(scoped.active(), 1);
        let count: i64 = scoped
            .with(|s| s.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)))
            .expect("should run in scoped session");
        assert_eq!(count, 1);
    }

    #[test]
    fn remove_rolls_back_pending_work() {
        let (_dir, scoped) = scoped();
        scoped
            .with(|s| {
                s.execute_batch("CREATE TABLE t (n INTEGER)")?;
                s.commit()
            })
            .expect("should run in scoped session");
        scoped
            .with(|s| s.execute("INSERT INTO t (n) VALUES (1)", []))
            .expect("should run in scoped session");
        scoped.remove();
        assert_eq!(scoped.active(), 0);

        let count: i64 = scoped
            .with(|s| s.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)))
            .expect("should run in scoped session");
        assert_eq!(count, 0);
    }
}
