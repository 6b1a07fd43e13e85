//! SQLite database layer for sqlwrap.
//!
//! Wraps a pooled SQLite engine together with a registry of declarative
//! models, sessions over pooled connections, and revision-script
//! migrations.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: file databases run in WAL mode so readers
//!   and the single writer do not block each other. `sqlite://` opens a
//!   shared-cache in-memory database visible to every pooled connection.
//! - **`r2d2` connection pool**: sessions check a connection out for their
//!   lifetime and return it on drop.
//! - **Declarative models**: table names are derived from model names
//!   (`UserTestCase` becomes `user_test_cases`) unless declared. A subclass
//!   declaring its own primary key gets a joined table; one without gets
//!   single-table inheritance on its parent's table.
//! - **Revision scripts**: migrations are plain `.sql` files in one folder,
//!   linked by parent id into a single line from base to head.
//!
//! # Example
//!
//! ```
//! use sqlwrap_db::{Column, Database, ModelDecl};
//! use sqlwrap_types::ColumnType;
//!
//! let db = Database::connect("sqlite://").unwrap();
//! let model = db
//!     .register_decl(
//!         ModelDecl::new("BlogPost")
//!             .column(Column::id("id"))
//!             .column(Column::new("title", ColumnType::Text).not_null()),
//!     )
//!     .unwrap();
//! assert_eq!(model.table(), Some("blog_posts"));
//! db.create_all().unwrap();
//! ```

mod database;
mod error;
mod migrations;
pub mod naming;
mod pool;
mod query;
mod registry;
mod schema;
mod scoped;
mod session;
mod transaction;
mod url;

pub use database::Database;
pub use error::{DbError, SchemaError};
pub use migrations::{MigrationError, Migrations, Revision, DEFAULT_MIGRATIONS_PATH};
pub use pool::{create_pool, DbPool, DbSettings, PoolError};
pub use query::QuerySource;
pub use registry::{Registry, ResolvedModel};
pub use schema::{Column, ForeignKey, Mixin, ModelDecl, TableSchema};
pub use scoped::ScopedSession;
pub use session::{Attr, Model, Session};
pub use transaction::TestTransaction;
pub use url::{parse_sqlite_url, SqliteTarget, UrlParts};

pub use rusqlite::types::Value;
