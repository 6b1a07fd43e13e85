//! Sessions: one pooled connection plus model finders.

use std::sync::{Arc, RwLock, RwLockReadGuard};

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Params, Row};
use sqlwrap_paginator::{Paginator, PageRef};

use crate::error::DbError;
use crate::query::{ModelTables, QuerySource};
use crate::registry::Registry;
use crate::schema::{quote_ident, ModelDecl};

/// A Rust type stored through a registered model.
///
/// ```
/// use rusqlite::Row;
/// use sqlwrap_db::{Column, Model, ModelDecl};
/// use sqlwrap_types::ColumnType;
///
/// struct Tag {
///     id: i64,
///     label: String,
/// }
///
/// impl Model for Tag {
///     fn declaration() -> ModelDecl {
///         ModelDecl::new("Tag")
///             .column(Column::id("id"))
///             .column(Column::new("label", ColumnType::Text).not_null().unique())
///     }
///
///     fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
///         Ok(Self { id: row.get("id")?, label: row.get("label")? })
///     }
/// }
/// ```
pub trait Model: Sized {
    /// The model's declaration. Its name identifies the model in the registry.
    fn declaration() -> ModelDecl;

    /// Builds a value from a row. Columns are available by name.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

fn model_name<M: Model>() -> String {
    M::declaration().name
}

/// A column filter or assignment.
pub type Attr<'a> = (&'a str, Value);

const CREATE_OR_FIRST: &str = "sqlwrap_create_or_first";
pub(crate) const TEST_SAVEPOINT: &str = "sqlwrap_test";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// The session owns its transactions.
    Owned,
    /// The session runs inside a transaction opened by someone else.
    External { savepoint: bool },
}

/// A unit of work over one pooled connection.
///
/// The first statement begins a transaction. Work is kept only after
/// [`commit`](Session::commit); dropping a session rolls back anything
/// still pending.
pub struct Session {
    conn: PooledConnection<SqliteConnectionManager>,
    registry: Arc<RwLock<Registry>>,
    mode: Mode,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        conn: PooledConnection<SqliteConnectionManager>,
        registry: Arc<RwLock<Registry>>,
    ) -> Self {
        Self {
            conn,
            registry,
            mode: Mode::Owned,
        }
    }

    /// A session bound to a transaction the caller manages.
    pub(crate) fn external(
        conn: PooledConnection<SqliteConnectionManager>,
        registry: Arc<RwLock<Registry>>,
        savepoint: bool,
    ) -> Self {
        Self {
            conn,
            registry,
            mode: Mode::External { savepoint },
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// `true` while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Begins a transaction unless one is already open.
    pub fn begin(&self) -> Result<(), DbError> {
        if self.mode == Mode::Owned && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Commits pending work.
    ///
    /// Inside a test transaction with a savepoint, the savepoint is released
    /// and restarted; without one, commit is a no-op.
    pub fn commit(&self) -> Result<(), DbError> {
        match self.mode {
            Mode::Owned if self.in_transaction() => self.conn.execute_batch("COMMIT")?,
            Mode::Owned => {}
            Mode::External { savepoint: true } => self.conn.execute_batch(&format!(
                "RELEASE SAVEPOINT {TEST_SAVEPOINT}; SAVEPOINT {TEST_SAVEPOINT};"
            ))?,
            Mode::External { savepoint: false } => {}
        }
        tracing::trace!("session committed");
        Ok(())
    }

    /// Discards pending work.
    pub fn rollback(&self) -> Result<(), DbError> {
        match self.mode {
            Mode::Owned if self.in_transaction() => self.conn.execute_batch("ROLLBACK")?,
            Mode::Owned => {}
            Mode::External { savepoint: true } => self
                .conn
                .execute_batch(&format!("ROLLBACK TO SAVEPOINT {TEST_SAVEPOINT};"))?,
            Mode::External { savepoint: false } => self.conn.execute_batch("ROLLBACK; BEGIN;")?,
        }
        tracing::trace!("session rolled back");
        Ok(())
    }

    /// Runs one statement and returns the number of changed rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, DbError> {
        self.begin()?;
        Ok(self.conn.execute(sql, params)?)
    }

    /// Runs several statements separated by semicolons.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.begin()?;
        Ok(self.conn.execute_batch(sql)?)
    }

    /// Runs a query expected to return one row.
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T, DbError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.begin()?;
        Ok(self.conn.query_row(sql, params, f)?)
    }

    /// Returns every row of `M` matching all `column = value` filters.
    pub fn all<M: Model>(&self, filters: &[Attr<'_>]) -> Result<Vec<M>, DbError> {
        let (sql, params) = self.select::<M>(filters)?;
        self.begin()?;
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), M::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns the first row of `M` matching the filters, by primary key.
    pub fn first<M: Model>(&self, filters: &[Attr<'_>]) -> Result<Option<M>, DbError> {
        let (sql, params) = self.select::<M>(filters)?;
        self.begin()?;
        let mut stmt = self.conn.prepare(&format!("{sql} LIMIT 1"))?;
        let mut rows = stmt.query_map(params_from_iter(params.iter()), M::from_row)?;
        Ok(rows.next().transpose()?)
    }

    /// Looks up a row of `M` by its single-column primary key.
    pub fn get<M: Model>(&self, key: impl Into<Value>) -> Result<Option<M>, DbError> {
        let name = model_name::<M>();
        let column = {
            let registry = self.read_registry()?;
            let plan = ModelTables::resolve(&registry, &name)?;
            let keys = plan.root().primary_key();
            match keys.as_slice() {
                [column] => column.to_string(),
                _ => return Err(DbError::CompositeKey(name)),
            }
        };
        self.first::<M>(&[(column.as_str(), key.into())])
    }

    /// Inserts a row of `M` and returns it as stored.
    ///
    /// Joined-table models insert into every table of their chain, root
    /// first. The discriminator is filled in when the model has one and
    /// `attrs` does not set it.
    pub fn create<M: Model>(&self, attrs: &[Attr<'_>]) -> Result<M, DbError> {
        self.begin()?;
        let key = {
            let registry = self.read_registry()?;
            let plan = ModelTables::resolve(&registry, &model_name::<M>())?;
            insert_rows(&self.conn, &plan, attrs)?
        };
        tracing::debug!(model = %model_name::<M>(), "created row");

        let filters: Vec<Attr<'_>> = key.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        self.first::<M>(&filters)?
            .ok_or(DbError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Returns the first match, creating it when none exists.
    pub fn first_or_create<M: Model>(&self, attrs: &[Attr<'_>]) -> Result<M, DbError> {
        if let Some(found) = self.first::<M>(attrs)? {
            return Ok(found);
        }
        self.create_or_first::<M>(attrs)
    }

    /// Tries to create a row. If that violates a constraint, the attempt is
    /// rolled back and the first match is returned instead.
    ///
    /// Only the failed insert is undone; earlier work in the transaction
    /// stays pending.
    pub fn create_or_first<M: Model>(&self, attrs: &[Attr<'_>]) -> Result<M, DbError> {
        self.begin()?;
        self.conn
            .execute_batch(&format!("SAVEPOINT {CREATE_OR_FIRST};"))?;

        match self.create::<M>(attrs) {
            Ok(created) => {
                self.conn
                    .execute_batch(&format!("RELEASE SAVEPOINT {CREATE_OR_FIRST};"))?;
                Ok(created)
            }
            Err(err) => {
                self.conn.execute_batch(&format!(
                    "ROLLBACK TO SAVEPOINT {CREATE_OR_FIRST}; RELEASE SAVEPOINT {CREATE_OR_FIRST};"
                ))?;
                if !err.is_constraint_violation() {
                    return Err(err);
                }
                tracing::debug!(model = %model_name::<M>(), "create failed, looking up existing row");
                self.first::<M>(attrs)?.map_or(Err(err), Ok)
            }
        }
    }

    /// Sets `changes` on every row of `M` matching `filters`. Returns the
    /// number of matched rows.
    pub fn update<M: Model>(
        &self,
        filters: &[Attr<'_>],
        changes: &[Attr<'_>],
    ) -> Result<usize, DbError> {
        let registry = self.read_registry()?;
        let plan = ModelTables::resolve(&registry, &model_name::<M>())?;
        for (column, _) in changes {
            plan.table_of(column)?;
        }
        let keys = self.key_rows(&plan, filters)?;

        for (index, table) in plan.tables.iter().enumerate() {
            let assignments: Vec<&Attr<'_>> = changes
                .iter()
                .filter(|(column, _)| {
                    plan.table_of(column)
                        .map(|t| t.name == table.name)
                        .unwrap_or(false)
                })
                .collect();
            if assignments.is_empty() {
                continue;
            }

            let set = assignments
                .iter()
                .map(|(column, _)| format!("{} = ?", quote_ident(column)))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {set} WHERE {}",
                quote_ident(&table.name),
                key_condition(&key_columns(&plan, index))
            );

            for key in &keys {
                let params = assignments
                    .iter()
                    .map(|(_, value)| value.clone())
                    .chain(key.iter().cloned());
                self.conn.execute(&sql, params_from_iter(params))?;
            }
        }
        Ok(keys.len())
    }

    /// Deletes every row of `M` matching `filters`. Rows of joined child
    /// tables go with their root row.
    pub fn delete<M: Model>(&self, filters: &[Attr<'_>]) -> Result<usize, DbError> {
        let registry = self.read_registry()?;
        let plan = ModelTables::resolve(&registry, &model_name::<M>())?;
        let keys = self.key_rows(&plan, filters)?;

        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(&plan.root().name),
            key_condition(&key_columns(&plan, 0))
        );
        for key in &keys {
            self.conn.execute(&sql, params_from_iter(key.iter()))?;
        }
        Ok(keys.len())
    }

    /// A page source over the rows of `M` matching `filters`.
    pub fn query<M: Model>(&self, filters: &[Attr<'_>]) -> Result<QuerySource<'_, M>, DbError> {
        let (sql, params) = self.select::<M>(filters)?;
        self.begin()?;
        Ok(QuerySource::new(&self.conn, sql, params, M::from_row))
    }

    /// Paginates the rows of `M` matching `filters`.
    pub fn paginate<M: Model>(
        &self,
        filters: &[Attr<'_>],
        page: impl Into<PageRef>,
        per_page: u64,
    ) -> Result<Paginator<QuerySource<'_, M>>, DbError> {
        Paginator::new(self.query::<M>(filters)?, page, per_page)
    }

    fn select<M: Model>(&self, filters: &[Attr<'_>]) -> Result<(String, Vec<Value>), DbError> {
        let registry = self.read_registry()?;
        ModelTables::resolve(&registry, &model_name::<M>())?.select(filters)
    }

    fn key_rows(&self, plan: &ModelTables<'_>, filters: &[Attr<'_>]) -> Result<Vec<Vec<Value>>, DbError> {
        let (sql, params) = plan.select_keys(filters)?;
        let width = plan.root().primary_key().len();
        self.begin()?;
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn read_registry(&self) -> Result<RwLockReadGuard<'_, Registry>, DbError> {
        self.registry.read().map_err(|_| DbError::RegistryPoisoned)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.mode == Mode::Owned && self.in_transaction() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "failed to roll back session on drop");
            }
        }
    }
}

/// Key columns of the `index`-th table of the chain. Child tables use their
/// foreign key columns, which line up with the root key.
fn key_columns(plan: &ModelTables<'_>, index: usize) -> Vec<String> {
    let table = plan.tables[index];
    match (&table.foreign_key, index) {
        (Some(fk), i) if i > 0 => fk.columns.clone(),
        _ => table.primary_key().into_iter().map(str::to_string).collect(),
    }
}

fn key_condition(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Inserts one row per table of the chain and returns the root key.
fn insert_rows(
    conn: &Connection,
    plan: &ModelTables<'_>,
    attrs: &[Attr<'_>],
) -> Result<Vec<(String, Value)>, DbError> {
    let mut values: Vec<(String, Value, String)> = Vec::with_capacity(attrs.len() + 1);
    for (column, value) in attrs {
        let table = plan.table_of(column)?;
        values.push((column.to_string(), value.clone(), table.name.clone()));
    }
    if let (Some(column), Some(identity)) = (
        &plan.model.polymorphic_on,
        &plan.model.polymorphic_identity,
    ) {
        if !values.iter().any(|(c, _, _)| c == column) {
            let table = plan.table_of(column)?;
            values.push((column.clone(), Value::Text(identity.clone()), table.name.clone()));
        }
    }

    let root = plan.root();
    let root_key: Vec<String> = root.primary_key().into_iter().map(str::to_string).collect();
    let mut key_values: Vec<Value> = Vec::new();

    for (index, table) in plan.tables.iter().enumerate() {
        let mut columns: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if index > 0 {
            for (column, value) in key_columns(plan, index).into_iter().zip(&key_values) {
                columns.push(column);
                params.push(value.clone());
            }
        }
        for (column, value, owner) in &values {
            if *owner == table.name && !columns.contains(column) {
                columns.push(column.clone());
                params.push(value.clone());
            }
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&table.name))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&table.name),
                columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        conn.execute(&sql, params_from_iter(params.iter()))?;

        if index == 0 {
            let select = format!(
                "SELECT {} FROM {} WHERE rowid = ?1",
                root_key.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
                quote_ident(&root.name)
            );
            key_values = conn.query_row(&select, [conn.last_insert_rowid()], |row| {
                (0..root_key.len())
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?;
        }
    }

    Ok(root_key.into_iter().zip(key_values).collect())
}
