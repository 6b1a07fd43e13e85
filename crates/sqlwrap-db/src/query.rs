//! SQL for model finders, and a query-backed page source.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use sqlwrap_paginator::PageSource;

use crate::error::DbError;
use crate::registry::{Registry, ResolvedModel};
use crate::schema::{quote_ident, TableSchema};

/// Runs a SELECT page by page.
///
/// The total comes from `SELECT COUNT(*) FROM (sql)` and each page from
/// `sql LIMIT ? OFFSET ?`. Rows are mapped through `map`.
///
/// ```
/// use rusqlite::Connection;
/// use sqlwrap_db::QuerySource;
/// use sqlwrap_paginator::Paginator;
///
/// let conn = Connection::open_in_memory().unwrap();
/// conn.execute_batch("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2), (3);").unwrap();
///
/// let source = QuerySource::new(&conn, "SELECT n FROM t ORDER BY n", Vec::new(), |row| row.get::<_, i64>(0));
/// let page = Paginator::new(source, 2, 2).unwrap();
/// assert_eq!(page.items().unwrap(), vec![3]);
/// ```
pub struct QuerySource<'c, T> {
    conn: &'c Connection,
    sql: String,
    params: Vec<Value>,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
}

impl<'c, T> QuerySource<'c, T> {
    /// Wraps a SELECT statement and its positional parameters.
    pub fn new(
        conn: &'c Connection,
        sql: impl Into<String>,
        params: Vec<Value>,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Self {
        Self {
            conn,
            sql: sql.into(),
            params,
            map,
        }
    }

    /// The wrapped statement.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl<T> Clone for QuerySource<'_, T> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn,
            sql: self.sql.clone(),
            params: self.params.clone(),
            map: self.map,
        }
    }
}

impl<T> std::fmt::Debug for QuerySource<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySource")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<T> PageSource for QuerySource<'_, T> {
    type Item = T;
    type Error = DbError;

    fn total(&self) -> Result<u64, DbError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM ({})", self.sql),
            params_from_iter(self.params.iter()),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn slice(&self, offset: u64, limit: u64) -> Result<Vec<T>, DbError> {
        let mut params = self.params.clone();
        params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        params.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

        let mut stmt = self
            .conn
            .prepare(&format!("{} LIMIT ? OFFSET ?", self.sql))?;
        let rows = stmt.query_map(params_from_iter(params.iter()), self.map)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Resolves a model's columns to the tables of its chain.
pub(crate) struct ModelTables<'r> {
    pub(crate) model: &'r ResolvedModel,
    pub(crate) tables: Vec<&'r TableSchema>,
    identities: Vec<String>,
}

impl<'r> ModelTables<'r> {
    /// Looks up a concrete model by name.
    pub(crate) fn resolve(registry: &'r Registry, name: &str) -> Result<Self, DbError> {
        let model = registry
            .model(name)
            .filter(|m| !m.is_abstract())
            .ok_or_else(|| DbError::UnknownModel(name.to_string()))?;

        let tables = model
            .tables
            .iter()
            .map(|t| {
                registry
                    .table(t)
                    .ok_or_else(|| DbError::UnknownModel(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Subclasses only see rows carrying their own discriminator values.
        let identities = if model.polymorphic_on.is_some() && !model.ancestors.is_empty() {
            registry.identities(name)
        } else {
            Vec::new()
        };

        Ok(Self {
            model,
            tables,
            identities,
        })
    }

    pub(crate) fn root(&self) -> &'r TableSchema {
        self.tables[0]
    }

    /// The first table of the chain holding `column`.
    pub(crate) fn table_of(&self, column: &str) -> Result<&'r TableSchema, DbError> {
        self.tables
            .iter()
            .copied()
            .find(|t| t.has_column(column))
            .ok_or_else(|| DbError::UnknownColumn {
                model: self.model.name.clone(),
                column: column.to_string(),
            })
    }

    /// `"table"."column"`.
    pub(crate) fn qualified(&self, column: &str) -> Result<String, DbError> {
        let table = self.table_of(column)?;
        Ok(format!("{}.{}", quote_ident(&table.name), quote_ident(column)))
    }

    /// `FROM root JOIN child ON …` across the chain.
    fn from_clause(&self) -> String {
        let mut sql = format!("FROM {}", quote_ident(&self.root().name));
        for table in self.tables.iter().skip(1) {
            let Some(fk) = &table.foreign_key else {
                continue;
            };
            let on = fk
                .columns
                .iter()
                .zip(&fk.parent_columns)
                .map(|(child, parent)| {
                    format!(
                        "{}.{} = {}.{}",
                        quote_ident(&table.name),
                        quote_ident(child),
                        quote_ident(&fk.parent_table),
                        quote_ident(parent)
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" JOIN {} ON {}", quote_ident(&table.name), on));
        }
        sql
    }

    /// `WHERE …` for `column = value` filters plus the discriminator.
    fn where_clause(&self, filters: &[(&str, Value)]) -> Result<(String, Vec<Value>), DbError> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        for (column, value) in filters {
            let qualified = self.qualified(column)?;
            if *value == Value::Null {
                conditions.push(format!("{qualified} IS NULL"));
            } else {
                conditions.push(format!("{qualified} = ?"));
                params.push(value.clone());
            }
        }

        if let (Some(column), false) = (&self.model.polymorphic_on, self.identities.is_empty()) {
            let placeholders = vec!["?"; self.identities.len()].join(", ");
            conditions.push(format!("{} IN ({placeholders})", self.qualified(column)?));
            params.extend(self.identities.iter().cloned().map(Value::Text));
        }

        if conditions.is_empty() {
            return Ok((String::new(), params));
        }
        Ok((format!(" WHERE {}", conditions.join(" AND ")), params))
    }

    fn order_clause(&self) -> String {
        let root = self.root();
        let keys: Vec<String> = root
            .primary_key()
            .into_iter()
            .map(|k| format!("{}.{}", quote_ident(&root.name), quote_ident(k)))
            .collect();
        format!(" ORDER BY {}", keys.join(", "))
    }

    /// SELECT of every model column, filtered and ordered by the root key.
    pub(crate) fn select(&self, filters: &[(&str, Value)]) -> Result<(String, Vec<Value>), DbError> {
        let columns = self
            .model
            .columns
            .iter()
            .map(|c| Ok(format!("{} AS {}", self.qualified(&c.name)?, quote_ident(&c.name))))
            .collect::<Result<Vec<_>, DbError>>()?;

        let (where_clause, params) = self.where_clause(filters)?;
        let sql = format!(
            "SELECT {} {}{}{}",
            columns.join(", "),
            self.from_clause(),
            where_clause,
            self.order_clause()
        );
        Ok((sql, params))
    }

    /// SELECT of the root primary key for every matching row.
    pub(crate) fn select_keys(
        &self,
        filters: &[(&str, Value)],
    ) -> Result<(String, Vec<Value>), DbError> {
        let root = self.root();
        let keys = root
            .primary_key()
            .into_iter()
            .map(|k| format!("{}.{}", quote_ident(&root.name), quote_ident(k)))
            .collect::<Vec<_>>()
            .join(", ");
        let (where_clause, params) = self.where_clause(filters)?;
        Ok((
            format!("SELECT {keys} {}{}{}", self.from_clause(), where_clause, self.order_clause()),
            params,
        ))
    }
}
