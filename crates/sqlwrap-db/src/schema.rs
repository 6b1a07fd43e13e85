//! Declarative model metadata and table DDL.

use serde::{Deserialize, Serialize};
use sqlwrap_types::ColumnType;

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub column_type: ColumnType,
    /// Part of the primary key.
    pub primary_key: bool,
    /// Accepts NULL.
    pub nullable: bool,
    /// Carries a UNIQUE constraint.
    pub unique: bool,
    /// SQL default expression, emitted verbatim.
    pub default: Option<String>,
}

impl Column {
    /// A nullable column with no constraints.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            nullable: true,
            unique: false,
            default: None,
        }
    }

    /// An `INTEGER PRIMARY KEY` column.
    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer).primary_key()
    }

    /// Marks the column as (part of) the primary key. Implies NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Marks the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Adds a UNIQUE constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets a default expression such as `0` or `CURRENT_TIMESTAMP`.
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    fn definition(&self, inline_primary_key: bool) -> String {
        let mut def = format!("{} {}", quote_ident(&self.name), self.column_type.sql_type());
        if inline_primary_key {
            def.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if self.unique {
            def.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }
}

/// A reusable bundle of columns, optionally naming a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mixin {
    /// Mixin name, for diagnostics.
    pub name: String,
    /// Table name declared by the mixin.
    pub table_name: Option<String>,
    /// Columns contributed by the mixin.
    pub columns: Vec<Column>,
}

impl Mixin {
    /// Creates an empty mixin.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares a table name.
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Adds a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }
}

/// Everything a model declares about itself.
///
/// ```
/// use sqlwrap_db::{Column, ModelDecl};
/// use sqlwrap_types::ColumnType;
///
/// let decl = ModelDecl::new("Engineer")
///     .parent("Person")
///     .column(Column::new("language", ColumnType::Text));
/// assert_eq!(decl.parent.as_deref(), Some("Person"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelDecl {
    /// Model name, used for table naming.
    pub name: String,
    /// Explicit table name.
    pub table_name: Option<String>,
    /// Abstract models contribute columns to their children but get no table.
    pub is_abstract: bool,
    /// Name of the registered parent model.
    pub parent: Option<String>,
    /// Mixins, in resolution order.
    pub mixins: Vec<Mixin>,
    /// Columns declared directly on the model.
    pub columns: Vec<Column>,
    /// Discriminator column for polymorphic hierarchies.
    pub polymorphic_on: Option<String>,
    /// Value stored in the discriminator column for this model.
    pub polymorphic_identity: Option<String>,
}

impl ModelDecl {
    /// Starts a declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares an explicit table name.
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Marks the model abstract.
    pub fn abstract_model(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Sets the parent model.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Adds a mixin.
    pub fn mixin(mut self, mixin: Mixin) -> Self {
        self.mixins.push(mixin);
        self
    }

    /// Adds a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the discriminator column.
    pub fn polymorphic_on(mut self, column: impl Into<String>) -> Self {
        self.polymorphic_on = Some(column.into());
        self
    }

    /// Sets the discriminator value identifying this model.
    pub fn polymorphic_identity(mut self, identity: impl Into<String>) -> Self {
        self.polymorphic_identity = Some(identity.into());
        self
    }

    /// Columns declared on the model and its mixins. Own columns win over
    /// mixin columns of the same name.
    pub(crate) fn all_columns(&self) -> Vec<Column> {
        let mut columns = self.columns.clone();
        for mixin in &self.mixins {
            for column in &mixin.columns {
                if !columns.iter().any(|c| c.name == column.name) {
                    columns.push(column.clone());
                }
            }
        }
        columns
    }
}

/// A foreign key from a joined child table to its parent table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referencing columns in this table.
    pub columns: Vec<String>,
    /// Referenced table.
    pub parent_table: String,
    /// Referenced columns in the parent table.
    pub parent_columns: Vec<String>,
}

/// A physical table, possibly shared by several models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Parent link for joined-table inheritance.
    pub foreign_key: Option<ForeignKey>,
}

impl TableSchema {
    /// Creates a table with the given columns.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            foreign_key: None,
        }
    }

    /// Primary key column names.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// `true` if the table has a column named `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Adds columns from a model sharing this table. Columns that already
    /// exist are kept; new ones become nullable, since rows of other models
    /// never set them.
    pub(crate) fn merge_columns(&mut self, columns: impl IntoIterator<Item = Column>) {
        for mut column in columns {
            if self.has_column(&column.name) {
                continue;
            }
            column.primary_key = false;
            column.nullable = true;
            self.columns.push(column);
        }
    }

    /// Returns the `CREATE TABLE IF NOT EXISTS` statement.
    ///
    /// ```
    /// use sqlwrap_db::{Column, TableSchema};
    /// use sqlwrap_types::ColumnType;
    ///
    /// let table = TableSchema::new(
    ///     "notes",
    ///     vec![Column::id("id"), Column::new("body", ColumnType::Text).not_null()],
    /// );
    /// assert_eq!(
    ///     table.create_sql(),
    ///     "CREATE TABLE IF NOT EXISTS \"notes\" (\"id\" INTEGER PRIMARY KEY, \"body\" TEXT NOT NULL)"
    /// );
    /// ```
    pub fn create_sql(&self) -> String {
        let primary_key = self.primary_key();
        let inline = primary_key.len() == 1;

        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.definition(inline && c.primary_key))
            .collect();

        if primary_key.len() > 1 {
            parts.push(format!("PRIMARY KEY ({})", quote_list(&primary_key)));
        }
        if let Some(fk) = &self.foreign_key {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE",
                quote_list(&fk.columns),
                quote_ident(&fk.parent_table),
                quote_list(&fk.parent_columns),
            ));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            parts.join(", ")
        )
    }

    /// Returns the `DROP TABLE IF EXISTS` statement.
    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name))
    }
}

/// Quotes an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}
