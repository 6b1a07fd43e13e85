//! Model registry: resolves declarations into tables.

use sqlwrap_types::TableStrategy;

use crate::error::SchemaError;
use crate::naming::{self, DeclKind, NameSource, TableDecision};
use crate::schema::{Column, ForeignKey, ModelDecl, TableSchema};

/// A registered model and the tables it maps onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Model name.
    pub name: String,
    /// How the model maps onto tables.
    pub strategy: TableStrategy,
    /// Tables holding the model's rows, root first. Joined models list
    /// every table of the chain; abstract models list none.
    pub tables: Vec<String>,
    /// Every column readable on the model, in table-chain order.
    pub columns: Vec<Column>,
    /// Ancestor model names, nearest first.
    pub ancestors: Vec<String>,
    /// Discriminator column, inherited from the nearest ancestor declaring one.
    pub polymorphic_on: Option<String>,
    /// Discriminator value for this model.
    pub polymorphic_identity: Option<String>,
    decl: ModelDecl,
}

impl ResolvedModel {
    /// The declaration the model was registered with.
    pub fn declaration(&self) -> &ModelDecl {
        &self.decl
    }

    /// The table holding the model's own columns.
    pub fn table(&self) -> Option<&str> {
        self.strategy.table()
    }

    /// Primary key column names.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// `true` for abstract models.
    pub fn is_abstract(&self) -> bool {
        self.strategy == TableStrategy::Abstract
    }
}

/// Registered models and tables, in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    models: Vec<ResolvedModel>,
    tables: Vec<TableSchema>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model. Its parent must already be registered.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` for duplicate names, unknown parents, and
    /// models that would create a table without a primary key.
    pub fn register(&mut self, decl: ModelDecl) -> Result<&ResolvedModel, SchemaError> {
        if self.model(&decl.name).is_some() {
            return Err(SchemaError::DuplicateModel(decl.name));
        }

        let ancestors: Vec<ResolvedModel> = self
            .ancestors_of(&decl)?
            .into_iter()
            .cloned()
            .collect();
        let contributed = contributed_columns(&decl, &ancestors);
        let parent = ancestors.first();
        let polymorphic_on = decl
            .polymorphic_on
            .clone()
            .or_else(|| parent.and_then(|p| p.polymorphic_on.clone()));
        let ancestor_names = ancestors.iter().map(|a| a.name.clone()).collect();

        if decl.is_abstract {
            tracing::debug!(model = %decl.name, "registered abstract model");
            let model = ResolvedModel {
                name: decl.name.clone(),
                strategy: TableStrategy::Abstract,
                tables: Vec::new(),
                columns: inherited_columns(parent, contributed),
                ancestors: ancestor_names,
                polymorphic_on,
                polymorphic_identity: decl.polymorphic_identity.clone(),
                decl,
            };
            return Ok(self.push_model(model));
        }

        let order = name_sources(&decl, &ancestors);
        let table_name = naming::resolve_table_name(&decl.name, false, &order)
            .unwrap_or_else(|| naming::table_name_for(&decl.name));

        let concrete_parent = ancestors.iter().find(|a| !a.is_abstract());
        let parent_table = concrete_parent.and_then(ResolvedModel::table);

        let strategy = naming::decide_table(
            TableDecision {
                table_name: &table_name,
                declares_primary_key: contributed.iter().any(|c| c.primary_key),
                parent_table,
            },
            |name| self.table(name).is_some(),
        );

        let tables = match &strategy {
            TableStrategy::Own { table } => {
                if let Some(existing) = self.table_mut(table) {
                    existing.merge_columns(contributed.clone());
                } else {
                    if !contributed.iter().any(|c| c.primary_key) {
                        return Err(SchemaError::MissingPrimaryKey {
                            model: decl.name,
                            table: table.clone(),
                        });
                    }
                    self.tables
                        .push(TableSchema::new(table.clone(), contributed.clone()));
                }
                vec![table.clone()]
            }
            TableStrategy::Joined {
                table,
                parent_table,
            } => {
                let parent_key = self
                    .table(parent_table)
                    .map(|t| t.primary_key().into_iter().map(str::to_string).collect())
                    .unwrap_or_default();
                let mut schema = TableSchema::new(table.clone(), contributed.clone());
                schema.foreign_key = Some(ForeignKey {
                    columns: schema.primary_key().into_iter().map(str::to_string).collect(),
                    parent_table: parent_table.clone(),
                    parent_columns: parent_key,
                });
                self.tables.push(schema);

                let mut chain = concrete_parent.map(|p| p.tables.clone()).unwrap_or_default();
                chain.push(table.clone());
                chain
            }
            TableStrategy::SingleTable { table } => {
                if let Some(shared) = self.table_mut(table) {
                    shared.merge_columns(contributed.clone());
                }
                concrete_parent
                    .map(|p| p.tables.clone())
                    .unwrap_or_else(|| vec![table.clone()])
            }
            TableStrategy::Abstract => Vec::new(),
        };

        tracing::debug!(
            model = %decl.name,
            strategy = ?strategy,
            "registered model"
        );

        let columns = match &strategy {
            TableStrategy::Own { .. } => contributed,
            _ => inherited_columns(concrete_parent.or(parent), contributed),
        };

        let model = ResolvedModel {
            name: decl.name.clone(),
            strategy,
            tables,
            columns,
            ancestors: ancestor_names,
            polymorphic_on,
            polymorphic_identity: decl.polymorphic_identity.clone(),
            decl,
        };
        Ok(self.push_model(model))
    }

    /// Looks up a registered model.
    pub fn model(&self, name: &str) -> Option<&ResolvedModel> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Registered models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &ResolvedModel> {
        self.models.iter()
    }

    /// Looks up a table.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables in creation order. Parents always precede joined children.
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Discriminator values that identify rows of `name`: its own identity
    /// and those of every registered descendant.
    pub fn identities(&self, name: &str) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| m.name == name || m.ancestors.iter().any(|a| a == name))
            .filter_map(|m| m.polymorphic_identity.clone())
            .collect()
    }

    fn table_mut(&mut self, name: &str) -> Option<&mut TableSchema> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    fn push_model(&mut self, model: ResolvedModel) -> &ResolvedModel {
        self.models.push(model);
        let last = self.models.len() - 1;
        &self.models[last]
    }

    /// Ancestors of a declaration, nearest first.
    fn ancestors_of(&self, decl: &ModelDecl) -> Result<Vec<&ResolvedModel>, SchemaError> {
        let Some(parent_name) = &decl.parent else {
            return Ok(Vec::new());
        };
        let parent = self
            .model(parent_name)
            .ok_or_else(|| SchemaError::UnknownParent {
                model: decl.name.clone(),
                parent: parent_name.clone(),
            })?;

        let mut ancestors = vec![parent];
        ancestors.extend(parent.ancestors.iter().filter_map(|name| self.model(name)));
        Ok(ancestors)
    }
}

/// Builds the naming resolution order: the model, its mixins, then each
/// ancestor followed by its mixins.
fn name_sources<'a>(decl: &'a ModelDecl, ancestors: &'a [ResolvedModel]) -> Vec<NameSource<'a>> {
    let mut order = vec![NameSource {
        kind: DeclKind::Model,
        table_name: decl.table_name.as_deref(),
    }];
    order.extend(mixin_sources(decl));

    for ancestor in ancestors {
        let (kind, table_name) = match &ancestor.strategy {
            TableStrategy::Abstract => (
                DeclKind::AbstractAncestor,
                ancestor.decl.table_name.as_deref(),
            ),
            // Single-table models do not keep a name of their own.
            TableStrategy::SingleTable { .. } => (DeclKind::ConcreteAncestor, None),
            TableStrategy::Own { table } | TableStrategy::Joined { table, .. } => {
                (DeclKind::ConcreteAncestor, Some(table.as_str()))
            }
        };
        order.push(NameSource { kind, table_name });
        order.extend(mixin_sources(&ancestor.decl));
    }
    order
}

fn mixin_sources(decl: &ModelDecl) -> impl Iterator<Item = NameSource<'_>> {
    decl.mixins.iter().map(|mixin| NameSource {
        kind: DeclKind::Mixin,
        table_name: mixin.table_name.as_deref(),
    })
}

/// Columns a model adds to its table: its own and its mixins', plus those
/// of abstract ancestors up to the first concrete ancestor.
fn contributed_columns(decl: &ModelDecl, ancestors: &[ResolvedModel]) -> Vec<Column> {
    let mut columns = decl.all_columns();
    for ancestor in ancestors.iter().take_while(|a| a.is_abstract()) {
        for column in ancestor.decl.all_columns() {
            if !columns.iter().any(|c| c.name == column.name) {
                columns.push(column);
            }
        }
    }
    columns
}

/// Parent columns followed by new columns. Names already present on the
/// parent are not repeated.
fn inherited_columns(parent: Option<&ResolvedModel>, contributed: Vec<Column>) -> Vec<Column> {
    let Some(parent) = parent else {
        return contributed;
    };
    let mut columns = parent.columns.clone();
    for column in contributed {
        if !columns.iter().any(|c| c.name == column.name) {
            columns.push(column);
        }
    }
    columns
}
