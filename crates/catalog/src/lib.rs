//! Table/column metadata keyed by stable integer identifiers.
//!
//! The scheduler reads column types and primary-key indices from here when
//! building exchange schemas and materialize nodes; it never mutates catalog
//! state. Catalog persistence and DDL handling live outside this crate.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use arrow_schema::{DataType, Field};
use serde::{Deserialize, Serialize};
use wave_common::{Result, WaveError};

/// Stable table identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable column identifier within a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnId(pub i32);

/// One column definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnCatalog {
    pub id: ColumnId,
    pub name: String,
    pub data_type: DataType,
    /// Hidden columns (e.g. the implicit row id) are excluded from user-facing
    /// schemas unless explicitly requested.
    pub is_hidden: bool,
}

impl ColumnCatalog {
    /// Wire-schema field for this column.
    pub fn to_field(&self) -> Field {
        Field::new(self.name.clone(), self.data_type.clone(), true)
    }
}

/// One table definition with its primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCatalog {
    pub id: TableId,
    pub name: String,
    columns: Vec<ColumnCatalog>,
    primary_key_indices: Vec<usize>,
}

impl TableCatalog {
    pub fn new(
        id: TableId,
        name: impl Into<String>,
        columns: Vec<ColumnCatalog>,
        primary_key_indices: Vec<usize>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
            primary_key_indices,
        }
    }

    pub fn get_column_by_id(&self, id: ColumnId) -> Result<&ColumnCatalog> {
        self.columns
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| WaveError::Planning(format!("unknown column id {} in table '{}'", id.0, self.name)))
    }

    pub fn get_column_by_name(&self, name: &str) -> Result<&ColumnCatalog> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| WaveError::Planning(format!("unknown column '{name}' in table '{}'", self.name)))
    }

    /// Ordered positions of the primary-key columns.
    pub fn get_primary_key_indices(&self) -> &[usize] {
        &self.primary_key_indices
    }

    /// All columns in declaration order, optionally including hidden ones.
    pub fn get_all_columns(&self, include_hidden: bool) -> Vec<&ColumnCatalog> {
        self.columns
            .iter()
            .filter(|c| include_hidden || !c.is_hidden)
            .collect()
    }

    /// Wire-schema fields for the visible columns.
    pub fn visible_fields(&self) -> Vec<Field> {
        self.get_all_columns(false)
            .into_iter()
            .map(|c| c.to_field())
            .collect()
    }
}

/// In-memory catalog snapshot.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<TableId, TableCatalog>,
    table_ids_by_name: HashMap<String, TableId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&mut self, table: TableCatalog) {
        self.table_ids_by_name.insert(table.name.clone(), table.id);
        self.tables.insert(table.id, table);
    }

    pub fn drop_table(&mut self, id: TableId) -> Result<()> {
        let table = self
            .tables
            .remove(&id)
            .ok_or_else(|| WaveError::Planning(format!("unknown table id {id}")))?;
        self.table_ids_by_name.remove(&table.name);
        Ok(())
    }

    pub fn get(&self, id: TableId) -> Result<&TableCatalog> {
        self.tables
            .get(&id)
            .ok_or_else(|| WaveError::Planning(format!("unknown table id {id}")))
    }

    pub fn get_by_name(&self, name: &str) -> Result<&TableCatalog> {
        let id = self
            .table_ids_by_name
            .get(name)
            .ok_or_else(|| WaveError::Planning(format!("unknown table: {name}")))?;
        self.get(*id)
    }
}

/// Shared read handle over the catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogReader(Arc<RwLock<Catalog>>);

impl CatalogReader {
    pub fn new(catalog: Catalog) -> Self {
        Self(Arc::new(RwLock::new(catalog)))
    }

    pub fn read<T>(&self, f: impl FnOnce(&Catalog) -> Result<T>) -> Result<T> {
        let guard = self
            .0
            .read()
            .map_err(|_| WaveError::Internal("catalog lock poisoned".to_string()))?;
        f(&guard)
    }

    /// Write access is reserved for catalog-change observers; the scheduler
    /// itself only reads.
    pub fn write<T>(&self, f: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        let mut guard = self
            .0
            .write()
            .map_err(|_| WaveError::Internal("catalog lock poisoned".to_string()))?;
        f(&mut guard)
    }
}
