use crate::error::{EdiError, Result};
use crate::value::{ColumnFlags, TypeTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level schema document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub tables: BTreeMap<String, TableDefinition>,
}

/// Definition of a single table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub columns: Vec<ColumnDefinition>,
    /// Index name to column name
    #[serde(default)]
    pub indexes: BTreeMap<String, String>,
}

/// Definition of a single column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub auto_inc: bool,
    #[serde(default)]
    pub key: bool,
    /// Create an implicit `<table>_<column>` index
    #[serde(default)]
    pub index: bool,
}

impl ColumnDefinition {
    /// Column options as stored by providers. `INDEX` comes from indexes,
    /// not from the column itself.
    pub fn flags(&self) -> ColumnFlags {
        let mut flags = ColumnFlags::empty();
        flags.set(ColumnFlags::NOT_NULL, self.not_null);
        flags.set(ColumnFlags::AUTO_INC, self.auto_inc);
        flags.set(ColumnFlags::KEY, self.key);
        flags
    }
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Explicit indexes plus the implicit ones from `index: true` columns.
    pub fn all_indexes(&self, table: &str) -> BTreeMap<String, String> {
        let mut indexes = self.indexes.clone();
        for column in self.columns.iter().filter(|c| c.index) {
            if !indexes.values().any(|c| *c == column.name) {
                indexes.insert(format!("{table}_{}", column.name), column.name.clone());
            }
        }
        indexes
    }
}

impl SchemaDefinition {
    /// Check the schema is self-consistent.
    pub fn validate(&self) -> Result<()> {
        for (table, def) in &self.tables {
            if def.columns.is_empty() {
                return Err(EdiError::BadSchema(format!("table '{table}' has no columns")));
            }
            let mut seen = Vec::new();
            for column in &def.columns {
                if column.name.is_empty() || seen.contains(&column.name.as_str()) {
                    return Err(EdiError::BadSchema(format!(
                        "table '{table}' has an empty or duplicate column '{}'",
                        column.name
                    )));
                }
                seen.push(column.name.as_str());
            }
            if def.columns.iter().filter(|c| c.key).count() > 1 {
                return Err(EdiError::BadSchema(format!(
                    "table '{table}' declares more than one key column"
                )));
            }
            for (index, column) in &def.indexes {
                if def.column(column).is_none() {
                    return Err(EdiError::BadSchema(format!(
                        "index '{index}' on table '{table}' names unknown column '{column}'"
                    )));
                }
            }
        }
        Ok(())
    }
}
