//! Storage provider contract.
//!
//! A [`Provider`] is registered by name and opens [`Backend`] instances; a
//! backend is the live engine bound to one [`Database`](crate::Database).
//! Backends own their locking: reads must not block each other, and a
//! mutation together with any persistence it triggers must appear atomic.

use crate::database::{DbFlags, SetFlags};
use crate::error::{EdiError, Result};
use crate::record::{Grid, Record};
use crate::value::{ColumnFlags, Field, TypeTag};
use std::collections::HashMap;

/// Whether a mutation must be durably persisted before it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    Now,
    Defer,
}

impl Persist {
    /// Auto-save applies unless suppressed on the database or skipped for this call.
    pub fn from_flags(db: DbFlags, set: SetFlags) -> Self {
        if db.contains(DbFlags::AUTO_SAVE)
            && !db.contains(DbFlags::SUPPRESS_SAVE)
            && !set.contains(SetFlags::NOSAVE)
        {
            Persist::Now
        } else {
            Persist::Defer
        }
    }
}

/// Declared type and options of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub ty: TypeTag,
    pub flags: ColumnFlags,
}

/// A storage engine factory, registered with the service under `name()`.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Open (or with `DbFlags::CREATE`, create) the database at `path`.
    fn open(&self, path: &str, flags: DbFlags) -> Result<Box<dyn Backend>>;

    /// Remove the persisted storage at `path` entirely.
    fn delete(&self, path: &str) -> Result<()>;
}

/// An opened provider instance.
pub trait Backend: Send + Sync {
    /// Release the instance. Unsaved changes are discarded.
    fn close(self: Box<Self>) -> Result<()>;

    /// Replace the in-memory contents with the database stored at `path`.
    fn load(&self, path: &str) -> Result<()>;

    fn save(&self) -> Result<()>;

    // Schema mutation

    fn add_table(&self, table: &str, persist: Persist) -> Result<()>;

    fn remove_table(&self, table: &str, persist: Persist) -> Result<()>;

    fn rename_table(&self, table: &str, new_name: &str, persist: Persist) -> Result<()>;

    fn add_column(
        &self,
        table: &str,
        column: &str,
        ty: TypeTag,
        flags: ColumnFlags,
        persist: Persist,
    ) -> Result<()>;

    fn remove_column(&self, table: &str, column: &str, persist: Persist) -> Result<()>;

    fn change_column(
        &self,
        table: &str,
        column: &str,
        ty: TypeTag,
        flags: ColumnFlags,
        persist: Persist,
    ) -> Result<()>;

    fn rename_column(
        &self,
        table: &str,
        column: &str,
        new_name: &str,
        persist: Persist,
    ) -> Result<()>;

    fn add_index(&self, table: &str, column: &str, index: &str, persist: Persist) -> Result<()>;

    fn remove_index(&self, table: &str, index: &str, persist: Persist) -> Result<()>;

    // Schema introspection

    fn get_tables(&self) -> Result<Vec<String>>;

    fn get_columns(&self, table: &str) -> Result<Vec<String>>;

    fn get_schema(&self, table: &str, column: &str) -> Result<ColumnSchema>;

    /// Position of a column within the table's records.
    fn lookup_field(&self, table: &str, field: &str) -> Result<usize> {
        self.get_columns(table)?
            .iter()
            .position(|c| c == field)
            .ok_or_else(|| EdiError::column_not_found(table, field))
    }

    // Data access

    fn get_rec(&self, table: &str, key: &str) -> Result<Record>;

    /// Every row of the table; an empty table yields an empty grid.
    fn get_all(&self, table: &str) -> Result<Grid>;

    fn get_field(&self, table: &str, key: &str, field: &str) -> Result<Field> {
        let record = self.get_rec(table, key)?;
        record
            .field(field)
            .cloned()
            .ok_or_else(|| EdiError::column_not_found(table, field))
    }

    fn set_field(
        &self,
        table: &str,
        key: &str,
        field: &str,
        value: &str,
        persist: Persist,
    ) -> Result<()>;

    /// Set named fields on the row with `key`, creating the row when it does
    /// not exist. With no key the backend generates one if the table allows
    /// it. Returns the row's key.
    fn set_rec(
        &self,
        table: &str,
        key: Option<&str>,
        params: &HashMap<String, String>,
        persist: Persist,
    ) -> Result<String>;

    fn delete_row(&self, table: &str, key: &str, persist: Persist) -> Result<()>;

    /// Run a backend-defined query.
    fn query(&self, command: &str) -> Result<Grid>;
}
