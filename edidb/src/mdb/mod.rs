//! The built-in `mdb` provider: tables held in memory, optionally persisted
//! as one JSON document.
//!
//! A path of `""` or `":memory:"` opens a memory-only database. Any other
//! path names the JSON file; it is rewritten atomically on every save.

mod query;
mod table;

use crate::database::DbFlags;
use crate::error::{EdiError, Result};
use crate::provider::{Backend, ColumnSchema, Persist, Provider};
use crate::record::{Grid, Record};
use crate::value::{ColumnFlags, TypeTag};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use table::{MemDatabase, MemTable};
use tempfile::NamedTempFile;

pub const MDB_NAME: &str = "mdb";

fn is_memory(path: &str) -> bool {
    path.is_empty() || path == ":memory:"
}

/// Factory for [`MdbBackend`] instances, registered as `"mdb"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MdbProvider;

impl Provider for MdbProvider {
    fn name(&self) -> &str {
        MDB_NAME
    }

    fn open(&self, path: &str, flags: DbFlags) -> Result<Box<dyn Backend>> {
        if is_memory(path) {
            return Ok(Box::new(MdbBackend::in_memory()));
        }
        let file = PathBuf::from(path);
        let db = if file.exists() {
            read_file(&file)?
        } else if flags.contains(DbFlags::CREATE) {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let db = MemDatabase::default();
            write_file(&file, &db)?;
            log::debug!("Created mdb database {}", file.display());
            db
        } else {
            return Err(EdiError::Open(format!("'{path}' does not exist")));
        };
        Ok(Box::new(MdbBackend {
            path: Some(file),
            db: RwLock::new(db),
        }))
    }

    fn delete(&self, path: &str) -> Result<()> {
        if is_memory(path) {
            return Ok(());
        }
        let file = Path::new(path);
        if !file.exists() {
            return Err(EdiError::NotFound(format!("database '{path}'")));
        }
        std::fs::remove_file(file)?;
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<MemDatabase> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(MemDatabase::default());
    }
    let db: MemDatabase = serde_json::from_str(&text)?;
    db.check_shape()?;
    Ok(db)
}

/// Write to a temp file beside `path`, then rename over it.
fn write_file(path: &Path, db: &MemDatabase) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(db)?)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| EdiError::Io(e.error))?;
    Ok(())
}

/// An open `mdb` database.
///
/// One lock covers every table. Reads share it; a mutation holds it
/// exclusively through its save, and the pre-mutation state is restored if
/// that save fails.
pub struct MdbBackend {
    path: Option<PathBuf>,
    db: RwLock<MemDatabase>,
}

impl MdbBackend {
    pub fn in_memory() -> Self {
        MdbBackend {
            path: None,
            db: RwLock::new(MemDatabase::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MemDatabase> {
        self.db.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<T>(
        &self,
        persist: Persist,
        f: impl FnOnce(&mut MemDatabase) -> Result<T>,
    ) -> Result<T> {
        let mut db = self.db.write().unwrap_or_else(PoisonError::into_inner);
        let target = match persist {
            Persist::Now => self.path.as_deref(),
            Persist::Defer => None,
        };
        let snapshot = target.map(|_| db.clone());
        let out = f(&mut *db)?;
        if let (Some(path), Some(snapshot)) = (target, snapshot) {
            if let Err(e) = write_file(path, &*db) {
                log::warn!("Failed to save {}, rolling back: {}", path.display(), e);
                *db = snapshot;
                return Err(e);
            }
        }
        Ok(out)
    }

    fn mutate_table<T>(
        &self,
        table: &str,
        persist: Persist,
        f: impl FnOnce(&mut MemTable) -> Result<T>,
    ) -> Result<T> {
        self.mutate(persist, |db| f(db.table_mut(table)?))
    }
}

impl Backend for MdbBackend {
    fn close(self: Box<Self>) -> Result<()> {
        if let Some(path) = &self.path {
            log::debug!("Closed mdb database {}", path.display());
        }
        Ok(())
    }

    /// Replace the contents with the database stored at `path`. Saves keep
    /// going to the path this backend was opened with.
    fn load(&self, path: &str) -> Result<()> {
        let loaded = read_file(Path::new(path))?;
        *self.db.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => {
                log::debug!("Saving mdb database {}", path.display());
                write_file(path, &self.read())
            }
            None => Ok(()),
        }
    }

    fn add_table(&self, table: &str, persist: Persist) -> Result<()> {
        self.mutate(persist, |db| {
            if table.is_empty() || db.tables.contains_key(table) {
                return Err(EdiError::BadSchema(format!("cannot add table '{table}'")));
            }
            db.tables.insert(table.to_string(), MemTable::default());
            Ok(())
        })
    }

    fn remove_table(&self, table: &str, persist: Persist) -> Result<()> {
        self.mutate(persist, |db| {
            db.tables
                .remove(table)
                .map(|_| ())
                .ok_or_else(|| EdiError::table_not_found(table))
        })
    }

    fn rename_table(&self, table: &str, new_name: &str, persist: Persist) -> Result<()> {
        self.mutate(persist, |db| {
            if new_name.is_empty() || db.tables.contains_key(new_name) {
                return Err(EdiError::BadSchema(format!(
                    "cannot rename table '{table}' to '{new_name}'"
                )));
            }
            let t = db
                .tables
                .remove(table)
                .ok_or_else(|| EdiError::table_not_found(table))?;
            db.tables.insert(new_name.to_string(), t);
            Ok(())
        })
    }

    fn add_column(
        &self,
        table: &str,
        column: &str,
        ty: TypeTag,
        flags: ColumnFlags,
        persist: Persist,
    ) -> Result<()> {
        self.mutate_table(table, persist, |t| t.add_column(table, column, ty, flags))
    }

    fn remove_column(&self, table: &str, column: &str, persist: Persist) -> Result<()> {
        self.mutate_table(table, persist, |t| t.remove_column(table, column))
    }

    fn change_column(
        &self,
        table: &str,
        column: &str,
        ty: TypeTag,
        flags: ColumnFlags,
        persist: Persist,
    ) -> Result<()> {
        self.mutate_table(table, persist, |t| t.change_column(table, column, ty, flags))
    }

    fn rename_column(
        &self,
        table: &str,
        column: &str,
        new_name: &str,
        persist: Persist,
    ) -> Result<()> {
        self.mutate_table(table, persist, |t| t.rename_column(table, column, new_name))
    }

    fn add_index(&self, table: &str, column: &str, index: &str, persist: Persist) -> Result<()> {
        self.mutate_table(table, persist, |t| t.add_index(table, column, index))
    }

    fn remove_index(&self, table: &str, index: &str, persist: Persist) -> Result<()> {
        self.mutate_table(table, persist, |t| t.remove_index(table, index))
    }

    fn get_tables(&self) -> Result<Vec<String>> {
        Ok(self.read().tables.keys().cloned().collect())
    }

    fn get_columns(&self, table: &str) -> Result<Vec<String>> {
        let db = self.read();
        Ok(db.table(table)?.columns.iter().map(|c| c.name.clone()).collect())
    }

    fn get_schema(&self, table: &str, column: &str) -> Result<ColumnSchema> {
        self.read().table(table)?.schema(table, column)
    }

    fn lookup_field(&self, table: &str, field: &str) -> Result<usize> {
        self.read()
            .table(table)?
            .column_index(field)
            .ok_or_else(|| EdiError::column_not_found(table, field))
    }

    fn get_rec(&self, table: &str, key: &str) -> Result<Record> {
        self.read().table(table)?.get_rec(table, key)
    }

    fn get_all(&self, table: &str) -> Result<Grid> {
        self.read().table(table)?.get_all(table)
    }

    fn set_field(
        &self,
        table: &str,
        key: &str,
        field: &str,
        value: &str,
        persist: Persist,
    ) -> Result<()> {
        self.mutate_table(table, persist, |t| t.set_field(table, key, field, value))
    }

    fn set_rec(
        &self,
        table: &str,
        key: Option<&str>,
        params: &HashMap<String, String>,
        persist: Persist,
    ) -> Result<String> {
        self.mutate_table(table, persist, |t| t.set_rec(table, key, params))
    }

    fn delete_row(&self, table: &str, key: &str, persist: Persist) -> Result<()> {
        self.mutate_table(table, persist, |t| t.delete_row(table, key))
    }

    fn query(&self, command: &str) -> Result<Grid> {
        query::run(&self.read(), command)
    }
}
