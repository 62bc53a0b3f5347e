mod convenience;

use crate::error::{EdiError, Result};
use crate::provider::{Backend, ColumnSchema, Persist, Provider};
use crate::record::{Grid, Record};
use crate::schema::SchemaDefinition;
use crate::service::Service;
use crate::value::{ColumnFlags, Field, TypeTag};
use bitflags::bitflags;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

bitflags! {
    /// Options a database is opened with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DbFlags: u32 {
        /// Create the database if it does not exist.
        const CREATE = 0x1;
        /// Persist after every successful mutation.
        const AUTO_SAVE = 0x2;
        /// Temporarily disable `AUTO_SAVE`.
        const SUPPRESS_SAVE = 0x4;
    }
}

bitflags! {
    /// Per-call options for field and record writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SetFlags: u32 {
        /// Skip the auto-save for this call.
        const NOSAVE = 0x1;
    }
}

pub(crate) struct DatabaseInner {
    service: Arc<Service>,
    provider: Arc<dyn Provider>,
    path: String,
    flags: AtomicU32,
    backend: RwLock<Option<Box<dyn Backend>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let backend = self
            .backend
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(backend) = backend {
            if let Err(e) = backend.close() {
                log::warn!("Failed to close database '{}': {}", self.path, e);
            }
        }
    }
}

/// An open database: one provider instance bound to its flags.
///
/// Cloning is cheap and every clone refers to the same open instance.
/// Records and grids read through a handle point back at it weakly.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("provider", &self.provider_name())
            .field("path", &self.inner.path)
            .field("flags", &self.db_flags())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Database {
    pub(crate) fn new(
        service: Arc<Service>,
        provider: Arc<dyn Provider>,
        path: &str,
        flags: DbFlags,
        backend: Box<dyn Backend>,
    ) -> Self {
        Database {
            inner: Arc::new(DatabaseInner {
                service,
                provider,
                path: path.to_string(),
                flags: AtomicU32::new(flags.bits()),
                backend: RwLock::new(Some(backend)),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<DatabaseInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<DatabaseInner>) -> Option<Database> {
        weak.upgrade().map(|inner| Database { inner })
    }

    pub fn provider_name(&self) -> &str {
        self.inner.provider.name()
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn db_flags(&self) -> DbFlags {
        DbFlags::from_bits_truncate(self.inner.flags.load(Ordering::SeqCst))
    }

    pub fn set_db_flags(&self, flags: DbFlags) {
        self.inner.flags.store(flags.bits(), Ordering::SeqCst);
    }

    /// Suppress auto-save until the returned guard is dropped.
    pub fn suppress_save(&self) -> SuppressSave<'_> {
        let previous = self
            .inner
            .flags
            .fetch_or(DbFlags::SUPPRESS_SAVE.bits(), Ordering::SeqCst);
        SuppressSave {
            db: self,
            was_set: previous & DbFlags::SUPPRESS_SAVE.bits() != 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Release the provider instance. Unsaved changes are discarded, and every
    /// clone of this handle fails with `Closed` afterwards.
    pub fn close(&self) -> Result<()> {
        let backend = self
            .inner
            .backend
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EdiError::Closed)?;
        log::debug!("Closing '{}' database at '{}'", self.provider_name(), self.path());
        backend.close()
    }

    /// Remove this database's persisted storage. The handle stays open.
    pub fn delete(&self) -> Result<()> {
        log::debug!("Deleting '{}' database at '{}'", self.provider_name(), self.path());
        self.inner.provider.delete(&self.inner.path)
    }

    fn with_backend<T>(&self, f: impl FnOnce(&dyn Backend) -> Result<T>) -> Result<T> {
        let guard = self
            .inner
            .backend
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let backend = guard.as_deref().ok_or(EdiError::Closed)?;
        f(backend)
    }

    fn persist(&self, flags: SetFlags) -> Persist {
        Persist::from_flags(self.db_flags(), flags)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    pub fn load(&self, path: &str) -> Result<()> {
        log::debug!("Loading '{}' database from '{path}'", self.provider_name());
        self.with_backend(|b| b.load(path))
    }

    pub fn save(&self) -> Result<()> {
        self.with_backend(|b| b.save())
    }

    // ── Schema ──────────────────────────────────────────────────────

    pub fn add_table(&self, table: &str) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.add_table(table, persist))
    }

    pub fn remove_table(&self, table: &str) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.remove_table(table, persist))
    }

    pub fn rename_table(&self, table: &str, new_name: &str) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.rename_table(table, new_name, persist))
    }

    pub fn add_column(
        &self,
        table: &str,
        column: &str,
        ty: TypeTag,
        flags: ColumnFlags,
    ) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.add_column(table, column, ty, flags, persist))
    }

    pub fn remove_column(&self, table: &str, column: &str) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.remove_column(table, column, persist))
    }

    pub fn change_column(
        &self,
        table: &str,
        column: &str,
        ty: TypeTag,
        flags: ColumnFlags,
    ) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.change_column(table, column, ty, flags, persist))
    }

    pub fn rename_column(&self, table: &str, column: &str, new_name: &str) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.rename_column(table, column, new_name, persist))
    }

    pub fn add_index(&self, table: &str, column: &str, index: &str) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.add_index(table, column, index, persist))
    }

    pub fn remove_index(&self, table: &str, index: &str) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.remove_index(table, index, persist))
    }

    /// Create the tables, columns and indexes `schema` declares that are
    /// missing from this database.
    pub fn apply_schema(&self, schema: &SchemaDefinition) -> Result<()> {
        schema.apply(self)
    }

    pub fn get_tables(&self) -> Result<Vec<String>> {
        self.with_backend(|b| b.get_tables())
    }

    pub fn get_columns(&self, table: &str) -> Result<Vec<String>> {
        self.with_backend(|b| b.get_columns(table))
    }

    pub fn get_schema(&self, table: &str, column: &str) -> Result<ColumnSchema> {
        self.with_backend(|b| b.get_schema(table, column))
    }

    pub fn lookup_field(&self, table: &str, field: &str) -> Result<usize> {
        self.with_backend(|b| b.lookup_field(table, field))
    }

    // ── Data ────────────────────────────────────────────────────────

    /// A blank, unsaved record with one null field per column of `table`.
    pub fn create_rec(&self, table: &str) -> Result<Record> {
        let fields = self.with_backend(|b| {
            b.get_columns(table)?
                .iter()
                .map(|column| {
                    let schema = b.get_schema(table, column)?;
                    Ok(Field::new(schema.name, schema.ty, schema.flags))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        let mut record = Record::new(table, "", fields);
        record.attach(self);
        Ok(record)
    }

    pub fn get_rec(&self, table: &str, key: &str) -> Result<Record> {
        let mut record = self.with_backend(|b| b.get_rec(table, key))?;
        record.attach(self);
        Ok(record)
    }

    pub fn get_all(&self, table: &str) -> Result<Grid> {
        let mut grid = self.with_backend(|b| b.get_all(table))?;
        grid.attach(self);
        Ok(grid)
    }

    pub fn get_field(&self, table: &str, key: &str, field: &str) -> Result<Field> {
        self.with_backend(|b| b.get_field(table, key, field))
    }

    pub fn set_field(
        &self,
        table: &str,
        key: &str,
        field: &str,
        value: &str,
        flags: SetFlags,
    ) -> Result<()> {
        let persist = self.persist(flags);
        self.with_backend(|b| b.set_field(table, key, field, value, persist))
    }

    /// Write named field values to the row with `key`, creating it when
    /// missing. Returns the row's key, generated when `key` is `None`.
    pub fn set_rec(
        &self,
        table: &str,
        key: Option<&str>,
        params: &HashMap<String, String>,
        flags: SetFlags,
    ) -> Result<String> {
        let persist = self.persist(flags);
        self.with_backend(|b| b.set_rec(table, key, params, persist))
    }

    /// Validate `record` and write it back, inserting it when it has no key
    /// yet. The record's id is updated to the stored key.
    pub fn update_rec(&self, record: &mut Record) -> Result<()> {
        if !self.validate_record(record) {
            return Err(EdiError::Validation(record.errors().to_vec()));
        }
        let key = if record.id().is_empty() {
            record
                .fields()
                .iter()
                .find(|f| f.flags().contains(ColumnFlags::KEY) && !f.is_null())
                .map(Field::to_text)
        } else {
            Some(record.id().to_string())
        };
        let id = self.set_rec(
            record.table(),
            key.as_deref(),
            &record.to_params(),
            SetFlags::empty(),
        )?;
        record.set_id(id);
        record.attach(self);
        Ok(())
    }

    pub fn delete_row(&self, table: &str, key: &str) -> Result<()> {
        let persist = self.persist(SetFlags::empty());
        self.with_backend(|b| b.delete_row(table, key, persist))
    }

    pub fn query(&self, command: &str) -> Result<Grid> {
        let mut grid = self.with_backend(|b| b.query(command))?;
        grid.attach(self);
        Ok(grid)
    }

    /// Run the validators registered with the service this database was
    /// opened through.
    pub fn validate_record(&self, record: &mut Record) -> bool {
        self.inner.service.validate_record(record)
    }
}

/// Guard returned by [`Database::suppress_save`].
pub struct SuppressSave<'a> {
    db: &'a Database,
    was_set: bool,
}

impl Drop for SuppressSave<'_> {
    fn drop(&mut self) {
        if !self.was_set {
            self.db
                .inner
                .flags
                .fetch_and(!DbFlags::SUPPRESS_SAVE.bits(), Ordering::SeqCst);
        }
    }
}
