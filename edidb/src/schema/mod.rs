mod parser;
mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use types::{ColumnDefinition, SchemaDefinition, TableDefinition};

use crate::database::{Database, SetFlags};
use crate::error::{EdiError, Result};
use crate::provider::Persist;
use crate::value::ColumnFlags;

impl SchemaDefinition {
    /// Create whatever `db` is missing: tables, then their columns in
    /// declared order, then indexes. Existing columns are left as they are.
    ///
    /// The changes are written with a single save at the end when the
    /// database auto-saves. Conflicts with the live schema that can be seen
    /// up front (a key column that cannot be added) fail before anything
    /// changes. If the provider rejects a step later on, the steps before it
    /// stay in memory unsaved; call [`Database::load`] or reopen to drop them.
    pub fn apply(&self, db: &Database) -> Result<()> {
        self.validate()?;
        self.check_live(db)?;
        {
            let _quiet = db.suppress_save();
            let existing = db.get_tables()?;
            for (table, def) in &self.tables {
                if !existing.contains(table) {
                    log::debug!("Creating table '{table}'");
                    db.add_table(table)?;
                }

                let columns = db.get_columns(table)?;
                let mut indexed = Vec::new();
                for column in &columns {
                    if db.get_schema(table, column)?.flags.contains(ColumnFlags::INDEX) {
                        indexed.push(column.clone());
                    }
                }
                for column in def.columns.iter().filter(|c| !columns.contains(&c.name)) {
                    db.add_column(table, &column.name, column.ty, column.flags())?;
                }

                for (index, column) in def.all_indexes(table) {
                    if !indexed.contains(&column) {
                        db.add_index(table, &column, &index)?;
                    }
                }
            }
        }

        if Persist::from_flags(db.db_flags(), SetFlags::empty()) == Persist::Now {
            db.save()?;
        }
        Ok(())
    }

    /// Fail if a declared key column is missing from a table that already
    /// has a key column or holds rows.
    fn check_live(&self, db: &Database) -> Result<()> {
        let existing = db.get_tables()?;
        for (table, def) in self.tables.iter().filter(|(t, _)| existing.contains(t)) {
            let columns = db.get_columns(table)?;
            let Some(key) = def
                .columns
                .iter()
                .find(|c| c.key && !columns.contains(&c.name))
            else {
                continue;
            };
            let mut has_key = false;
            for column in &columns {
                has_key |= db.get_schema(table, column)?.flags.contains(ColumnFlags::KEY);
            }
            if has_key || !db.get_all(table)?.is_empty() {
                return Err(EdiError::BadSchema(format!(
                    "cannot add key column '{}' to existing table '{table}'",
                    key.name
                )));
            }
        }
        Ok(())
    }
}
