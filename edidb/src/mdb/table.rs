use crate::error::{EdiError, Result};
use crate::provider::ColumnSchema;
use crate::record::{Grid, Record};
use crate::value::{parse_field_text, parse_value, ColumnFlags, Field, TypeTag, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The whole database as persisted to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct MemDatabase {
    #[serde(default)]
    pub tables: BTreeMap<String, MemTable>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct MemTable {
    #[serde(default)]
    pub columns: Vec<MemColumn>,
    /// Index name to column name.
    #[serde(default)]
    pub indexes: BTreeMap<String, String>,
    #[serde(default)]
    pub rows: Vec<Vec<Option<Value>>>,
    /// Last generated auto-increment key.
    #[serde(default)]
    pub next_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct MemColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
    #[serde(default)]
    pub flags: u32,
}

impl MemColumn {
    pub fn flags(&self) -> ColumnFlags {
        ColumnFlags::from_bits_truncate(self.flags)
    }

    fn schema(&self) -> ColumnSchema {
        ColumnSchema {
            name: self.name.clone(),
            ty: self.ty,
            flags: self.flags(),
        }
    }
}

impl MemDatabase {
    pub fn table(&self, name: &str) -> Result<&MemTable> {
        self.tables
            .get(name)
            .ok_or_else(|| EdiError::table_not_found(name))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut MemTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| EdiError::table_not_found(name))
    }

    /// Reject stored data the table operations cannot work with: duplicate
    /// or extra key columns, rows of the wrong width, values whose type is
    /// not their column's, and indexes on missing columns.
    pub fn check_shape(&self) -> Result<()> {
        for (name, table) in &self.tables {
            table
                .check_shape()
                .map_err(|problem| EdiError::Open(format!("table '{name}': {problem}")))?;
        }
        Ok(())
    }
}

impl MemTable {
    fn check_shape(&self) -> std::result::Result<(), String> {
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(format!("duplicate column '{}'", column.name));
            }
        }
        let keys = self
            .columns
            .iter()
            .filter(|c| c.flags().contains(ColumnFlags::KEY))
            .count();
        if keys > 1 {
            return Err(format!("{keys} key columns"));
        }
        let dangling = self
            .indexes
            .iter()
            .find(|(_, column)| self.column_index(column).is_none());
        if let Some((index, column)) = dangling {
            return Err(format!("index '{index}' names missing column '{column}'"));
        }
        for (n, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(format!(
                    "row {n} has {} values for {} columns",
                    row.len(),
                    self.columns.len()
                ));
            }
            for (value, column) in row.iter().zip(&self.columns) {
                if let Some(value) = value {
                    if value.type_tag() != column.ty {
                        return Err(format!(
                            "row {n} holds a {} value in {} column '{}'",
                            value.type_tag(),
                            column.ty,
                            column.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn require_column(&self, table: &str, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| EdiError::column_not_found(table, name))
    }

    pub fn schema(&self, table: &str, column: &str) -> Result<ColumnSchema> {
        let col = self.require_column(table, column)?;
        Ok(self.columns[col].schema())
    }

    pub fn key_index(&self) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.flags().contains(ColumnFlags::KEY))
    }

    fn require_key(&self, table: &str) -> Result<usize> {
        self.key_index()
            .ok_or_else(|| EdiError::BadSchema(format!("table '{table}' has no key column")))
    }

    /// Row holding `key`. Keys that do not parse as the key column's type
    /// cannot match any row.
    fn find_row(&self, key_col: usize, key: &str) -> Option<usize> {
        let key = parse_value(key, self.columns[key_col].ty).ok()?;
        self.rows
            .iter()
            .position(|row| row[key_col].as_ref() == Some(&key))
    }

    fn require_row(&self, table: &str, key: &str) -> Result<usize> {
        let key_col = self.require_key(table)?;
        self.find_row(key_col, key)
            .ok_or_else(|| EdiError::row_not_found(table, key))
    }

    fn has_indexes_on(&self, column: &str) -> bool {
        self.indexes.values().any(|c| c == column)
    }

    /// Fail if `value` cannot become the key of row `row` (None for a new row).
    fn check_key(
        &self,
        table: &str,
        key_col: usize,
        row: Option<usize>,
        value: Option<&Value>,
    ) -> Result<()> {
        let Some(value) = value else {
            return Err(EdiError::InvalidFormat(format!(
                "key of table '{table}' must not be null"
            )));
        };
        let taken = self
            .rows
            .iter()
            .enumerate()
            .any(|(i, r)| Some(i) != row && r[key_col].as_ref() == Some(value));
        if taken {
            return Err(EdiError::InvalidFormat(format!(
                "duplicate key '{}' in table '{table}'",
                value.to_text()
            )));
        }
        Ok(())
    }

    // ── Columns ─────────────────────────────────────────────────────

    pub fn add_column(
        &mut self,
        table: &str,
        column: &str,
        ty: TypeTag,
        flags: ColumnFlags,
    ) -> Result<()> {
        if column.is_empty() || self.column_index(column).is_some() {
            return Err(EdiError::BadSchema(format!(
                "cannot add column '{column}' to table '{table}'"
            )));
        }
        if flags.contains(ColumnFlags::KEY) {
            if self.key_index().is_some() {
                return Err(EdiError::BadSchema(format!(
                    "table '{table}' already has a key column"
                )));
            }
            if !self.rows.is_empty() {
                return Err(EdiError::BadSchema(format!(
                    "cannot add key column '{column}' to non-empty table '{table}'"
                )));
            }
        }
        self.columns.push(MemColumn {
            name: column.to_string(),
            ty,
            flags: (flags - ColumnFlags::INDEX).bits(),
        });
        for row in &mut self.rows {
            row.push(None);
        }
        Ok(())
    }

    pub fn remove_column(&mut self, table: &str, column: &str) -> Result<()> {
        let col = self.require_column(table, column)?;
        self.columns.remove(col);
        for row in &mut self.rows {
            row.remove(col);
        }
        self.indexes.retain(|_, c| c != column);
        Ok(())
    }

    /// Change a column's type and options, converting stored values through
    /// their canonical text. Nothing changes if any value fails to convert.
    pub fn change_column(
        &mut self,
        table: &str,
        column: &str,
        ty: TypeTag,
        flags: ColumnFlags,
    ) -> Result<()> {
        let col = self.require_column(table, column)?;
        let converted = self
            .rows
            .iter()
            .map(|row| {
                row[col]
                    .as_ref()
                    .map(|v| parse_field_text(&v.to_text(), ty))
                    .transpose()
                    .map(Option::flatten)
            })
            .collect::<Result<Vec<_>>>()?;

        if flags.contains(ColumnFlags::KEY) {
            if self.key_index().is_some_and(|k| k != col) {
                return Err(EdiError::BadSchema(format!(
                    "table '{table}' already has a key column"
                )));
            }
            let mut seen = Vec::with_capacity(converted.len());
            for value in &converted {
                match value {
                    Some(v) if !seen.contains(&v) => seen.push(v),
                    _ => {
                        return Err(EdiError::BadSchema(format!(
                            "column '{column}' has null or duplicate values and cannot be the key"
                        )))
                    }
                }
            }
        }

        let mut flags = flags - ColumnFlags::INDEX;
        if self.has_indexes_on(column) {
            flags |= ColumnFlags::INDEX;
        }
        let def = &mut self.columns[col];
        def.ty = ty;
        def.flags = flags.bits();
        for (row, value) in self.rows.iter_mut().zip(converted) {
            row[col] = value;
        }
        Ok(())
    }

    pub fn rename_column(&mut self, table: &str, column: &str, new_name: &str) -> Result<()> {
        let col = self.require_column(table, column)?;
        if new_name.is_empty() || self.column_index(new_name).is_some() {
            return Err(EdiError::BadSchema(format!(
                "cannot rename column '{column}' to '{new_name}' in table '{table}'"
            )));
        }
        self.columns[col].name = new_name.to_string();
        for target in self.indexes.values_mut() {
            if target == column {
                *target = new_name.to_string();
            }
        }
        Ok(())
    }

    // ── Indexes ─────────────────────────────────────────────────────

    pub fn add_index(&mut self, table: &str, column: &str, index: &str) -> Result<()> {
        let col = self.require_column(table, column)?;
        if self.indexes.contains_key(index) {
            return Err(EdiError::BadSchema(format!(
                "index '{index}' already exists on table '{table}'"
            )));
        }
        self.indexes.insert(index.to_string(), column.to_string());
        let def = &mut self.columns[col];
        def.flags |= ColumnFlags::INDEX.bits();
        Ok(())
    }

    pub fn remove_index(&mut self, table: &str, index: &str) -> Result<()> {
        let column = self
            .indexes
            .remove(index)
            .ok_or_else(|| EdiError::NotFound(format!("index '{index}' on table '{table}'")))?;
        if !self.has_indexes_on(&column) {
            if let Some(col) = self.column_index(&column) {
                self.columns[col].flags &= !ColumnFlags::INDEX.bits();
            }
        }
        Ok(())
    }

    // ── Rows ────────────────────────────────────────────────────────

    pub fn record(&self, table: &str, row: usize) -> Result<Record> {
        let values = &self.rows[row];
        let id = self
            .key_index()
            .and_then(|k| values[k].as_ref())
            .map(Value::to_text)
            .unwrap_or_default();
        let fields = self
            .columns
            .iter()
            .zip(values)
            .map(|(c, v)| Field::typed(c.name.clone(), c.ty, v.clone(), c.flags()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Record::new(table, id, fields))
    }

    pub fn get_rec(&self, table: &str, key: &str) -> Result<Record> {
        let row = self.require_row(table, key)?;
        self.record(table, row)
    }

    pub fn get_all(&self, table: &str) -> Result<Grid> {
        let records = (0..self.rows.len())
            .map(|row| self.record(table, row))
            .collect::<Result<Vec<_>>>()?;
        Ok(Grid::with_records(table, records))
    }

    pub fn set_field(&mut self, table: &str, key: &str, field: &str, text: &str) -> Result<()> {
        let row = self.require_row(table, key)?;
        let col = self.require_column(table, field)?;
        let value = parse_field_text(text, self.columns[col].ty)?;
        if Some(col) == self.key_index() {
            self.check_key(table, col, Some(row), value.as_ref())?;
        }
        self.rows[row][col] = value;
        Ok(())
    }

    /// Write `params` to the row with `key`, creating the row when it is
    /// missing. A value for the key column in `params` is ignored.
    pub fn set_rec(
        &mut self,
        table: &str,
        key: Option<&str>,
        params: &HashMap<String, String>,
    ) -> Result<String> {
        let key_col = self.require_key(table)?;
        let key_name = self.columns[key_col].name.clone();

        let mut updates = Vec::with_capacity(params.len());
        for (name, text) in params {
            if *name == key_name {
                continue;
            }
            let col = self.require_column(table, name)?;
            updates.push((col, parse_field_text(text, self.columns[col].ty)?));
        }

        let row = match key.and_then(|k| self.find_row(key_col, k)) {
            Some(row) => row,
            None => {
                let key_value = match key {
                    Some(k) => parse_value(k, self.columns[key_col].ty)?,
                    None => self.generate_key(table, key_col)?,
                };
                if let Value::Int(id) = key_value {
                    if self.columns[key_col].flags().contains(ColumnFlags::AUTO_INC) {
                        self.next_id = self.next_id.max(id);
                    }
                }
                let mut values = vec![None; self.columns.len()];
                values[key_col] = Some(key_value);
                self.rows.push(values);
                self.rows.len() - 1
            }
        };

        for (col, value) in updates {
            self.rows[row][col] = value;
        }
        Ok(self.rows[row][key_col]
            .as_ref()
            .map(Value::to_text)
            .unwrap_or_default())
    }

    fn generate_key(&self, table: &str, key_col: usize) -> Result<Value> {
        let column = &self.columns[key_col];
        match column.ty {
            TypeTag::Int if column.flags().contains(ColumnFlags::AUTO_INC) => {
                let max = self
                    .rows
                    .iter()
                    .filter_map(|r| r[key_col].as_ref().and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0);
                max.max(self.next_id)
                    .checked_add(1)
                    .map(Value::Int)
                    .ok_or_else(|| {
                        EdiError::BadSchema(format!("key space exhausted in table '{table}'"))
                    })
            }
            TypeTag::String => Ok(Value::String(ulid::Ulid::new().to_string().to_lowercase())),
            TypeTag::Text => Ok(Value::Text(ulid::Ulid::new().to_string().to_lowercase())),
            _ => Err(EdiError::BadSchema(format!(
                "table '{table}' cannot generate keys for column '{}'",
                column.name
            ))),
        }
    }

    pub fn delete_row(&mut self, table: &str, key: &str) -> Result<()> {
        let row = self.require_row(table, key)?;
        self.rows.remove(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> MemTable {
        let mut t = MemTable::default();
        t.add_column("users", "id", TypeTag::Int, ColumnFlags::KEY | ColumnFlags::AUTO_INC)
            .unwrap();
        t.add_column("users", "name", TypeTag::String, ColumnFlags::empty())
            .unwrap();
        t.add_column("users", "age", TypeTag::String, ColumnFlags::empty())
            .unwrap();
        t
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_auto_increment_keys() {
        let mut t = users();
        assert_eq!(t.set_rec("users", None, &params(&[("name", "a")])).unwrap(), "1");
        assert_eq!(t.set_rec("users", Some("10"), &params(&[("name", "b")])).unwrap(), "10");
        assert_eq!(t.set_rec("users", None, &params(&[("name", "c")])).unwrap(), "11");
        t.delete_row("users", "11").unwrap();
        // Deleted keys are not reissued
        assert_eq!(t.set_rec("users", None, &params(&[("name", "d")])).unwrap(), "12");
    }

    #[test]
    fn test_auto_increment_stops_at_i64_max() {
        let mut t = users();
        let max = i64::MAX.to_string();
        t.set_rec("users", Some(max.as_str()), &params(&[("name", "last")]))
            .unwrap();
        let err = t.set_rec("users", None, &params(&[("name", "over")])).unwrap_err();
        assert!(matches!(err, EdiError::BadSchema(_)));
        assert_eq!(t.rows.len(), 1);
    }

    #[test]
    fn test_check_shape() {
        let mut db = MemDatabase::default();
        db.tables.insert("users".into(), users());
        db.table_mut("users")
            .unwrap()
            .set_rec("users", None, &params(&[("name", "a")]))
            .unwrap();
        assert!(db.check_shape().is_ok());

        let mut short = db.clone();
        short.table_mut("users").unwrap().rows[0].pop();
        assert!(matches!(short.check_shape(), Err(EdiError::Open(_))));

        let mut mistyped = db.clone();
        mistyped.table_mut("users").unwrap().rows[0][0] = Some(Value::String("1".into()));
        assert!(matches!(mistyped.check_shape(), Err(EdiError::Open(_))));

        let mut two_keys = db.clone();
        two_keys.table_mut("users").unwrap().columns[1].flags = ColumnFlags::KEY.bits();
        assert!(matches!(two_keys.check_shape(), Err(EdiError::Open(_))));

        let mut dangling = db;
        dangling
            .table_mut("users")
            .unwrap()
            .indexes
            .insert("users_email".into(), "email".into());
        assert!(matches!(dangling.check_shape(), Err(EdiError::Open(_))));
    }

    #[test]
    fn test_set_rec_ignores_key_param_and_is_atomic() {
        let mut t = users();
        let key = t
            .set_rec("users", None, &params(&[("id", "99"), ("name", "a")]))
            .unwrap();
        assert_eq!(key, "1");

        let err = t
            .set_rec("users", Some("1"), &params(&[("name", "b"), ("nope", "x")]))
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(t.get_rec("users", "1").unwrap().field("name").unwrap().to_text(), "a");
        assert_eq!(t.rows.len(), 1);
    }

    #[test]
    fn test_string_keys_are_generated() {
        let mut t = MemTable::default();
        t.add_column("tags", "slug", TypeTag::String, ColumnFlags::KEY).unwrap();
        let key = t.set_rec("tags", None, &HashMap::new()).unwrap();
        assert_eq!(key.len(), 26);
        assert_eq!(key, key.to_lowercase());

        let mut dates = MemTable::default();
        dates.add_column("d", "day", TypeTag::Date, ColumnFlags::KEY).unwrap();
        assert!(matches!(
            dates.set_rec("d", None, &HashMap::new()),
            Err(EdiError::BadSchema(_))
        ));
    }

    #[test]
    fn test_key_constraints() {
        let mut t = users();
        t.set_rec("users", Some("1"), &HashMap::new()).unwrap();
        t.set_rec("users", Some("2"), &HashMap::new()).unwrap();
        assert!(t.set_field("users", "2", "id", "1").is_err());
        assert!(t.set_field("users", "2", "id", "").is_err());
        t.set_field("users", "2", "id", "3").unwrap();
        assert!(t.get_rec("users", "3").is_ok());

        assert!(matches!(
            t.add_column("users", "other", TypeTag::Int, ColumnFlags::KEY),
            Err(EdiError::BadSchema(_))
        ));
        assert!(t.get_rec("users", "abc").unwrap_err().is_not_found());
    }

    #[test]
    fn test_rows_need_a_key_column() {
        let mut t = MemTable::default();
        t.add_column("log", "line", TypeTag::Text, ColumnFlags::empty()).unwrap();
        assert!(matches!(t.get_rec("log", "1"), Err(EdiError::BadSchema(_))));
        assert!(matches!(
            t.set_rec("log", None, &HashMap::new()),
            Err(EdiError::BadSchema(_))
        ));
        assert!(t.get_all("log").unwrap().is_empty());
    }

    #[test]
    fn test_change_column_converts_or_leaves_intact() {
        let mut t = users();
        t.set_rec("users", None, &params(&[("age", "30")])).unwrap();
        t.set_rec("users", None, &params(&[("age", "")])).unwrap();
        t.change_column("users", "age", TypeTag::Int, ColumnFlags::empty())
            .unwrap();
        assert_eq!(t.rows[0][2], Some(Value::Int(30)));
        // Empty text becomes null once the column is numeric
        assert_eq!(t.rows[1][2], None);

        t.set_field("users", "1", "name", "not a number").unwrap();
        let err = t
            .change_column("users", "name", TypeTag::Float, ColumnFlags::empty())
            .unwrap_err();
        assert!(matches!(err, EdiError::InvalidFormat(_)));
        assert_eq!(t.columns[1].ty, TypeTag::String);
        assert_eq!(t.rows[0][1], Some(Value::String("not a number".into())));
    }

    #[test]
    fn test_indexes_track_column_flag() {
        let mut t = users();
        t.add_index("users", "name", "by_name").unwrap();
        t.add_index("users", "name", "by_name_2").unwrap();
        assert!(t.columns[1].flags().contains(ColumnFlags::INDEX));
        assert!(matches!(
            t.add_index("users", "name", "by_name"),
            Err(EdiError::BadSchema(_))
        ));

        t.remove_index("users", "by_name").unwrap();
        assert!(t.columns[1].flags().contains(ColumnFlags::INDEX));
        t.rename_column("users", "name", "full_name").unwrap();
        assert_eq!(t.indexes["by_name_2"], "full_name");
        t.remove_index("users", "by_name_2").unwrap();
        assert!(!t.columns[1].flags().contains(ColumnFlags::INDEX));
        assert!(t.remove_index("users", "by_name_2").unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_column_drops_values_and_indexes() {
        let mut t = users();
        t.add_index("users", "age", "by_age").unwrap();
        t.set_rec("users", None, &params(&[("name", "a"), ("age", "5")])).unwrap();
        t.remove_column("users", "age").unwrap();
        assert!(t.indexes.is_empty());
        assert_eq!(t.rows[0].len(), 2);
        assert_eq!(t.get_rec("users", "1").unwrap().len(), 2);
    }
}
