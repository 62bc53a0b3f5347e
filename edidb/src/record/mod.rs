// Record and grid containers returned by providers and built from literals.

mod literal;

pub use literal::{make_grid, GridLiteral};

use crate::database::{Database, DatabaseInner};
use crate::error::{EdiError, Result};
use crate::value::{format_value, Field, TypeTag};
use std::collections::HashMap;
use std::sync::Weak;

/// One table row: an ordered, fixed-length set of typed fields.
///
/// The field slots are allocated once at construction; values may change
/// but fields are never added or removed. The back-reference to the owning
/// database is non-owning, so a record never keeps a closed database alive.
#[derive(Debug, Clone)]
pub struct Record {
    db: Weak<DatabaseInner>,
    table: String,
    id: String,
    fields: Box<[Field]>,
    errors: Vec<String>,
}

impl Record {
    /// Create a detached record. `id` may be empty for a row not yet saved.
    pub fn new(table: impl Into<String>, id: impl Into<String>, fields: Vec<Field>) -> Self {
        Record {
            db: Weak::new(),
            table: table.into(),
            id: id.into(),
            fields: fields.into_boxed_slice(),
            errors: Vec::new(),
        }
    }

    pub(crate) fn attach(&mut self, db: &Database) {
        self.db = db.downgrade();
    }

    /// The database this record was read from, if it is still alive.
    pub fn database(&self) -> Option<Database> {
        Database::upgrade(&self.db)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name() == name)
    }

    pub fn field_type(&self, name: &str) -> Option<TypeTag> {
        self.field(name).map(Field::type_tag)
    }

    /// Format a named field; `NotFound` if the record has no such field.
    pub fn field_as_string(&self, name: &str, format: Option<&str>) -> Result<String> {
        let field = self.field(name).ok_or_else(|| self.missing(name))?;
        format_value(format, field)
    }

    /// Parse text into a named field using the field's declared type.
    pub fn set_field_text(&mut self, name: &str, text: &str) -> Result<()> {
        let missing = self.missing(name);
        self.field_mut(name).ok_or(missing)?.set_text(text)
    }

    /// Validation messages from the last validation pass.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub(crate) fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub(crate) fn push_error(&mut self, message: String) {
        self.errors.push(message);
    }

    /// Field values as canonical text, keyed by field name, as accepted by `set_rec`.
    pub fn to_params(&self) -> HashMap<String, String> {
        self.fields
            .iter()
            .map(|f| (f.name().to_string(), f.to_text()))
            .collect()
    }

    fn missing(&self, name: &str) -> EdiError {
        EdiError::column_not_found(&self.table, name)
    }
}

/// An ordered result set of records from one table.
#[derive(Debug, Clone)]
pub struct Grid {
    db: Weak<DatabaseInner>,
    table: String,
    records: Vec<Record>,
}

impl Grid {
    pub fn new(table: impl Into<String>) -> Self {
        Grid::with_records(table, Vec::new())
    }

    pub fn with_records(table: impl Into<String>, records: Vec<Record>) -> Self {
        Grid {
            db: Weak::new(),
            table: table.into(),
            records,
        }
    }

    /// Point the grid and every record in it at `db`.
    pub(crate) fn attach(&mut self, db: &Database) {
        self.db = db.downgrade();
        for record in &mut self.records {
            record.attach(db);
        }
    }

    pub fn database(&self) -> Option<Database> {
        Database::upgrade(&self.db)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Keep only the records for which `keep` returns true, in order.
    pub fn retain<F: FnMut(&Record) -> bool>(&mut self, keep: F) {
        self.records.retain(keep);
    }

    /// Column names, taken from the first record.
    pub fn columns(&self) -> Vec<String> {
        self.records
            .first()
            .map(|r| r.fields().iter().map(|f| f.name().to_string()).collect())
            .unwrap_or_default()
    }
}

impl IntoIterator for Grid {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a Grid {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ColumnFlags, Value};

    fn user(id: i64, name: &str) -> Record {
        Record::new(
            "users",
            id.to_string(),
            vec![
                Field::with_value("id", Value::Int(id), ColumnFlags::KEY),
                Field::with_value("name", Value::String(name.into()), ColumnFlags::empty()),
                Field::new("age", TypeTag::Int, ColumnFlags::empty()),
            ],
        )
    }

    #[test]
    fn test_field_count_and_order_fixed() {
        let rec = user(1, "Alice");
        assert_eq!(rec.len(), 3);
        let names: Vec<&str> = rec.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["id", "name", "age"]);
        assert!(rec.errors().is_empty());
    }

    #[test]
    fn test_field_access() {
        let mut rec = user(1, "Alice");
        assert_eq!(rec.field_index("age"), Some(2));
        assert_eq!(rec.field_type("name"), Some(TypeTag::String));
        assert!(rec.field("email").is_none());

        rec.set_field_text("age", "31").unwrap();
        assert_eq!(rec.field("age").unwrap().value(), Some(&Value::Int(31)));
        assert_eq!(rec.field_as_string("age", Some("%04d")).unwrap(), "0031");

        assert!(rec.set_field_text("age", "old").is_err());
        assert!(rec.field_as_string("email", None).unwrap_err().is_not_found());
        assert_eq!(rec.len(), 3);
    }

    #[test]
    fn test_detached_record_has_no_database() {
        let rec = user(1, "Alice");
        assert!(rec.database().is_none());
    }

    #[test]
    fn test_to_params() {
        let rec = user(4, "Dana");
        let params = rec.to_params();
        assert_eq!(params["id"], "4");
        assert_eq!(params["name"], "Dana");
        assert_eq!(params["age"], "");
    }

    #[test]
    fn test_grid_basics() {
        let mut grid = Grid::new("users");
        assert!(grid.is_empty());
        assert!(grid.columns().is_empty());

        grid.push(user(1, "Alice"));
        grid.push(user(2, "Bob"));
        grid.push(user(3, "Cy"));
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.columns(), vec!["id", "name", "age"]);

        grid.retain(|r| r.id() != "2");
        let ids: Vec<&str> = grid.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }
}
