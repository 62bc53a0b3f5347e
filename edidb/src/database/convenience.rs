// Generic operations built on top of any provider.

use super::Database;
use crate::error::{EdiError, Result};
use crate::filter::Expression;
use crate::record::{Grid, Record};
use crate::value::format_value;

impl Database {
    /// All rows of `table` matching `expression`, in storage order.
    pub fn get_where(&self, table: &str, expression: &str) -> Result<Grid> {
        let expr = Expression::parse(expression)?;
        let mut grid = self.get_all(table)?;
        let mut failure = None;
        grid.retain(|record| match expr.matches(record) {
            Ok(keep) => keep,
            Err(e) => {
                failure.get_or_insert(e);
                false
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(grid),
        }
    }

    /// The first row of `table` matching `expression`.
    pub fn get_one_where(&self, table: &str, expression: &str) -> Result<Record> {
        self.get_where(table, expression)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EdiError::NotFound(format!("no row in table '{table}' matches '{expression}'"))
            })
    }

    /// Format one stored field, falling back to `default` when the row or
    /// field does not exist or the value is null.
    pub fn get_field_as_string(
        &self,
        table: &str,
        key: &str,
        field: &str,
        format: Option<&str>,
        default: &str,
    ) -> Result<String> {
        match self.get_field(table, key, field) {
            Ok(f) if f.is_null() => Ok(default.to_string()),
            Ok(f) => format_value(format, &f),
            Err(e) if e.is_not_found() => Ok(default.to_string()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{Database, DbFlags, SetFlags};
    use crate::error::EdiError;
    use crate::service::Service;
    use crate::value::{ColumnFlags, TypeTag};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn setup_people() -> Database {
        let db = Arc::new(Service::with_builtin())
            .open("mdb", ":memory:", DbFlags::empty())
            .unwrap();
        db.add_table("people").unwrap();
        db.add_column("people", "id", TypeTag::Int, ColumnFlags::KEY | ColumnFlags::AUTO_INC)
            .unwrap();
        db.add_column("people", "name", TypeTag::String, ColumnFlags::empty())
            .unwrap();
        db.add_column("people", "age", TypeTag::Int, ColumnFlags::empty())
            .unwrap();
        db.add_column("people", "joined", TypeTag::Date, ColumnFlags::empty())
            .unwrap();
        for (name, age) in [("Ann", "34"), ("Ben", "25"), ("Cat", "41"), ("Dov", "")] {
            let params: HashMap<String, String> = [("name", name), ("age", age)]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            db.set_rec("people", None, &params, SetFlags::empty()).unwrap();
        }
        db
    }

    fn names(grid: &crate::record::Grid) -> Vec<String> {
        grid.iter()
            .map(|r| r.field("name").unwrap().to_text())
            .collect()
    }

    #[test]
    fn test_get_where_keeps_order() {
        let db = setup_people();
        let grid = db.get_where("people", "age > 30").unwrap();
        assert_eq!(names(&grid), vec!["Ann", "Cat"]);
        assert!(grid.records().iter().all(|r| r.database().is_some()));
    }

    #[test]
    fn test_get_where_compound_and_null() {
        let db = setup_people();
        assert_eq!(
            names(&db.get_where("people", "age < 30 or name = 'Cat'").unwrap()),
            vec!["Ben", "Cat"]
        );
        assert_eq!(names(&db.get_where("people", "age = null").unwrap()), vec!["Dov"]);
        assert!(db.get_where("people", "age > 99").unwrap().is_empty());
    }

    #[test]
    fn test_get_where_errors() {
        let db = setup_people();
        assert!(matches!(db.get_where("people", "age >"), Err(EdiError::Query(_))));
        assert!(matches!(
            db.get_where("people", "age > old"),
            Err(EdiError::InvalidFormat(_))
        ));
        assert!(db.get_where("nobody", "age > 1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_one_where() {
        let db = setup_people();
        let rec = db.get_one_where("people", "age >= 25").unwrap();
        assert_eq!(rec.field("name").unwrap().to_text(), "Ann");
        assert!(db
            .get_one_where("people", "name = 'Zed'")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_get_field_as_string() {
        let db = setup_people();
        assert_eq!(
            db.get_field_as_string("people", "2", "age", Some("%5d"), "?").unwrap(),
            "   25"
        );
        assert_eq!(
            db.get_field_as_string("people", "2", "name", None, "?").unwrap(),
            "Ben"
        );
        // Missing row, missing column and null value all give the default
        assert_eq!(db.get_field_as_string("people", "99", "age", None, "?").unwrap(), "?");
        assert_eq!(db.get_field_as_string("people", "1", "email", None, "?").unwrap(), "?");
        assert_eq!(db.get_field_as_string("people", "4", "age", None, "n/a").unwrap(), "n/a");
        assert_eq!(db.get_field_as_string("people", "1", "joined", Some("%Y"), "").unwrap(), "");
    }

    #[test]
    fn test_get_field_as_string_bad_format() {
        let db = setup_people();
        assert!(db
            .get_field_as_string("people", "1", "age", Some("%q"), "")
            .is_err());
    }
}
