use super::table::MemDatabase;
use crate::error::{EdiError, Result};
use crate::filter::Expression;
use crate::record::{Grid, Record};
use regex::Regex;
use std::sync::OnceLock;

fn select_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*select\s+(.+?)\s+from\s+([A-Za-z_][\w.-]*)(?:\s+where\s+(.+?))?\s*;?\s*$")
            .expect("select regex is valid")
    })
}

/// Run `SELECT <* | col, ...> FROM <table> [WHERE <expr>]`.
pub(super) fn run(db: &MemDatabase, command: &str) -> Result<Grid> {
    let caps = select_regex()
        .captures(command)
        .ok_or_else(|| EdiError::Query(format!("unsupported query '{command}'")))?;
    let table_name = &caps[2];
    let filter = caps.get(3).map(|m| Expression::parse(m.as_str())).transpose()?;

    let table = db.table(table_name)?;
    let projection: Option<Vec<&str>> = match caps[1].trim() {
        "*" => None,
        list => {
            let columns: Vec<&str> = list.split(',').map(str::trim).collect();
            for column in &columns {
                if column.is_empty() {
                    return Err(EdiError::Query(format!("empty column in '{command}'")));
                }
                if table.column_index(column).is_none() {
                    return Err(EdiError::column_not_found(table_name, column));
                }
            }
            Some(columns)
        }
    };

    let mut records = Vec::new();
    for record in table.get_all(table_name)? {
        if let Some(filter) = &filter {
            if !filter.matches(&record)? {
                continue;
            }
        }
        records.push(match &projection {
            Some(columns) => project(record, columns),
            None => record,
        });
    }
    Ok(Grid::with_records(table_name, records))
}

fn project(record: Record, columns: &[&str]) -> Record {
    let fields = columns
        .iter()
        .filter_map(|c| record.field(c).cloned())
        .collect();
    Record::new(record.table(), record.id(), fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ColumnFlags, TypeTag};
    use std::collections::HashMap;

    fn people() -> MemDatabase {
        let mut db = MemDatabase::default();
        let t = db.tables.entry("people".into()).or_default();
        t.add_column("people", "id", TypeTag::Int, ColumnFlags::KEY | ColumnFlags::AUTO_INC)
            .unwrap();
        t.add_column("people", "name", TypeTag::String, ColumnFlags::empty())
            .unwrap();
        t.add_column("people", "age", TypeTag::Int, ColumnFlags::empty())
            .unwrap();
        for (name, age) in [("Ann", "34"), ("Ben", "25"), ("Cat", "41")] {
            let params: HashMap<String, String> =
                [("name".to_string(), name.to_string()), ("age".to_string(), age.to_string())]
                    .into_iter()
                    .collect();
            t.set_rec("people", None, &params).unwrap();
        }
        db
    }

    #[test]
    fn test_select_star() {
        let grid = run(&people(), "SELECT * FROM people").unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.columns(), vec!["id", "name", "age"]);
    }

    #[test]
    fn test_select_projection_and_where() {
        let grid = run(&people(), "select name from people where age > 30;").unwrap();
        assert_eq!(grid.columns(), vec!["name"]);
        let names: Vec<String> = grid.iter().map(|r| r.fields()[0].to_text()).collect();
        assert_eq!(names, vec!["Ann", "Cat"]);
        assert_eq!(grid.records()[1].id(), "3");
    }

    #[test]
    fn test_query_errors() {
        let db = people();
        assert!(matches!(run(&db, "DELETE FROM people"), Err(EdiError::Query(_))));
        assert!(matches!(run(&db, "SELECT FROM people"), Err(EdiError::Query(_))));
        assert!(matches!(
            run(&db, "SELECT * FROM people WHERE age >"),
            Err(EdiError::Query(_))
        ));
        assert!(run(&db, "SELECT email FROM people").unwrap_err().is_not_found());
        assert!(run(&db, "SELECT * FROM nobody").unwrap_err().is_not_found());
    }
}
