use super::{Grid, Record};
use crate::error::{EdiError, Result};
use crate::value::{parse_value, ColumnFlags, Field, TypeTag};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Literal description of a grid, usually written as YAML or JSON:
///
/// ```yaml
/// table: users
/// columns: [id:int, name, age:int]
/// rows:
///   - [1, Alice, 30]
///   - [2, Bob, ~]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridLiteral {
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_yaml::Value>>,
}

/// Build a grid from a YAML/JSON literal without touching any provider.
pub fn make_grid(literal: &str) -> Result<Grid> {
    GridLiteral::parse(literal)?.into_grid()
}

impl GridLiteral {
    pub fn parse(literal: &str) -> Result<Self> {
        let parsed: GridLiteral = serde_yaml::from_str(literal)?;
        Ok(parsed)
    }

    pub fn into_grid(self) -> Result<Grid> {
        let mut columns = Vec::with_capacity(self.columns.len());
        let mut seen = HashSet::new();
        for spec in &self.columns {
            let (name, ty) = match spec.split_once(':') {
                Some((name, ty)) => (name.trim(), Some(TypeTag::from_name(ty.trim())?)),
                None => (spec.trim(), None),
            };
            if name.is_empty() || !seen.insert(name) {
                return Err(EdiError::InvalidFormat(format!(
                    "bad or duplicate column '{spec}' in grid literal"
                )));
            }
            columns.push((name, ty));
        }

        let mut cells = Vec::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(EdiError::InvalidFormat(format!(
                    "row {i} has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            let texts = row.iter().map(scalar_text).collect::<Result<Vec<_>>>()?;
            cells.push(texts);
        }

        let types: Vec<TypeTag> = columns
            .iter()
            .enumerate()
            .map(|(col, (_, ty))| ty.unwrap_or_else(|| infer_type(&self.rows, col)))
            .collect();

        let mut grid = Grid::new(self.table.clone());
        for row in cells {
            let mut id = String::new();
            let mut fields = Vec::with_capacity(columns.len());
            for ((&(name, _), &ty), text) in columns.iter().zip(&types).zip(row) {
                let flags = if name == "id" { ColumnFlags::KEY } else { ColumnFlags::empty() };
                let value = text.map(|t| parse_value(&t, ty)).transpose()?;
                let field = Field::typed(name, ty, value, flags)?;
                if name == "id" {
                    id = field.to_text();
                }
                fields.push(field);
            }
            grid.push(Record::new(self.table.clone(), id, fields));
        }
        Ok(grid)
    }
}

fn scalar_text(value: &serde_yaml::Value) -> Result<Option<String>> {
    match value {
        serde_yaml::Value::Null => Ok(None),
        serde_yaml::Value::Bool(b) => Ok(Some(b.to_string())),
        serde_yaml::Value::Number(n) => Ok(Some(n.to_string())),
        serde_yaml::Value::String(s) => Ok(Some(s.clone())),
        other => Err(EdiError::InvalidFormat(format!(
            "grid literal values must be scalars, got {other:?}"
        ))),
    }
}

/// Type of the first non-null value in a column; string when there is none.
/// A numeric column is float as soon as any of its numbers is not an integer.
fn infer_type(rows: &[Vec<serde_yaml::Value>], col: usize) -> TypeTag {
    let mut values = rows.iter().filter_map(|row| row.get(col)).filter(|v| !v.is_null());
    match values.next() {
        Some(serde_yaml::Value::Bool(_)) => TypeTag::Bool,
        Some(serde_yaml::Value::Number(first)) => {
            let fractional =
                |v: &serde_yaml::Value| matches!(v, serde_yaml::Value::Number(n) if !n.is_i64());
            if !first.is_i64() || values.any(fractional) {
                TypeTag::Float
            } else {
                TypeTag::Int
            }
        }
        Some(_) | None => TypeTag::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_two_by_three_grid() {
        let grid = make_grid(
            r#"
table: users
columns: [id, name, age]
rows:
  - [1, Alice, 30]
  - [2, Bob, 25]
"#,
        )
        .unwrap();

        assert_eq!(grid.table(), "users");
        assert_eq!(grid.len(), 2);
        for record in &grid {
            assert_eq!(record.len(), 3);
            assert_eq!(record.table(), "users");
        }
        assert_eq!(grid.records()[1].id(), "2");
        assert_eq!(grid.columns(), vec!["id", "name", "age"]);
        assert!(grid.database().is_none());
    }

    #[test]
    fn test_json_literal_with_types_and_nulls() {
        let grid = make_grid(
            r#"{"table": "events", "columns": ["when:date", "score:float", "ok"],
                "rows": [["2024-01-02", 1, true], [null, 2.5, null]]}"#,
        )
        .unwrap();

        let first = &grid.records()[0];
        assert_eq!(first.field_type("when"), Some(TypeTag::Date));
        assert_eq!(first.field("score").unwrap().value(), Some(&Value::Float(1.0)));
        assert_eq!(first.field("ok").unwrap().value(), Some(&Value::Bool(true)));
        assert_eq!(first.id(), "");

        let second = &grid.records()[1];
        assert!(second.field("when").unwrap().is_null());
        assert!(second.field("ok").unwrap().is_null());
        assert_eq!(second.field_type("ok"), Some(TypeTag::Bool));
    }

    #[test]
    fn test_mixed_numbers_widen_to_float() {
        let grid = make_grid("table: t\ncolumns: [n, m]\nrows:\n  - [1, 1]\n  - [2.5, 2]\n").unwrap();
        let records = grid.records();
        assert_eq!(records[0].field_type("n"), Some(TypeTag::Float));
        assert_eq!(records[0].field("n").unwrap().value(), Some(&Value::Float(1.0)));
        assert_eq!(records[1].field("n").unwrap().value(), Some(&Value::Float(2.5)));
        assert_eq!(records[1].field("m").unwrap().value(), Some(&Value::Int(2)));
    }

    #[test]
    fn test_row_width_mismatch() {
        let err = make_grid("table: t\ncolumns: [a, b]\nrows:\n  - [1]\n").unwrap_err();
        assert!(matches!(err, EdiError::InvalidFormat(_)));
    }

    #[test]
    fn test_bad_typed_value() {
        let err = make_grid("table: t\ncolumns: [n:int]\nrows:\n  - [abc]\n").unwrap_err();
        assert!(matches!(err, EdiError::InvalidFormat(_)));
    }

    #[test]
    fn test_unknown_column_type() {
        let err = make_grid("table: t\ncolumns: [n:number]\nrows: []\n").unwrap_err();
        assert!(matches!(err, EdiError::UnknownType(_)));
    }

    #[test]
    fn test_duplicate_column() {
        assert!(make_grid("table: t\ncolumns: [a, a]\n").is_err());
    }
}
