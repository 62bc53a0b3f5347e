use crate::error::{EdiError, Result};
use crate::record::Record;
use crate::service::Validator;
use crate::value::{ColumnFlags, Field, Value};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Validate a record against the built-in column checks and the registered
/// validators for its table.
///
/// The record's error list is cleared and repopulated, and each field's
/// `valid` flag is set. Validators named `"<table>"` apply to the whole
/// record; `"<table>.<column>"` apply to one column and mark that field
/// invalid when they fail. Returns true when nothing failed.
pub fn validate_with(validations: &HashMap<String, Validator>, record: &mut Record) -> bool {
    record.clear_errors();
    for field in record.fields_mut() {
        field.set_valid(true);
    }

    // Built-in NOT_NULL checks
    let mut failed_fields = Vec::new();
    let mut messages = Vec::new();
    for (i, field) in record.fields().iter().enumerate() {
        if field.flags().contains(ColumnFlags::NOT_NULL) && is_blank(field) {
            failed_fields.push(i);
            messages.push(format!("Field '{}' must not be null", field.name()));
        }
    }

    let table = record.table().to_string();
    let rec: &Record = record;
    if let Some(validator) = validations.get(&table) {
        if !validator(rec) {
            messages.push(format!("Record failed validation '{table}'"));
        }
    }

    for (i, field) in rec.fields().iter().enumerate() {
        let name = format!("{table}.{}", field.name());
        if let Some(validator) = validations.get(&name) {
            if !validator(rec) {
                failed_fields.push(i);
                messages.push(format!("Field '{}' failed validation '{name}'", field.name()));
            }
        }
    }

    for i in failed_fields {
        record.fields_mut()[i].set_valid(false);
    }
    let ok = messages.is_empty();
    for message in messages {
        record.push_error(message);
    }
    ok
}

/// Validation messages recorded on a record by its last validation pass.
pub fn get_errors(record: &Record) -> &[String] {
    record.errors()
}

fn is_blank(field: &Field) -> bool {
    match field.value() {
        None => true,
        Some(Value::String(s)) | Some(Value::Text(s)) => s.is_empty(),
        Some(_) => false,
    }
}

// ── Reusable validators ─────────────────────────────────────────────

/// The column is present and non-blank.
pub fn present(column: &str) -> Validator {
    let column = column.to_string();
    Arc::new(move |record: &Record| record.field(&column).map(|f| !is_blank(f)).unwrap_or(false))
}

/// The column's canonical text matches `pattern`. Null values do not match.
pub fn matches(column: &str, pattern: &str) -> Result<Validator> {
    let re = Regex::new(pattern)
        .map_err(|e| EdiError::InvalidFormat(format!("bad validation pattern: {e}")))?;
    let column = column.to_string();
    Ok(Arc::new(move |record: &Record| {
        record
            .field(&column)
            .and_then(Field::value)
            .map(|v| re.is_match(&v.to_text()))
            .unwrap_or(false)
    }))
}

/// The column's canonical text is one of `allowed`. Null values pass.
pub fn one_of(column: &str, allowed: &[&str]) -> Validator {
    let column = column.to_string();
    let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
    Arc::new(move |record: &Record| match record.field(&column).and_then(Field::value) {
        Some(v) => allowed.contains(&v.to_text()),
        None => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypeTag;

    fn user(name: Option<&str>, role: &str) -> Record {
        Record::new(
            "users",
            "1",
            vec![
                Field::with_value("id", Value::Int(1), ColumnFlags::KEY),
                Field::typed(
                    "name",
                    TypeTag::String,
                    name.map(|n| Value::String(n.into())),
                    ColumnFlags::NOT_NULL,
                )
                .unwrap(),
                Field::with_value("role", Value::String(role.into()), ColumnFlags::empty()),
            ],
        )
    }

    fn registry(entries: Vec<(&str, Validator)>) -> HashMap<String, Validator> {
        entries
            .into_iter()
            .map(|(name, v)| (name.to_string(), v))
            .collect()
    }

    #[test]
    fn test_valid_record() {
        let mut rec = user(Some("Alice"), "admin");
        assert!(validate_with(&HashMap::new(), &mut rec));
        assert!(get_errors(&rec).is_empty());
        assert!(rec.fields().iter().all(Field::is_valid));
    }

    #[test]
    fn test_not_null_violation_then_fix() {
        let mut rec = user(None, "admin");
        assert!(!validate_with(&HashMap::new(), &mut rec));
        assert_eq!(get_errors(&rec).len(), 1);
        assert!(get_errors(&rec)[0].contains("name"));
        assert!(!rec.field("name").unwrap().is_valid());
        assert!(rec.field("role").unwrap().is_valid());

        rec.set_field_text("name", "Alice").unwrap();
        assert!(validate_with(&HashMap::new(), &mut rec));
        assert!(get_errors(&rec).is_empty());
        assert!(rec.field("name").unwrap().is_valid());
    }

    #[test]
    fn test_empty_string_counts_as_null() {
        let mut rec = user(Some(""), "admin");
        assert!(!validate_with(&HashMap::new(), &mut rec));
    }

    #[test]
    fn test_column_validator_marks_field() {
        let validations = registry(vec![("users.role", one_of("role", &["admin", "member"]))]);
        let mut rec = user(Some("Alice"), "superadmin");
        assert!(!validate_with(&validations, &mut rec));
        assert!(!rec.field("role").unwrap().is_valid());
        assert!(get_errors(&rec)[0].contains("users.role"));
    }

    #[test]
    fn test_record_validator() {
        let validations: HashMap<String, Validator> = registry(vec![(
            "users",
            Arc::new(|r: &Record| r.id() != "1") as Validator,
        )]);
        let mut rec = user(Some("Alice"), "admin");
        assert!(!validate_with(&validations, &mut rec));
        assert_eq!(get_errors(&rec), ["Record failed validation 'users'".to_string()]);
        assert!(rec.fields().iter().all(Field::is_valid));
    }

    #[test]
    fn test_validators_for_other_tables_ignored() {
        let validations = registry(vec![("posts", Arc::new(|_: &Record| false) as Validator)]);
        let mut rec = user(Some("Alice"), "admin");
        assert!(validate_with(&validations, &mut rec));
    }

    #[test]
    fn test_reusable_validators() {
        let rec = user(Some("alice@example.com"), "admin");
        assert!(present("name")(&rec));
        assert!(!present("email")(&rec));
        assert!(matches("name", r"^[^@]+@[^@]+$").unwrap()(&rec));
        assert!(!matches("role", r"^\d+$").unwrap()(&rec));
        assert!(matches("name", "(").is_err());
    }
}
