use super::types::SchemaDefinition;
use crate::error::Result;
use std::path::Path;

/// Parse and check a schema YAML file.
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse and check a schema YAML string.
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    let schema: SchemaDefinition = serde_yaml::from_str(content)?;
    schema.validate()?;
    Ok(schema)
}
