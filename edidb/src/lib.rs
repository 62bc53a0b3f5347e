pub mod database;
pub mod error;
pub mod filter;
pub mod mdb;
pub mod provider;
pub mod record;
pub mod schema;
pub mod service;
pub mod validation;
pub mod value;

pub use database::{Database, DbFlags, SetFlags, SuppressSave};
pub use error::{EdiError, Result};
pub use filter::Expression;
pub use mdb::MdbProvider;
pub use provider::{Backend, ColumnSchema, Persist, Provider};
pub use record::{make_grid, Grid, GridLiteral, Record};
pub use schema::{parse_schema, parse_schema_str, SchemaDefinition};
pub use service::{open, register_provider, register_validation, validate_record, Service, Validator};
pub use validation::get_errors;
pub use value::{
    format_value, name_to_type_tag, parse_value, type_tag_to_name, ColumnFlags, Field, TypeTag,
    Value,
};
