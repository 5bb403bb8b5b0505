pub mod connection;
pub mod error_context;
pub mod lock;

/// Quote a PostgreSQL identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for statements that cannot take bind parameters
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
