//! `ripple schema` command implementation.

use ripple::report::report_schema;

/// Print the report JSON Schema.
pub fn run() -> Result<(), ripple::Error> {
    println!("{}", serde_json::to_string_pretty(&report_schema())?);
    Ok(())
}
