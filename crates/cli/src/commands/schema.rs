//! `fieldsage schema`: Print the JSON Schema for an output shape.

use fieldsage_core::schema::{SchemaKind, resolve_schema};

pub fn run(kind: SchemaKind) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render(kind)?);
    Ok(())
}

fn render(kind: SchemaKind) -> Result<String, serde_json::Error> {
    let schema = resolve_schema(kind);
    serde_json::to_string_pretty(&serde_json::json!({
        "name": schema.name(),
        "description": schema.description(),
        "schema": schema.json_schema(),
    }))
}
