use std::path::Path;

use anyhow::Context;
use mongodb::bson::Bson;
use serde_json::json;

use crate::cli::OutputFormat;
use crate::config::config;
use crate::schema::{Languages, Schema, SchemaFile};

pub fn handle(file: &Path, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = config();
    let schema_file = SchemaFile::from_path(file)?;
    let languages = Languages::new(config.languages.iter().cloned())?;
    let database = schema_file
        .database
        .clone()
        .unwrap_or_else(|| config.database.database.clone());
    let options = schema_file.options(None);

    let schema = Schema::define(&database, &schema_file.collection, schema_file.definition, &languages, options)
        .with_context(|| format!("invalid schema in {}", file.display()))?;
    let validator = Bson::Document(schema.validator().clone()).into_relaxed_extjson();

    match output_format {
        OutputFormat::Json => {
            let out = json!({
                "namespace": schema.namespace().to_string(),
                "checksum": schema.checksum(),
                "validator": validator,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("# {} (checksum {})", schema.namespace(), schema.checksum());
            println!("{}", serde_json::to_string_pretty(&validator)?);
        }
    }
    Ok(())
}
