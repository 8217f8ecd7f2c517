pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "docstack")]
#[command(about = "docstack - schema-validated, versioned document CRUD over MongoDB")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Load schemas, enforce validators and serve the REST API")]
    Serve {
        #[arg(long, help = "Port to listen on (overrides PORT)")]
        port: Option<u16>,

        #[arg(long, help = "Schema directory (overrides SCHEMA_DIR)")]
        schemas: Option<PathBuf>,
    },

    #[command(about = "Print the MongoDB validator derived from a schema file")]
    Validator {
        #[arg(help = "Schema file (.yaml, .yml or .json)")]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Serve { port, schemas } => commands::serve::handle(port, schemas).await,
        Commands::Validator { file } => commands::validator::handle(&file, output_format),
    }
}
