//! mkchal CLI: generate CTF challenges from source templates.
//!
//! Five commands: `list`, `render`, `generate`, `batch` and `verify`.
//!
//! Generation runs go through [`mkchal_core::pipeline::Pipeline`], which loads a
//! template, renders it, builds it with the category's toolchain and packages the result.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mkchal_core::challenge::{Category, Difficulty};

#[derive(Parser)]
#[command(
    name = "mkchal",
    about = "Generate, build and package CTF challenges from source templates",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to mkchal.config.json (default: ./mkchal.config.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Templates directory (overrides config; built-in templates when neither is set)
    #[arg(long, global = true)]
    templates: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates and their placeholders
    List {
        /// Only list this category
        #[arg(long)]
        category: Option<Category>,
    },

    /// Render a template without building or packaging it
    Render {
        #[arg(long)]
        category: Category,

        /// Template name within the category
        #[arg(long, default_value = mkchal_core::pipeline::DEFAULT_TEMPLATE)]
        template: String,

        /// Placeholder value, repeatable
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = commands::parse_key_value)]
        values: Vec<(String, String)>,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Render, build and package one challenge
    Generate {
        /// Challenge name (reduced to lowercase letters, digits and dashes)
        #[arg(long)]
        name: String,

        #[arg(long)]
        author: String,

        #[arg(long = "desc", default_value = "")]
        description: String,

        #[arg(long)]
        category: Category,

        /// Template name (prompts when omitted on a terminal)
        #[arg(long)]
        template: Option<String>,

        #[arg(long, default_value = "easy")]
        difficulty: Difficulty,

        /// Use this flag instead of generating one
        #[arg(long)]
        flag: Option<String>,

        /// Service port, for templates with a `port` placeholder
        #[arg(long)]
        port: Option<u16>,

        /// Extra placeholder value, repeatable
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = commands::parse_key_value)]
        values: Vec<(String, String)>,

        /// Root of the challenge tree (overrides config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Build timeout in seconds (overrides config)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Generate every challenge in a JSON request file concurrently
    Batch {
        /// JSON array of requests
        file: PathBuf,

        /// Maximum concurrent runs (overrides config)
        #[arg(long, short)]
        jobs: Option<usize>,
    },

    /// Check every challenge under the output directory for a valid manifest
    Verify {
        /// Root of the challenge tree (overrides config)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = commands::load_config(cli.config.as_deref(), cli.templates)?;

    match cli.command {
        Commands::List { category } => {
            commands::list::run(&config, category)?;
        }
        Commands::Render {
            category,
            template,
            values,
            out,
        } => {
            commands::render::run(&config, category, &template, values, out.as_deref())?;
        }
        Commands::Generate {
            name,
            author,
            description,
            category,
            template,
            difficulty,
            flag,
            port,
            values,
            output,
            timeout,
        } => {
            let args = commands::generate::GenerateArgs {
                name,
                author,
                description,
                category,
                template,
                difficulty,
                flag,
                port,
                values,
                output,
                timeout,
            };
            commands::generate::run(config, args).await?;
        }
        Commands::Batch { file, jobs } => {
            commands::batch::run(config, &file, jobs).await?;
        }
        Commands::Verify { output } => {
            commands::verify::run(&config, output.as_deref())?;
        }
    }

    Ok(())
}
