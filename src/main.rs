//! sandeval CLI - evaluate sandboxed expressions from the command line

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use sandeval::error::{format_eval_error, format_parse_error};
use sandeval::{EvalConfig, Evaluator};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "sandeval")]
#[command(about = "Sandboxed expression evaluator - safe formulas for untrusted input", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one expression and print its value
    Eval {
        /// The expression
        expr: String,

        /// Names as a JSON object, e.g. '{"x": 1}'
        #[arg(long)]
        names: Option<String>,

        /// JSON file holding a names object
        #[arg(long)]
        names_file: Option<PathBuf>,

        /// Config file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable collection literals and comprehensions
        #[arg(long)]
        compound: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Parse one expression and display its syntax tree
    Parse {
        /// The expression
        expr: String,
    },

    /// Start interactive REPL (Read-Eval-Print Loop)
    Repl {
        /// Enable collection literals and comprehensions
        #[arg(long)]
        compound: bool,
    },

    /// Print the default configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Eval {
            expr,
            names,
            names_file,
            config,
            compound,
            format,
        } => {
            let names = cli::load_names(names.as_deref(), names_file.as_deref())?;
            let ctx = cli::build_context(config.as_deref(), compound, names)?;

            let mut evaluator = Evaluator::with_context(ctx);
            let value = match evaluator.eval(&expr) {
                Ok(value) => value,
                Err(e) => {
                    eprint!("{}", format_eval_error(&e, &expr));
                    std::process::exit(1);
                }
            };

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&value.to_json())?);
                }
                OutputFormat::Text => println!("{}", value.repr()),
            }
        }

        Commands::Parse { expr } => match sandeval::token_parser::parse(&expr) {
            Ok(tree) => {
                cli::success("Parse successful");
                println!("\n{}", "AST:".bold());
                println!("{:#?}", tree);
            }
            Err(e) => {
                eprint!("{}", format_parse_error(&e, &expr));
                std::process::exit(1);
            }
        },

        Commands::Repl { compound } => {
            sandeval::repl::run_repl(compound)?;
        }

        Commands::Config => match EvalConfig::default().to_toml_string() {
            Ok(toml) => print!("{}", toml),
            Err(e) => {
                cli::error(&format!("failed to render config: {}", e));
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
