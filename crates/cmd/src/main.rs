// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use cmd::commands::{preview_command, schema_command};
use cmd::common::{Session, SourceArgs};
use cmd::output::OutputFormat;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "sheetql")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Print pipeline counters after the command
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ad-hoc SQL query against a spreadsheet dataset
    Preview(PreviewArgs),
    /// Show the sheet and column names a query can use
    Schema(SchemaArgs),
}

#[derive(Args)]
struct PreviewArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Issue the same request this many times
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Query text; sheets are referenced as [Sheet Name]
    query: String,
}

#[derive(Args)]
struct SchemaArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[tokio::main]
#[allow(clippy::print_stdout, clippy::print_stderr)]
async fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();

    let (session, result) = match &cli.command {
        Commands::Preview(args) => {
            let session = Session::open(&args.source).await?;
            let result = preview_command(
                &session,
                &args.query,
                args.format,
                args.repeat,
                |text| println!("{}", text),
            )
            .await;
            (session, result)
        }
        Commands::Schema(args) => {
            let session = Session::open(&args.source).await?;
            let result = schema_command(&session, args.format, |text| println!("{}", text)).await;
            (session, result)
        }
    };

    if cli.verbose {
        let stats = session.engine.stats();
        eprintln!("\n=== Pipeline Counters ===");
        eprintln!("requests:     {}", stats.requests);
        eprintln!("cache hits:   {}", stats.cache_hits);
        eprintln!("cache misses: {}", stats.cache_misses);
        eprintln!("ingestions:   {}", stats.ingestions);
        eprintln!("executions:   {}", stats.executions);
        eprintln!("failures:     {}", stats.failures);
    }

    result
}
