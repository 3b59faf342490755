use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use datafusion::arrow::util::pretty::pretty_format_batches;
use datafusion_expr::{lit, Expr};
use log::info;
use sail_common::config::AppConfig;
use sail_url_table::{UrlTable, UrlTableContext, UrlTableFactory};

use crate::schema::{parse_columns, parse_schema};

#[derive(Parser)]
#[command(version, name = "sail-url")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Read a URL table and print its rows")]
    Read {
        #[command(flatten)]
        table: TableArgs,
        #[arg(long, value_delimiter = ',', help = "The columns to read (default: all)")]
        columns: Vec<String>,
    },
    #[command(about = "Copy the rows of one URL table to another")]
    Copy {
        #[arg(help = "The source URL")]
        source: String,
        #[arg(help = "The source format")]
        source_format: String,
        #[arg(help = "The target URL")]
        target: String,
        #[arg(help = "The target format")]
        target_format: String,
        #[arg(long, help = "The table schema, e.g. `a:Int64,b:Utf8`")]
        schema: String,
    },
}

#[derive(Args)]
struct TableArgs {
    #[arg(help = "The URL of the table")]
    url: String,
    #[arg(help = "The format name, e.g. CSV or JSONEachRow")]
    format: String,
    #[arg(help = "The compression method (default: detected from the URL path)")]
    compression: Option<String>,
    #[arg(long, help = "The table schema, e.g. `a:Int64,b:Utf8`")]
    schema: String,
}

pub fn main(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_from(args);
    sail_telemetry::init_logger()?;

    let config = AppConfig::load()?;
    let factory = UrlTableFactory::new(Arc::new(UrlTableContext::try_new(config)?));

    match cli.command {
        Command::Read { table, columns } => {
            let mut arguments = vec![lit(table.url), lit(table.format)];
            arguments.extend(table.compression.map(lit));
            let table = create_table(&factory, &arguments, &table.schema)?;
            let columns = parse_columns(&columns);
            let batches = table
                .open_read_pipeline(&columns, &[])?
                .collect::<Result<Vec<_>, _>>()?;
            println!("{}", pretty_format_batches(&batches)?);
        }
        Command::Copy {
            source,
            source_format,
            target,
            target_format,
            schema,
        } => {
            let source = create_table(&factory, &[lit(source), lit(source_format)], &schema)?;
            let target = create_table(&factory, &[lit(target), lit(target_format)], &schema)?;
            let mut sink = target.open_write_pipeline()?;
            let mut rows = 0;
            for batch in source.open_read_pipeline(&[], &[])? {
                let batch = batch?;
                rows += batch.num_rows();
                sink.write(&batch)?;
            }
            sink.finish()?;
            info!("copied {rows} row(s) from {} to {}", source.uri(), target.uri());
        }
    }
    Ok(())
}

fn create_table(
    factory: &UrlTableFactory,
    arguments: &[Expr],
    schema: &str,
) -> Result<UrlTable, Box<dyn std::error::Error>> {
    let schema = parse_schema(schema)?;
    Ok(factory.create(arguments, schema, vec![])?)
}
