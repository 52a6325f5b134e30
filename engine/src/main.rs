//! csvx CLI - export records to CSV and import CSV files into a store
//!
//! ```bash
//! csvx export store.json -o people.csv          # Export a store (or a JSON array)
//! csvx import store.json people.csv towns.csv   # Import, with a supplementary file
//! csvx parse people.csv                         # Tokenize a CSV file to JSON
//! csvx serve                                    # Start HTTP server (port 3000)
//! ```

use clap::{Parser, Subcommand};
use csvx::config::parse_separator;
use csvx::import::LineCursor;
use csvx::parser::format_delimiter;
use csvx::repository::memory::StoredList;
use csvx::{
    decode_content, detect_delimiter, export_document, run_import, scan_headers, ColumnSelection,
    Diagnostics, Document, Event, ExchangeConfig, ExchangeError, ExportOptions, FileDescriptor,
    ImportOptions, MemoryList, Schema,
};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "csvx")]
#[command(about = "Flatten records to CSV and import CSV files back", long_about = None)]
struct Cli {
    /// Field separator (overrides CSVX_SEPARATOR; `\t` for tab, `auto` on import/parse)
    #[arg(short, long, global = true)]
    separator: Option<String>,

    /// Charset (overrides CSVX_CHARSET; `auto` detects on import/parse)
    #[arg(short, long, global = true)]
    charset: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a store file or a JSON array of records to CSV
    Export {
        /// Store file, or JSON array of root records
        input: PathBuf,

        /// Schema describing nested tables (JSON)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Columns to export: `label` or `label=Display`, comma separated
        #[arg(long)]
        columns: Option<String>,

        /// Follow associated (non-composed) collections too
        #[arg(long)]
        associations: bool,

        /// Repeat ancestor values on every row
        #[arg(long)]
        no_collapse: bool,
    },

    /// Import CSV files into a store file
    Import {
        /// Store file (created when missing)
        store: PathBuf,

        /// Primary CSV file
        primary: PathBuf,

        /// Supplementary CSV files sharing the primary row space
        extra: Vec<PathBuf>,

        /// Delete rows the primary file does not reference
        #[arg(long)]
        delete: bool,

        /// Skip the preview pass
        #[arg(long)]
        skip_check: bool,

        /// Only preview, do not apply
        #[arg(long)]
        skip_import: bool,

        /// JSON Schema (draft 7) validating imported records
        #[arg(long)]
        validation: Option<PathBuf>,

        /// Natural key column when the store is created
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Tokenize a CSV file and output JSON rows
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    let mut config = ExchangeConfig::from_env();
    let cli = Cli::parse();

    if let Some(charset) = &cli.charset {
        config.charset = charset.clone();
    }

    let result = match cli.command {
        Commands::Export {
            input,
            schema,
            output,
            columns,
            associations,
            no_collapse,
        } => {
            let options = ExportOptions {
                include_associations: associations,
                columns: columns.as_deref().map(ColumnSelection::parse_list),
                collapse: !no_collapse,
            };
            cmd_export(&config, cli.separator.as_deref(), &input, schema.as_deref(), output.as_deref(), &options)
        }

        Commands::Import {
            store,
            primary,
            extra,
            delete,
            skip_check,
            skip_import,
            validation,
            key,
        } => {
            let options = ImportOptions {
                skip_check,
                skip_import,
                delete_missing: delete,
            };
            if key.is_some() {
                config.key = key;
            }
            cmd_import(&config, cli.separator.as_deref(), &store, &primary, &extra, validation.as_deref(), options).await
        }

        Commands::Parse { input, output } => {
            cmd_parse(&config, cli.separator.as_deref(), &input, output.as_deref())
        }

        Commands::Serve { port } => {
            if let Some(value) = cli.separator.as_deref() {
                match parse_separator(value) {
                    Some(sep) => config.separator = sep,
                    None => {
                        eprintln!("❌ Error: invalid separator {:?}", value);
                        std::process::exit(1);
                    }
                }
            }
            cmd_serve(config, port).await
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Resolve the separator flag against the configuration; `auto` detects it
/// from `content`.
fn resolve_separator(
    config: &ExchangeConfig,
    flag: Option<&str>,
    content: Option<&str>,
) -> Result<char, Box<dyn std::error::Error>> {
    match (flag, content) {
        (None, _) => Ok(config.separator),
        (Some("auto"), Some(content)) => Ok(detect_delimiter(content)),
        (Some(value), _) => parse_separator(value).ok_or_else(|| format!("invalid separator {:?}", value).into()),
    }
}

fn read_text(path: &Path, charset: &str) -> Result<(String, String), Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    Ok(decode_content(&bytes, charset)?)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("input.csv")
        .to_string()
}

fn cmd_export(
    config: &ExchangeConfig,
    separator: Option<&str>,
    input: &Path,
    schema_path: Option<&Path>,
    output: Option<&Path>,
    options: &ExportOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📤 Exporting: {}", input.display());

    let content = fs::read_to_string(input)?;
    let value: Value = serde_json::from_str(&content)?;

    let (mut schema, items) = match value {
        Value::Array(items) => {
            let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("records");
            (Schema::single(stem), items)
        }
        other => {
            let stored: StoredList = serde_json::from_value(other)?;
            let list = MemoryList::from_stored(stored)?;
            (list.schema(), list.items())
        }
    };
    if let Some(path) = schema_path {
        schema = serde_json::from_str(&fs::read_to_string(path)?)?;
    }

    let charset = if config.charset.eq_ignore_ascii_case(csvx::parser::AUTO_CHARSET) {
        csvx::models::DEFAULT_CHARSET.to_string()
    } else {
        config.charset.clone()
    };
    let name = output.map(file_name).unwrap_or_else(|| format!("{}.csv", schema.root));
    let mut doc = Document::new(name)
        .with_separator(resolve_separator(config, separator, None)?)
        .with_charset(charset);

    let bytes = export_document(&mut doc, &schema, &items, options).map_err(ExchangeError::from)?;

    eprintln!("   Separator: '{}'", format_delimiter(doc.separator));
    eprintln!("   Columns: {}", doc.headers.iter().filter(|h| !h.ignore).count());
    eprintln!("✅ Exported {} rows", doc.counters.row_count);

    match output {
        Some(path) => {
            fs::write(path, &bytes)?;
            eprintln!("💾 Output written to: {}", path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

async fn cmd_import(
    config: &ExchangeConfig,
    separator: Option<&str>,
    store: &Path,
    primary: &Path,
    extra: &[PathBuf],
    validation: Option<&Path>,
    options: ImportOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📥 Importing: {} into {}", primary.display(), store.display());

    let mut list = MemoryList::open(store, config.table_spec())?;
    if let Some(path) = validation {
        let schema: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
        list = list.with_validation(schema)?;
    }

    let (content, charset) = read_text(primary, &config.charset)?;
    let separator = resolve_separator(config, separator, Some(&content))?;
    eprintln!("   Encoding: {}", charset);
    eprintln!("   Separator: '{}'", format_delimiter(separator));

    let mut files = Vec::with_capacity(extra.len());
    for path in extra {
        let (text, _) = read_text(path, &config.charset)?;
        files.push(FileDescriptor::new(file_name(path), text));
    }

    let doc = Document::new(file_name(primary))
        .with_content(content)
        .with_separator(separator)
        .with_charset(charset);

    let outcome = run_import(doc, files, &mut list, options, &config.pacing, |event| match event {
        Event::Busy => eprintln!("   ⏳ Working..."),
        Event::Progress(p) if p.current == 0 && p.max > 0 => eprintln!("   {} ({} rows)", p.message, p.max),
        Event::Progress(_) => {}
    })
    .await;

    let c = outcome.counters;
    eprintln!("\n📊 Results:");
    eprintln!("   Rows:    {}", c.row_count);
    eprintln!("   Added:   {}", c.row_added);
    eprintln!("   Updated: {}", c.row_updated);
    eprintln!("   Deleted: {}", c.row_deleted);

    if outcome.is_applied() {
        if options.skip_import {
            eprintln!("\n🔎 Preview only, nothing applied");
        } else {
            eprintln!("\n✨ Done! Store has {} rows", list.len());
        }
        return Ok(());
    }

    print_errors(&outcome.errors);
    Err(ExchangeError::ImportFailed(outcome.errors.count()).into())
}

fn print_errors(errors: &Diagnostics) {
    eprintln!();
    for (i, line) in errors.lines().iter().enumerate() {
        if i == 20 {
            eprintln!("   ... {} more", errors.count() - i);
            break;
        }
        eprintln!("   ❌ {}", line);
    }
}

fn cmd_parse(
    config: &ExchangeConfig,
    separator: Option<&str>,
    input: &Path,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing CSV: {}", input.display());

    let (content, charset) = read_text(input, &config.charset)?;
    let separator = resolve_separator(config, separator, Some(&content))?;

    let mut file = FileDescriptor::new(file_name(input), content);
    let mut errors = Diagnostics::new();
    scan_headers(&mut file, separator, &mut errors);
    if errors.has_error() {
        print_errors(&errors);
        return Err(ExchangeError::ImportFailed(errors.count()).into());
    }

    eprintln!("   Encoding: {}", charset);
    eprintln!("   Separator: '{}'", format_delimiter(separator));
    eprintln!("   Columns: {}", file.headers.join(", "));

    let mut records = Vec::with_capacity(file.row_count);
    let mut cursor = LineCursor::new(&file);
    while let Some((line, parsed)) = cursor.next_line(&file, separator) {
        match parsed {
            Ok(parsed) => {
                let record: Map<String, Value> = file
                    .headers
                    .iter()
                    .zip(parsed.columns_by_order)
                    .map(|(name, value)| (name.clone(), Value::String(value)))
                    .collect();
                records.push(Value::Object(record));
            }
            Err(err) if err.is_fatal() => {
                errors.add_fatal(format!("line {line}: {err}"));
                break;
            }
            Err(err) => errors.add_global(format!("line {line}: {err}")),
        }
    }

    if errors.has_error() {
        print_errors(&errors);
    }
    eprintln!("✅ Parsed {} records", records.len());

    let json = serde_json::to_string_pretty(&records)?;
    write_output(&json, output)?;

    if errors.has_fatal() {
        return Err(ExchangeError::ImportFailed(errors.count()).into());
    }
    Ok(())
}

async fn cmd_serve(config: ExchangeConfig, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    csvx::server::start_server(config, port).await
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
