//! srcpack CLI
//!
//! Usage: srcpack <COMMAND>
//!
//! Commands:
//!   list    Show the entries that would be packaged
//!   pack    Write the source archive to a file
//!   hash    Print the source archive digest
//!   upload  Package and upload the archive to a URL

use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use crossterm::{
    cursor::MoveToColumn,
    execute,
    style::Stylize,
    terminal::{Clear, ClearType},
};
use tracing_subscriber::EnvFilter;

use srcpack::engine::{collect_entries, engine_package, format_bytes};
use srcpack::models::{PackSummary, PackagedArchive};
use srcpack::{HttpUploader, PackageRequest, SourceConfig, UploadOptions, Uploader};

#[derive(Parser, Debug)]
#[command(name = "srcpack")]
#[command(author, version, about = "Package a source tree into a zip for deploys", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file (defaults to <root>/srcpack.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Source root (defaults to the current directory)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Include glob, repeatable; replaces the configured list
    #[arg(long = "include")]
    include: Vec<String>,

    /// Exclude glob, repeatable; replaces the configured list
    #[arg(long = "exclude")]
    exclude: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the entries that would be packaged
    List {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Write the source archive to a file
    Pack {
        #[command(flatten)]
        source: SourceArgs,

        /// Destination zip
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Print the source archive digest
    Hash {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Package and upload the archive
    Upload {
        #[command(flatten)]
        source: SourceArgs,

        /// Upload URL
        #[arg(long)]
        url: String,

        /// HTTP method
        #[arg(long, default_value = "PUT")]
        method: String,

        /// Request header as KEY=VALUE, repeatable
        #[arg(long = "header")]
        headers: Vec<String>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("srcpack={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_request(config_path: Option<&PathBuf>, args: SourceArgs) -> Result<PackageRequest> {
    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir().context("cannot resolve current directory")?,
    };
    let mut config = match config_path {
        Some(path) => SourceConfig::load(path)?,
        None => SourceConfig::discover(&root)?,
    };
    if !args.include.is_empty() {
        config.include = args.include;
    }
    if !args.exclude.is_empty() {
        config.exclude = Some(args.exclude);
    }
    Ok(config.into_request(root))
}

fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|h| {
            let (k, v) = h
                .split_once('=')
                .ok_or_else(|| anyhow!("header '{h}' is not KEY=VALUE"))?;
            if k.trim().is_empty() {
                bail!("header '{h}' has an empty name");
            }
            Ok((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn render_progress(out: &mut impl Write, pct: f32, msg: &str) -> io::Result<()> {
    execute!(out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    write!(out, "{} {}", format!("[{pct:>3.0}%]").cyan(), msg)?;
    out.flush()
}

/// Runs the engine on a worker thread and draws its progress on stderr.
fn package_with_progress(request: PackageRequest) -> Result<PackagedArchive> {
    let (tx, rx) = mpsc::channel::<(f32, String)>();
    let worker = thread::spawn(move || engine_package(&request, &tx));

    let mut stderr = io::stderr();
    let interactive = stderr.is_terminal();
    for (pct, msg) in rx {
        if interactive {
            render_progress(&mut stderr, pct, &msg)?;
        }
    }
    if interactive {
        writeln!(stderr)?;
    }

    let archive = worker
        .join()
        .map_err(|_| anyhow!("packaging thread panicked"))??;
    Ok(archive)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::List { source } => {
            let request = build_request(cli.config.as_ref(), source)?;
            let entries = collect_entries(&request)?;
            let mut stdout = io::stdout().lock();
            for entry in &entries {
                writeln!(stdout, "{}", entry.archive_name())?;
            }
            let summary = PackSummary::from_entries(&entries);
            eprintln!(
                "{} {} files, {} directories, {}",
                "total:".dim(),
                summary.files,
                summary.directories,
                format_bytes(summary.bytes_in)
            );
        }
        Commands::Pack { source, out } => {
            let request = build_request(cli.config.as_ref(), source)?;
            let archive = package_with_progress(request)?;
            archive
                .persist_copy(&out)
                .with_context(|| format!("cannot write {}", out.display()))?;
            println!("{}  {}", archive.digest, out.display());
            eprintln!(
                "{} {} entries, {}",
                "packed".green(),
                archive.entries.len(),
                format_bytes(archive.size)
            );
        }
        Commands::Hash { source } => {
            let request = build_request(cli.config.as_ref(), source)?;
            let archive = package_with_progress(request)?;
            println!("{}", archive.digest);
        }
        Commands::Upload {
            source,
            url,
            method,
            headers,
        } => {
            let headers = parse_headers(&headers)?;
            let request = build_request(cli.config.as_ref(), source)?;
            let archive = package_with_progress(request)?;
            let uploader = HttpUploader::new()?;
            let result = uploader.upload(&UploadOptions {
                url,
                file: archive.path().to_path_buf(),
                method,
                headers,
            })?;
            println!("{}", archive.digest);
            eprintln!(
                "{} HTTP {} ({})",
                "uploaded".green(),
                result.status,
                format_bytes(archive.size)
            );
            if let Some(data) = result.data {
                eprintln!("{}", serde_json::to_string_pretty(&data)?);
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}
