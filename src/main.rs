//! psyforge command line interface
//!
//! Usage:
//!   psyforge [OPTIONS] <ALGORITHM_FILE>
//!   psyforge --help
//!
//! Examples:
//!   psyforge alg.x90                                  # Both layers to stdout
//!   psyforge -d kernels --oalg alg.f90 --opsy psy.f90 alg.x90
//!   psyforge -s omp.json --no-dist-mem alg.x90        # Apply a script, no MPI
//!   psyforge --emit=schedule alg.x90                  # Dump the call trees

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info};
use psyforge::config::Config;
use psyforge::transform::Script;
use psyforge::{Pipeline, PipelineOutput};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// psyforge - generate the compute layer for kernel/invoke Fortran
#[derive(Parser, Debug)]
#[command(name = "psyforge")]
#[command(version)]
#[command(about = "Source-to-source engine for kernel/invoke style Fortran", long_about = None)]
struct Cli {
    /// Algorithm-layer source file
    #[arg(value_name = "ALGORITHM_FILE")]
    input: PathBuf,

    /// Directory to search for kernel modules (repeatable; default: the
    /// algorithm file's directory)
    #[arg(short = 'd', long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Transformation script (JSON)
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Output file for the rewritten algorithm layer (stdout if omitted)
    #[arg(long, value_name = "FILE")]
    oalg: Option<PathBuf>,

    /// Output file for the compute layer (stdout if omitted)
    #[arg(long, value_name = "FILE")]
    opsy: Option<PathBuf>,

    /// Generate code without distributed-memory support
    #[arg(long)]
    no_dist_mem: bool,

    /// Wrap generated lines longer than N characters
    #[arg(long, value_name = "N", conflicts_with = "no_line_limit")]
    line_length: Option<usize>,

    /// Do not wrap generated lines
    #[arg(long)]
    no_line_limit: bool,

    /// What to emit
    #[arg(long, value_enum, default_value = "code")]
    emit: EmitKind,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmitKind {
    /// Rewritten algorithm layer and compute layer
    Code,
    /// Transformed call tree of every invoke
    Schedule,
    /// Kernel metadata as JSON
    Kernels,
    /// Dependency edges as JSON
    Deps,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .format_timestamp(None)
        .init();

    info!("psyforge v{}", psyforge::VERSION);
    debug!("Input file: {:?}", cli.input);

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read algorithm file: {:?}", cli.input))?;
    let script = match &cli.script {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read script: {:?}", path))?;
            Some(Script::from_json(&text).with_context(|| format!("Invalid script {:?}", path))?)
        }
        None => None,
    };

    let config = build_config(&cli);
    debug!("Config: {:?}", config);

    let stem = cli
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("algorithm")
        .to_string();
    let output = Pipeline::new(&config)
        .run(&source, &stem, script.as_ref())
        .with_context(|| format!("Failed to process {:?}", cli.input))?;

    match cli.emit {
        EmitKind::Code => write_outputs(&[(&cli.oalg, &output.code.algorithm), (&cli.opsy, &output.code.psy)])?,
        EmitKind::Schedule => {
            let text: String = output.schedules.iter().map(|s| s.view()).collect();
            print!("{}", text);
        }
        EmitKind::Kernels => println!("{}", serde_json::to_string_pretty(&output.kernels())?),
        EmitKind::Deps => println!("{}", dependencies_json(&output)?),
    }
    info!("Done");
    Ok(())
}

fn build_config(cli: &Cli) -> Config {
    let mut config = Config::new().distributed_memory(!cli.no_dist_mem);
    if cli.no_line_limit {
        config = config.line_length(None);
    } else if let Some(n) = cli.line_length {
        config = config.line_length(Some(n));
    }
    let dirs = if cli.include.is_empty() {
        vec![input_dir(&cli.input)]
    } else {
        cli.include.clone()
    };
    for dir in dirs {
        config = config.search_path(dir);
    }
    config
}

fn input_dir(input: &Path) -> PathBuf {
    match input.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn dependencies_json(output: &PipelineOutput) -> Result<String> {
    let invokes: Vec<serde_json::Value> = output
        .schedules
        .iter()
        .map(|s| {
            let edges: Vec<serde_json::Value> = s
                .dependencies
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "from": s.tree.path_of(e.from),
                        "to": s.tree.path_of(e.to),
                        "field": e.field,
                        "kind": e.kind,
                    })
                })
                .collect();
            serde_json::json!({ "invoke": s.name, "dependencies": edges })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&invokes)?)
}

/// Stage every file output next to its destination and move them into
/// place only once all of them were written.
fn write_outputs(outputs: &[(&Option<PathBuf>, &String)]) -> Result<()> {
    let mut staged = Vec::new();
    for (path, content) in outputs {
        let Some(p) = path else { continue };
        let dir = match p.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create output file: {:?}", p))?;
        tmp.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write output file: {:?}", p))?;
        staged.push((tmp, p));
    }
    for (tmp, p) in staged {
        tmp.persist(p)
            .with_context(|| format!("Failed to write output file: {:?}", p))?;
    }
    for (path, content) in outputs {
        if path.is_none() {
            print!("{}", content);
        }
    }
    Ok(())
}
