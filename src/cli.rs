// Command-line interface for pngpress.
//
// Subcommands: `run` (batch recompress a directory or zip corpus), `glb`
// (inspect/extract images embedded in a GLB/VRM container), and `config`
// (print build configuration and the probed equality strategy).

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::batch::{self, BatchOptions};
use crate::container::glb::{self, GlbContainer};
use crate::engine::{
    FilterStrategies, PassthroughRecompressor, RecompressOptions, Recompressor,
    ZopfliRecompressor,
};
use crate::equality;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_ITERATIONS: u32 = 15;
const DEFAULT_LARGE_ITERATIONS: u32 = 5;

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Batch PNG recompressor with verified lossless output.
#[derive(Parser, Debug)]
#[command(
    name = "pngpress",
    version,
    about = "Batch PNG recompressor with verified lossless output",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output the summary as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Recompress every PNG of a directory tree or zip archive.
    Run(RunArgs),
    /// List or extract images embedded in a GLB/VRM container.
    Glb(GlbArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Corpus: a directory of PNG files, or a zip archive.
    #[arg(value_hint = ValueHint::AnyPath)]
    path: PathBuf,

    /// Worker count (0 = one worker per logical CPU).
    #[arg(short = 'j', long, default_value_t = 0)]
    jobs: usize,

    /// Entropy-coder iteration count.
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,

    /// Iteration count for large images.
    #[arg(long = "large-iterations", default_value_t = DEFAULT_LARGE_ITERATIONS)]
    large_iterations: u32,

    /// Filter strategy to trial, 0-8 (repeatable). 0-4 fixed filters,
    /// 5 minimum-sum, 6 entropy, 7 predefined, 8 brute-force.
    #[arg(
        long = "filter",
        value_name = "N",
        value_parser = clap::value_parser!(u8).range(0..=8),
        action = ArgAction::Append
    )]
    filters: Vec<u8>,

    /// Let the engine pick the filter strategy set.
    #[arg(long = "auto-filter")]
    auto_filter: bool,

    /// Zero color samples of fully transparent pixels (lossy).
    #[arg(long = "lossy-transparent")]
    lossy_transparent: bool,

    /// Reduce 16-bit samples to 8-bit (lossy).
    #[arg(long = "lossy-8bit")]
    lossy_8bit: bool,

    /// Use the standard deflate coder instead of the iterated one.
    #[arg(long = "standard-deflate")]
    standard_deflate: bool,

    /// Ancillary chunk to copy verbatim, e.g. tEXt (repeatable).
    #[arg(long = "keep", value_name = "CHUNK", action = ArgAction::Append)]
    keep_chunks: Vec<String>,

    /// Compress and verify, but mutate nothing on disk.
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Enumerate and tally the corpus without compressing.
    #[arg(long = "count-only")]
    count_only: bool,

    /// Skip pixel verification of the compressed output.
    #[arg(long = "no-verify")]
    no_verify: bool,

    /// Delete the .old backup after a successful swap.
    #[arg(long = "no-backup")]
    no_backup: bool,
}

#[derive(Args, Debug)]
struct GlbArgs {
    /// GLB/VRM container file.
    #[arg(value_hint = ValueHint::FilePath)]
    file: PathBuf,

    /// Write every embedded image into this directory.
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    extract: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Glb,
    Config,
}

struct Options {
    command: Command,
    quiet: bool,
    #[allow(dead_code)]
    verbose: u8,
    json_output: bool,
    path: Option<PathBuf>,
    extract: Option<PathBuf>,
    batch: BatchOptions,
}

fn resolve_options(cli: Cli) -> Options {
    let quiet = cli.quiet;
    let verbose = cli.verbose.min(2);
    let json_output = cli.json_output;

    match cli.command {
        Cmd::Run(args) => {
            let mut strategies = FilterStrategies::empty();
            for index in &args.filters {
                if let Some(flag) = FilterStrategies::from_index(*index) {
                    strategies |= flag;
                }
            }
            let keep_chunks = args
                .keep_chunks
                .into_iter()
                .filter(|name| {
                    let ok = name.len() == 4 && name.bytes().all(|b| b.is_ascii_alphabetic());
                    if !ok {
                        eprintln!("pngpress: warning: ignoring invalid chunk name '{name}'");
                    }
                    ok
                })
                .collect();

            let engine = RecompressOptions {
                iterations: args.iterations,
                iterations_large: args.large_iterations,
                strategies: if strategies.is_empty() {
                    RecompressOptions::default().strategies
                } else {
                    strategies
                },
                auto_strategy: args.auto_filter,
                lossy_transparent: args.lossy_transparent,
                lossy_8bit: args.lossy_8bit,
                standard_deflate: args.standard_deflate,
                keep_chunks,
            };

            Options {
                command: Command::Run,
                quiet,
                verbose,
                json_output,
                path: Some(args.path),
                extract: None,
                batch: BatchOptions {
                    jobs: args.jobs,
                    dry_run: args.dry_run,
                    count_only: args.count_only,
                    verify: !args.no_verify,
                    keep_backup: !args.no_backup,
                    engine,
                },
            }
        }
        Cmd::Glb(args) => Options {
            command: Command::Glb,
            quiet,
            verbose,
            json_output,
            path: Some(args.file),
            extract: args.extract,
            batch: BatchOptions::default(),
        },
        Cmd::Config => Options {
            command: Command::Config,
            quiet,
            verbose,
            json_output,
            path: None,
            extract: None,
            batch: BatchOptions::default(),
        },
    }
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("pngpress".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

// ---------------------------------------------------------------------------
// Run command
// ---------------------------------------------------------------------------

fn cmd_run(opts: &Options) -> i32 {
    let Some(path) = &opts.path else {
        eprintln!("pngpress: run requires a corpus path");
        return 1;
    };

    // Count-only never reaches the real engine.
    let engine: Box<dyn Recompressor> = if opts.batch.count_only {
        Box::new(PassthroughRecompressor)
    } else {
        Box::new(ZopfliRecompressor)
    };

    if !opts.batch.verify && !opts.batch.count_only && !opts.quiet {
        eprintln!("pngpress: verification disabled; nothing will count as identical");
    }

    match batch::run(path, engine.as_ref(), &opts.batch) {
        Ok(summary) => {
            if !opts.quiet {
                eprintln!("pngpress: {summary}");
            }
            if opts.json_output {
                let json = serde_json::json!({
                    "command": "run",
                    "corpus": path.display().to_string(),
                    "processed": summary.processed,
                    "identical": summary.identical,
                    "different": summary.different(),
                    "src_bytes": summary.src_bytes,
                    "dst_bytes": summary.dst_bytes,
                    "reduction_percent": summary.reduction_percent(),
                    "elapsed_ms": summary.elapsed.as_millis() as u64,
                    "dry_run": opts.batch.dry_run,
                    "count_only": opts.batch.count_only,
                });
                eprintln!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
            }
            0
        }
        Err(e) => {
            eprintln!("pngpress: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Glb command
// ---------------------------------------------------------------------------

fn cmd_glb(opts: &Options) -> i32 {
    let Some(path) = &opts.path else {
        eprintln!("pngpress: glb requires a container file");
        return 1;
    };

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("pngpress: {}: {e}", path.display());
            return 1;
        }
    };
    let container = match GlbContainer::decode(&data) {
        Ok(container) => container,
        Err(e) => {
            eprintln!("pngpress: {}: {e}", path.display());
            return 1;
        }
    };
    let doc = match container.document() {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("pngpress: {}: {e}", path.display());
            return 1;
        }
    };
    let images = match glb::embedded_images(&doc, &container.bin) {
        Ok(images) => images,
        Err(e) => {
            eprintln!("pngpress: {}: {e}", path.display());
            return 1;
        }
    };

    if !opts.quiet {
        eprintln!(
            "pngpress: {} (glTF version {}): {} embedded image(s)",
            path.display(),
            container.version,
            images.len()
        );
    }
    for (i, image) in images.iter().enumerate() {
        println!(
            "{i}: {} ({}, {} bytes)",
            image.name.unwrap_or("<unnamed>"),
            image.mime_type.unwrap_or("unknown type"),
            image.bytes.len()
        );
    }

    if let Some(dir) = &opts.extract {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("pngpress: {}: {e}", dir.display());
            return 1;
        }
        for (i, image) in images.iter().enumerate() {
            let extension = match image.mime_type {
                Some("image/png") => "png",
                Some("image/jpeg") => "jpg",
                _ => "bin",
            };
            let stem = image
                .name
                .map(sanitize_name)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("image{i}"));
            let out = dir.join(format!("{stem}.{extension}"));
            if let Err(e) = std::fs::write(&out, image.bytes) {
                eprintln!("pngpress: {}: {e}", out.display());
                return 1;
            }
            if !opts.quiet {
                eprintln!("pngpress: wrote {}", out.display());
            }
        }
    }

    0
}

/// Keep extracted file names path-safe.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("pngpress version {version} (Rust)");

    eprintln!("EQUALITY_STRATEGY={}", equality::strategy());
    eprintln!("DEFAULT_ITERATIONS={DEFAULT_ITERATIONS}");
    eprintln!("DEFAULT_LARGE_ITERATIONS={DEFAULT_LARGE_ITERATIONS}");
    eprintln!("sizeof(usize)={}", std::mem::size_of::<*const ()>());

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();

    let default_filter = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let opts = resolve_options(cli);

    let exit_code = match opts.command {
        Command::Run => cmd_run(&opts),
        Command::Glb => cmd_glb(&opts),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_opts(args: &[&str]) -> Options {
        let argv: Vec<String> = std::iter::once("pngpress".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        let cli = Cli::try_parse_from(argv).expect("cli parse failed");
        resolve_options(cli)
    }

    #[test]
    fn run_subcommand_maps_correctly() {
        let opts = parse_opts(&[
            "run",
            "corpus.zip",
            "--jobs",
            "4",
            "--iterations",
            "30",
            "--filter",
            "5",
            "--filter",
            "8",
            "--keep",
            "tEXt",
            "--dry-run",
        ]);
        assert_eq!(opts.command, Command::Run);
        assert_eq!(
            opts.path.as_deref(),
            Some(std::path::Path::new("corpus.zip"))
        );
        assert_eq!(opts.batch.jobs, 4);
        assert_eq!(opts.batch.engine.iterations, 30);
        assert_eq!(
            opts.batch.engine.strategies,
            FilterStrategies::MIN_SUM | FilterStrategies::BRUTE_FORCE
        );
        assert_eq!(opts.batch.engine.keep_chunks, vec!["tEXt".to_string()]);
        assert!(opts.batch.dry_run);
        assert!(opts.batch.verify);
        assert!(opts.batch.keep_backup);
    }

    #[test]
    fn no_filters_falls_back_to_defaults() {
        let opts = parse_opts(&["run", "dir"]);
        assert_eq!(
            opts.batch.engine.strategies,
            RecompressOptions::default().strategies
        );
    }

    #[test]
    fn invalid_chunk_names_are_dropped() {
        let opts = parse_opts(&["run", "dir", "--keep", "tEXt", "--keep", "bogus!"]);
        assert_eq!(opts.batch.engine.keep_chunks, vec!["tEXt".to_string()]);
    }

    #[test]
    fn filter_index_out_of_range_is_a_parse_error() {
        let argv = ["pngpress", "run", "dir", "--filter", "9"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn negated_flags_map_through() {
        let opts = parse_opts(&["run", "dir", "--no-verify", "--no-backup", "--count-only"]);
        assert!(!opts.batch.verify);
        assert!(!opts.batch.keep_backup);
        assert!(opts.batch.count_only);
    }

    #[test]
    fn glb_subcommand_maps_correctly() {
        let opts = parse_opts(&["glb", "model.vrm", "--extract", "out"]);
        assert_eq!(opts.command, Command::Glb);
        assert_eq!(
            opts.path.as_deref(),
            Some(std::path::Path::new("model.vrm"))
        );
        assert_eq!(opts.extract.as_deref(), Some(std::path::Path::new("out")));
    }

    #[test]
    fn sanitize_name_strips_path_separators() {
        assert_eq!(sanitize_name("tex/../evil"), "tex_.._evil");
        assert_eq!(sanitize_name("body_Albedo.01"), "body_Albedo.01");
    }
}
