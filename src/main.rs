//! Basalt CLI - translate serialized compilation units

use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use basalt::logging::{init_logging, LogFormat, LogLevel, LogOptions};
use basalt::{
    CompilationUnit, Diagnostic, ErrorConfig, LibraryMetadata, MemoryModel, Options, SourceMap,
    Translation, TranslationFailure, Translator,
};

/// Java to Objective-C translator core
#[derive(Parser)]
#[command(name = "basalt")]
#[command(about = "Translate type-resolved Java units to Objective-C", long_about = None)]
struct Cli {
    /// Log format: auto, text, json
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate units and write the .h/.m pairs
    #[command(visible_alias = "t")]
    Translate {
        #[command(flatten)]
        input: InputArgs,

        /// Output directory
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output: PathBuf,
    },
    /// Translate units without writing anything
    #[command(visible_alias = "c")]
    Check {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Serialized compilation units (JSON)
    #[arg(value_name = "AST", required = true)]
    units: Vec<PathBuf>,

    /// Emit automatic reference counting code
    #[arg(long)]
    arc: bool,

    /// Leave the reflective metadata block out
    #[arg(long)]
    no_reflection: bool,

    /// Library metadata (JSON) merged over the built-in table
    #[arg(long, value_name = "FILE")]
    library: Option<PathBuf>,

    /// Translation options (JSON); flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LogOptions::from_env().with_cli(cli.log_format, cli.log_level));

    let (input, output) = match cli.command {
        Commands::Translate { input, output } => (input, Some(output)),
        Commands::Check { input } => (input, None),
    };
    match run(&input, output.as_deref()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn read(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

fn options(input: &InputArgs) -> Result<Options, String> {
    let mut options = match &input.config {
        Some(path) => serde_json::from_str(&read(path)?)
            .map_err(|e| format!("invalid options in {}: {}", path.display(), e))?,
        None => Options::default(),
    };
    if input.arc {
        options = options.with_memory_model(MemoryModel::Arc);
    }
    if input.no_reflection {
        options = options.with_reflection(false);
    }
    Ok(options)
}

fn library(input: &InputArgs) -> Result<LibraryMetadata, String> {
    let mut library = LibraryMetadata::builtin();
    if let Some(path) = &input.library {
        let extra = LibraryMetadata::from_json(&read(path)?)
            .map_err(|e| format!("invalid library metadata in {}: {}", path.display(), e))?;
        library.merge(extra);
    }
    Ok(library)
}

/// Returns whether every unit translated.
fn run(input: &InputArgs, output: Option<&Path>) -> Result<bool, String> {
    let translator = Translator::new(options(input)?, library(input)?);

    let mut units = Vec::with_capacity(input.units.len());
    for path in &input.units {
        let unit: CompilationUnit = serde_json::from_str(&read(path)?)
            .map_err(|e| format!("invalid unit in {}: {}", path.display(), e))?;
        units.push(unit);
    }

    let use_color = std::io::stderr().is_terminal();
    let mut ok = true;
    for result in translator.translate_batch(units) {
        match result {
            Ok(translation) => {
                report_warnings(&translation, use_color);
                if let Some(dir) = output {
                    write_artifacts(dir, &translation)?;
                }
            }
            Err(failure) => {
                ok = false;
                report_failure(&failure, use_color);
            }
        }
    }
    Ok(ok)
}

fn report_warnings(translation: &Translation, use_color: bool) {
    let config = ErrorConfig::new(use_color).with_filename(translation.artifacts.source_path.clone());
    for diagnostic in &translation.diagnostics {
        eprint!("{}", diagnostic.render(&config, None));
    }
}

fn report_failure(failure: &TranslationFailure, use_color: bool) {
    let config = ErrorConfig::new(use_color).with_filename(failure.source_path.clone());
    let source_map = failure.source_text.as_deref().map(SourceMap::new);
    let diagnostic: Diagnostic = failure.diagnostic();
    eprint!("{}", diagnostic.render(&config, source_map.as_ref()));
}

fn write_artifacts(dir: &Path, translation: &Translation) -> Result<(), String> {
    let artifacts = &translation.artifacts;
    for (relative, text) in [
        (&artifacts.header_path, &artifacts.header),
        (&artifacts.source_path, &artifacts.source),
    ] {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
        fs::write(&path, text).map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
    }
    Ok(())
}
