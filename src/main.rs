use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{CommandFactory, Parser as ClapParser, ValueEnum, error::ErrorKind};
use colored::Colorize;
use jsoptc::{
    CompileError, CompiledModule, CompilerOptions, FileSystemResolver, Project, compile_project,
    project::dump_project_hir,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// Optimized JavaScript
    Js,
    /// The optimized HIR of every module
    Hir,
}

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Entry module of the program
    entry: PathBuf,

    /// Output file. When the program has several modules this is a
    /// directory mirroring the source layout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Emit::Js)]
    emit: Emit,

    #[arg(long)]
    no_constant_propagation: bool,

    #[arg(long)]
    no_load_store_forwarding: bool,

    #[arg(long)]
    no_dead_code_elimination: bool,

    #[arg(long)]
    no_function_inlining: bool,

    #[arg(long)]
    no_redundant_copy_elimination: bool,

    #[arg(long)]
    no_merge_blocks: bool,

    /// Disable every optimization pass
    #[arg(long)]
    no_optimize: bool,

    /// Cap on rounds of each fixed-point loop
    #[arg(long, default_value_t = 64)]
    max_iterations: usize,

    /// Log compiler progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn options(&self) -> CompilerOptions {
        if self.no_optimize {
            return CompilerOptions {
                max_optimizer_iterations: self.max_iterations,
                ..CompilerOptions::unoptimized()
            };
        }

        CompilerOptions {
            enable_constant_propagation_pass: !self.no_constant_propagation,
            enable_load_store_forwarding_pass: !self.no_load_store_forwarding,
            enable_late_dead_code_elimination_pass: !self.no_dead_code_elimination,
            enable_function_inlining_pass: !self.no_function_inlining,
            enable_redundant_copy_elimination_pass: !self.no_redundant_copy_elimination,
            enable_merge_blocks_pass: !self.no_merge_blocks,
            max_optimizer_iterations: self.max_iterations,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match args.verbose {
        true => EnvFilter::new("jsoptc=debug"),
        false => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if !args.entry.is_file() {
        Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("Entry module '{}' is not a file!", args.entry.display()),
            )
            .exit()
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            if !error.is_user_error() {
                eprintln!("{} this is a bug in jsoptc", "note:".cyan().bold());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), CompileError> {
    let options = args.options();
    debug!(?options, "compiling");

    let project = Project::load(&args.entry, &FileSystemResolver)?;
    let modules = match args.emit {
        Emit::Js => compile_project(&project, &options)?,
        Emit::Hir => dump_project_hir(&project, &options)?,
    };

    // Nothing is written unless every module compiled
    match (&args.output, modules.as_slice()) {
        (None, [module]) => print!("{}", module.code),
        (None, modules) => {
            for module in modules {
                println!("{}", format!("// {}", module.path.display()).dimmed());
                print!("{}", module.code);
            }
        }
        (Some(output), [module]) => write(output, &module.code)?,
        (Some(output), modules) => {
            let root = project.entry().parent().unwrap_or_else(|| Path::new(""));
            for module in modules {
                write(&output.join(output_name(module, root)), &module.code)?;
            }
        }
    }

    Ok(())
}

/// Where a module lands inside the output directory
fn output_name(module: &CompiledModule, root: &Path) -> PathBuf {
    let relative = module
        .path
        .strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| module.path.file_name().map(PathBuf::from).unwrap_or_default());

    match relative.extension().and_then(|extension| extension.to_str()) {
        Some("ts") => relative.with_extension("js"),
        _ => relative,
    }
}

fn write(path: &Path, contents: &str) -> Result<(), CompileError> {
    let io_error = |source| CompileError::Io {
        path: path.to_owned(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, contents).map_err(io_error)
}
