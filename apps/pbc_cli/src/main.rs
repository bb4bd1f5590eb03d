//! `pbc` — command-line driver for the PB-to-C99 compiler.
//!
//! Three subcommands over one pipeline: `toc` stops after emitting C,
//! `build` additionally shells out to a C compiler to produce an
//! executable, `run` builds then executes it. The compiler driver and the
//! runtime archive's own build are external collaborators (out of scope for
//! this crate); `build`/`run` only assemble the command line for them.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::{Parser, Subcommand};

use pbc_base::Interner;
use pbc_compile::{compile_root_module, CompileOutput};

/// Command-line interface for the PB-to-C99 compiler.
#[derive(Parser)]
#[command(name = "pbc")]
#[command(about = "Compiles PB source to C99", long_about = None)]
#[command(version)]
struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Print progress to stderr as each module is compiled.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Dump intermediate artifacts (tokens, AST) alongside the generated C.
    #[arg(short = 'd', long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a `.pb` source file to C99, writing `.c`/`.h` pairs and
    /// stopping there (no linking).
    ///
    /// # Example
    ///
    /// ```bash
    /// pbc toc main.pb
    /// ```
    Toc {
        /// The `.pb` entry file to compile.
        source: PathBuf,

        /// Directory to write the generated `.c`/`.h` files into.
        #[arg(short = 'o', long, default_value = "build")]
        out_dir: PathBuf,
    },

    /// Compile a `.pb` source file to C99 and link it into an executable
    /// using the system C compiler.
    ///
    /// # Example
    ///
    /// ```bash
    /// pbc build main.pb
    /// ```
    Build {
        /// The `.pb` entry file to compile.
        source: PathBuf,

        /// Directory to write the generated sources and executable into.
        #[arg(short = 'o', long, default_value = "build")]
        out_dir: PathBuf,
    },

    /// Build a `.pb` source file, then immediately execute the resulting
    /// binary, forwarding any trailing arguments to it.
    ///
    /// # Example
    ///
    /// ```bash
    /// pbc run main.pb -- --flag value
    /// ```
    Run {
        /// The `.pb` entry file to compile.
        source: PathBuf,

        /// Directory to write the generated sources and executable into.
        #[arg(short = 'o', long, default_value = "build")]
        out_dir: PathBuf,

        /// Arguments forwarded to the compiled program.
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() {
    env_logger::init();
    if let Err(e) = run_cli() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Toc { source, out_dir } => cmd_toc(&source, &out_dir, cli.verbose, cli.debug),
        Commands::Build { source, out_dir } => cmd_build(&source, &out_dir, cli.verbose, cli.debug).map(|_| ()),
        Commands::Run { source, out_dir, args } => cmd_run(&source, &out_dir, &args, cli.verbose, cli.debug),
    }
}

fn cmd_toc(source: &Path, out_dir: &Path, verbose: bool, debug: bool) -> Result<(), Box<dyn std::error::Error>> {
    let output = compile(source, verbose, debug)?;
    write_output(out_dir, &output)?;
    if verbose {
        eprintln!("wrote {} module(s) to {}", output.modules.len(), out_dir.display());
    }
    Ok(())
}

fn cmd_build(source: &Path, out_dir: &Path, verbose: bool, debug: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let output = compile(source, verbose, debug)?;
    write_output(out_dir, &output)?;

    let exe_name = source.file_stem().and_then(|s| s.to_str()).unwrap_or("a.out");
    let exe_path = out_dir.join(exe_name);

    let cc = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let mut cmd = Command::new(&cc);
    cmd.arg("-std=c99").arg("-o").arg(&exe_path);
    for module in &output.modules {
        cmd.arg(out_dir.join(&module.c_file_name));
    }
    for dir in &output.vendor.include_dirs {
        cmd.arg(format!("-I{dir}"));
    }
    for dir in &output.vendor.lib_dirs {
        cmd.arg(format!("-L{dir}"));
    }
    cmd.args(&output.vendor.link_flags);

    if verbose {
        eprintln!("running: {cmd:?}");
    }
    let status = cmd.status().map_err(|e| format!("failed to invoke '{cc}': {e}"))?;
    if !status.success() {
        return Err(format!("{cc} exited with {status}").into());
    }
    Ok(exe_path)
}

fn cmd_run(source: &Path, out_dir: &Path, args: &[String], verbose: bool, debug: bool) -> Result<(), Box<dyn std::error::Error>> {
    let exe_path = cmd_build(source, out_dir, verbose, debug)?;
    let status = Command::new(&exe_path).args(args).status().map_err(|e| format!("failed to run '{}': {e}", exe_path.display()))?;
    std::process::exit(status.code().unwrap_or(1));
}

fn compile(source: &Path, verbose: bool, debug: bool) -> Result<CompileOutput, Box<dyn std::error::Error>> {
    let mut interner = Interner::new();
    if verbose {
        eprintln!("compiling {}", source.display());
    }
    let output = compile_root_module(source, &mut interner)?;
    if debug {
        eprintln!("{} module(s) in compiled graph", output.modules.len());
    }
    Ok(output)
}

fn write_output(out_dir: &Path, output: &CompileOutput) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(out_dir)?;
    fs::write(out_dir.join("pbrt.h"), &output.runtime_header)?;
    for module in &output.modules {
        fs::write(out_dir.join(&module.h_file_name), &module.header)?;
        fs::write(out_dir.join(&module.c_file_name), &module.source)?;
    }
    Ok(())
}
