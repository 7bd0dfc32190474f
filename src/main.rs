use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};
use memmap2::Mmap;

use rox::ast_printer::AstPrinter;
use rox::parser::Parser;
use rox::scanner::{self, Scanner};
use rox::{Lox, Outcome};

/// Exit status for syntax and resolution errors.
const EXIT_COMPILE_ERROR: i32 = 65;

/// Exit status for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 70;

#[derive(ClapParser, Debug)]
#[command(version, about = "Lox language interpreter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,

    /// Enable logging to app.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes input from a file, printing each token
    Tokenize {
        filename: PathBuf,

        /// Print one JSON object per token
        #[arg(long)]
        json: bool,
    },

    /// Parses a file as a program and prints its syntax tree
    Parse { filename: PathBuf },

    /// Runs a file as a Lox program, or starts a prompt when none is given
    Run { filename: Option<PathBuf> },
}

/// Reads the contents of a UTF-8 source file.
fn read_file(filename: &Path) -> Result<String> {
    info!("Reading file: {:?}", filename);
    let file = File::open(filename).context(format!("Failed to open file {:?}", filename))?;

    let len = file
        .metadata()
        .context(format!("Failed to stat file {:?}", filename))?
        .len();

    // Mapping a zero-length file fails on some platforms.
    if len == 0 {
        return Ok(String::new());
    }

    // SAFETY: the mapping is read once and copied out before it is dropped.
    let mmap = unsafe { Mmap::map(&file) }.context(format!("Failed to map file {:?}", filename))?;

    let text = std::str::from_utf8(&mmap)
        .context(format!("File {:?} is not valid UTF-8", filename))?
        .to_owned();

    info!("Read {} bytes from {:?}", text.len(), filename);

    Ok(text)
}

fn init_logger() -> Result<()> {
    // Create or open the log file
    let log_file = File::create("app.log").context("Failed to create app.log")?;

    // Configure env_logger to write to file with statement number and source line
    Builder::new()
        .format(|buf, record| {
            let module = record.module_path().unwrap_or("<unnamed>");
            let module = module.strip_prefix("rox::").unwrap_or(module);
            writeln!(
                buf,
                "[{}:{}] - {}",
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug) // Default to Debug, override with RUST_LOG
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized, writing to app.log");
    Ok(())
}

fn tokenize(filename: &Path, json: bool) -> Result<()> {
    info!("Running Tokenize subcommand");
    let source = read_file(filename)?;
    let mut tokenized = true;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    for result in Scanner::new(&source) {
        match result {
            Ok(token) => {
                debug!("Scanned token: {}", token);

                if json {
                    writeln!(out, "{}", serde_json::to_string(&token)?)?;
                } else {
                    writeln!(out, "{}", token)?;
                }
            }

            Err(e) => {
                tokenized = false;
                debug!("Tokenization debug: {}", e);
                eprintln!("{}", e);
            }
        }
    }

    out.flush()?;

    if !tokenized {
        debug!("Tokenization failed, exiting with code {}", EXIT_COMPILE_ERROR);
        std::process::exit(EXIT_COMPILE_ERROR);
    }

    info!("Tokenization completed successfully");
    Ok(())
}

fn parse(filename: &Path) -> Result<()> {
    info!("Running Parse subcommand");
    let source = read_file(filename)?;

    let (tokens, mut errors) = scanner::scan(&source);
    let (program, parse_errors) = Parser::new(tokens).parse();
    errors.extend(parse_errors);

    if !errors.is_empty() {
        for e in &errors {
            debug!("Parse debug: {}", e);
            eprintln!("{}", e);
        }
        std::process::exit(EXIT_COMPILE_ERROR);
    }

    println!("{}", AstPrinter::print_program(&program));

    info!("Parse subcommand completed");
    Ok(())
}

fn run_file(filename: &Path) -> Result<()> {
    info!("Running Run subcommand");
    let source = read_file(filename)?;
    info!("Provided input:\n {}", source);

    let mut lox = Lox::new(io::stdout(), io::stderr());

    match lox.run(&source) {
        Outcome::Success => {
            info!("Program executed successfully");
            Ok(())
        }

        Outcome::CompileError(diagnostics) => {
            debug!("{} compile error(s)", diagnostics.len());
            std::process::exit(EXIT_COMPILE_ERROR);
        }

        Outcome::RuntimeError(diagnostic) => {
            debug!("Runtime debug: {:?}", diagnostic);
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

/// Interactive prompt.  Errors are reported and the session carries on;
/// globals survive from one line to the next.
fn run_prompt() -> Result<()> {
    info!("Starting REPL");

    let mut lox = Lox::new(io::stdout(), io::stderr());
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            // EOF (ctrl-D)
            println!();
            break;
        }

        let source = complete_statement(line.trim_end());
        if source.is_empty() {
            continue;
        }

        let outcome = lox.run(&source);
        debug!("REPL outcome: {:?}", outcome);
    }

    info!("REPL finished");
    Ok(())
}

/// Let prompt users leave off the trailing `;` of a one-line statement.
fn complete_statement(line: &str) -> String {
    if line.is_empty() || line.ends_with(';') || line.ends_with('}') {
        line.to_string()
    } else {
        format!("{};", line)
    }
}

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    // Initialize logger only if --log flag is provided
    if args.log {
        init_logger()?;
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .parse_env("RUST_LOG")
            .init();
    }

    info!("CLI arguments: {:?}", args);

    match args.commands {
        Commands::Tokenize { filename, json } => tokenize(&filename, json),
        Commands::Parse { filename } => parse(&filename),
        Commands::Run { filename } => match filename {
            Some(filename) => run_file(&filename),
            None => run_prompt(),
        },
    }
}
