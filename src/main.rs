use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser as _;
use snafu::ResultExt;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use rat24s::error::IoSnafu;
use rat24s::{
  Compilation, CompileResult, CompilerOptions, DEFAULT_BASE_ADDRESS, Verdict, compile, tokenizer,
};

/// Syntax analyzer and stack-machine code generator for RAT24S.
#[derive(clap::Parser, Debug)]
#[command(name = "rat24s", version, long_about = None)]
struct Cli {
  /// Path to the source file to compile
  #[arg(value_name = "SOURCE")]
  source: PathBuf,

  /// Print the source code and the tokens
  #[arg(short = 'p', long)]
  print_all: bool,

  /// Print the tokens returned by the tokenizer
  #[arg(short = 't', long)]
  print_tokens: bool,

  /// Write the token listing to a file
  #[arg(long, value_name = "FILE")]
  save_tokens: Option<PathBuf>,

  /// Print the productions used by the parser
  #[arg(long)]
  print_productions: bool,

  /// Write the productions used by the parser to a file
  #[arg(short = 's', long, value_name = "FILE")]
  save_productions: Option<PathBuf>,

  /// Write the instruction listing and symbol tables to a file
  #[arg(short, long, value_name = "FILE")]
  output: Option<PathBuf>,

  /// First memory address handed to declared identifiers
  #[arg(long, env = "RAT24S_BASE_ADDRESS", default_value_t = DEFAULT_BASE_ADDRESS)]
  base_address: u32,
}

fn main() {
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "rat24s=warn".into()))
    .with(fmt::layer().with_writer(io::stderr))
    .init();

  let cli = Cli::parse();
  match run(&cli) {
    Ok(true) => {}
    Ok(false) => process::exit(1),
    Err(err) => {
      eprintln!("error: {err}");
      process::exit(1);
    }
  }
}

/// Compile the file named on the command line. Returns whether the program
/// is valid.
fn run(cli: &Cli) -> CompileResult<bool> {
  let raw = fs::read_to_string(&cli.source).context(IoSnafu {
    path: cli.source.clone(),
  })?;
  let source = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

  let options = CompilerOptions {
    base_address: cli.base_address,
    trace: cli.print_productions || cli.save_productions.is_some(),
  };
  let compilation = compile(source, &options);
  info!(
    path = %cli.source.display(),
    tokens = compilation.tokens.len(),
    instructions = compilation.instructions.len(),
    functions = compilation.functions.len(),
    "compiled"
  );

  if let Some(path) = &cli.save_tokens {
    write_file(path, |sink| tokenizer::write_listing(&compilation.tokens, sink))?;
  }
  if cli.print_all {
    println!("{} Source Code {}", "=".repeat(32), "=".repeat(33));
    println!("{source}");
    println!("{}\n", "=".repeat(80));
  }
  if cli.print_all || cli.print_tokens {
    println!("{} Tokens ({}) {}", "=".repeat(32), compilation.tokens.len(), "=".repeat(33));
    let mut stdout = io::stdout().lock();
    tokenizer::write_listing(&compilation.tokens, &mut stdout).context(IoSnafu { path: "<stdout>" })?;
    println!("{}", "=".repeat(80));
  }

  if cli.print_productions {
    let mut stdout = io::stdout().lock();
    compilation
      .trace
      .write_to(&mut stdout)
      .context(IoSnafu { path: "<stdout>" })?;
  }
  if let Some(path) = &cli.save_productions {
    write_file(path, |sink| compilation.trace.write_to(sink))?;
  }
  if let Some(path) = &cli.output {
    save_listing(path, &compilation)?;
  }

  Ok(report(&compilation.verdict))
}

fn report(verdict: &Verdict) -> bool {
  match verdict {
    Verdict::Valid => {
      println!("Valid RAT24S program");
      true
    }
    Verdict::Invalid { production, error } => {
      println!("Invalid RAT24S program");
      let kind = if error.is_semantic() {
        "semantic error"
      } else {
        "syntax error"
      };
      eprintln!("{kind} in {production}: {error}");
      false
    }
  }
}

/// Main listing, each function's listing, then every symbol table appended.
fn save_listing(path: &Path, compilation: &Compilation) -> CompileResult<()> {
  write_file(path, |sink| {
    compilation.instructions.write_listing(sink)?;
    for unit in &compilation.functions {
      writeln!(sink, "\nfunction {}", unit.name)?;
      unit.instructions.write_listing(sink)?;
    }
    writeln!(sink)
  })?;

  compilation
    .symbols
    .save(path, true)
    .context(IoSnafu { path })?;
  for unit in &compilation.functions {
    unit.symbols.save(path, true).context(IoSnafu { path })?;
  }
  Ok(())
}

fn write_file(
  path: &Path,
  write: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> CompileResult<()> {
  let file = File::create(path).context(IoSnafu { path })?;
  let mut sink = BufWriter::new(file);
  write(&mut sink)
    .and_then(|()| sink.flush())
    .context(IoSnafu { path })
}
