use std::process;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::{Level, debug};

/// Compile a tiny C-like program into x86-64 assembly on stdout.
#[derive(Debug, Parser)]
#[command(name = "r9cc", version, about)]
struct Cli {
  /// The whole program text, e.g. "a = 3; return a * 2;"
  #[arg(allow_hyphen_values = true)]
  source: String,

  /// Log pipeline stages to stderr (-v for debug, -vv for trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

fn init_logging(verbose: u8) {
  let level = match verbose {
    0 => Level::WARN,
    1 => Level::DEBUG,
    _ => Level::TRACE,
  };
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_max_level(level)
    .init();
}

fn main() {
  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
      err.exit()
    }
    Err(err) => {
      let _ = err.print();
      process::exit(1);
    }
  };
  init_logging(cli.verbose);
  debug!(bytes = cli.source.len(), "compiling");

  match r9cc::generate_assembly(&cli.source) {
    Ok(asm) => print!("{asm}"),
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  }
}
