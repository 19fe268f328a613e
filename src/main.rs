use clap::Parser as ClapParser;

use retro_basic::controller::install_interrupt_handler;
use retro_basic::shell::Shell;

/// Interactive interpreter for a line-numbered dialect of BASIC.
#[derive(ClapParser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Program file to load
    file: Option<std::path::PathBuf>,

    /// Load FILE and RUN it immediately instead of opening the REPL
    #[arg(short, long)]
    run: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    simple_logger::init_with_level(level).unwrap();
    install_interrupt_handler();

    let mut shell = Shell::new();

    match (&args.file, args.run) {
        (Some(path), true) => {
            if let Err(e) = shell.run_file(&path.to_string_lossy()) {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
        (Some(path), false) => {
            if let Err(e) = shell.load_and_enter_repl(&path.to_string_lossy()) {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
        (None, _) => shell.repl(),
    }
}
