use clap::{ArgAction, Parser};
use compiler::{CyclePolicy, Error, Options, SearchPath, Session};
use owo_colors::OwoColorize;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use std::ffi::OsString;
use std::fs;
use std::io::{stderr, stdout, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

#[derive(Parser, Debug)]
#[command(version, about = "Compile Python modules to Go", long_about = None)]
struct Args {
    /// Python script to compile
    script: PathBuf,
    /// Dotted module name; defaults to the script's file stem
    #[arg(short, long)]
    modname: Option<String>,
    /// Go workspace roots, separated like PATH
    #[arg(long, env = "PYGOC_PATH")]
    search_root: Option<OsString>,
    /// Also compile source-backed dependencies into their __pycache__
    /// workspaces
    #[arg(short, long)]
    recursive: bool,
    /// Write the compiled module into its __pycache__ workspace too
    #[arg(long)]
    cache: bool,
    #[arg(long, default_value_t = CyclePolicy::Guard)]
    cycles: CyclePolicy,
    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let config = ConfigBuilder::new().set_time_level(LevelFilter::Off).build();
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);

    let modname = args.modname.clone().unwrap_or_else(|| {
        args.script
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    if let Err(e) = run(&args, &modname) {
        report(&e, &args.script, &modname);
        exit(1);
    }
}

fn run(args: &Args, modname: &str) -> Result<(), Error> {
    let search_path = args
        .search_root
        .as_deref()
        .map(SearchPath::from_env_value)
        .unwrap_or_default();
    let options = Options {
        recursive: args.recursive,
        write_cache: args.cache,
        cycle_policy: args.cycles,
    };
    let script = fs::canonicalize(&args.script).unwrap_or_else(|_| args.script.clone());
    let mut session = Session::new(search_path, options)?;
    let code = session.compile(&script, modname)?;
    match &args.output {
        Some(path) => fs::write(path, code).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        }),
        None => stdout().write_all(code.as_bytes()).map_err(|source| Error::Io {
            path: PathBuf::from("<stdout>"),
            source,
        }),
    }
}

fn report(e: &Error, script: &Path, modname: &str) {
    if let Error::Syntax { module, .. } = e {
        if module == modname {
            if let Ok(src) = fs::read_to_string(script) {
                if let Err(parse_error) = parser::parse(&src) {
                    let name = script.to_string_lossy();
                    if parse_error.write(stderr(), &name, &src).is_ok() {
                        return;
                    }
                }
            }
        }
    }
    eprintln!("{} {e}", "error:".red().bold());
}
