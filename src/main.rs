//! runpane - an interactive console for a single program
//!
//! runpane launches `<PROGRAM_DIR>/run/main`, shows its colored output and
//! forwards keystrokes to it. stderr is shown as one block after the program
//! has exited.
//!
//! # Quick Start
//!
//! ```text
//! runpane ~/projects/demo     # Run ~/projects/demo/run/main
//! runpane -k                  # Interrupt every running run/main
//! ```
//!
//! # Keybindings
//!
//! | Key | Action |
//! |-----|--------|
//! | F5 | Start / kill the program |
//! | F2 | Reload configuration |
//! | F10 | Quit |
//! | PageUp/PageDown | Scroll output |
//! | Ctrl+C | Interrupt the program |
//! | Ctrl+L | Clear the output |

mod config;
mod core;
mod ui;

use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config;
use crate::core::ansi::StyleTag;
use crate::core::console::{Console, DisplaySink};
use crate::core::killall;
use crate::core::process::{ProcessState, Signal};
use crate::ui::{KeyMapper, Renderer};

/// Command line arguments
#[derive(Debug, Default)]
struct Args {
    /// Directory containing run/main
    program_dir: Option<PathBuf>,
    /// Interrupt every running program and exit
    kill_all: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("runpane {}", VERSION);
}

fn print_help() {
    eprintln!("runpane {} - Interactive console for a single program", VERSION);
    eprintln!();
    eprintln!("Usage: runpane [OPTIONS] [PROGRAM_DIR]");
    eprintln!();
    eprintln!("Runs PROGRAM_DIR/run/main (default: program_root from the config,");
    eprintln!("or the current directory).");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -k, --kill-all        Interrupt every running run/main and exit");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  F5                    Start / kill the program");
    eprintln!("  F2                    Reload configuration");
    eprintln!("  F10                   Quit");
    eprintln!("  PageUp/PageDown       Scroll output");
    eprintln!("  Ctrl+C                Interrupt the program");
    eprintln!("  Ctrl+L                Clear the output");
    eprintln!();
    eprintln!("Configuration: ~/.runpane/config.toml");
    eprintln!("Log file:      ~/.runpane/runpane.log (level from RUST_LOG or log_level)");
}

fn parse_args() -> Result<Args, String> {
    parse_arg_list(env::args().skip(1))
}

fn parse_arg_list(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();

    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-k" | "--kill-all" => {
                parsed.kill_all = true;
            }
            flag if flag.starts_with('-') => {
                return Err(format!("Unknown argument: {}. Use -h for help.", flag));
            }
            dir => {
                if parsed.program_dir.is_some() {
                    return Err(format!("Unexpected argument: {}", dir));
                }
                parsed.program_dir = Some(PathBuf::from(dir));
            }
        }
    }

    Ok(parsed)
}

/// Log to a file; the terminal belongs to the UI
fn init_logging(level: &str) {
    let log_path = Config::log_path().unwrap_or_else(|| PathBuf::from("runpane.log"));

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let settings = Config::load();
    init_logging(&settings.log_level);
    info!("runpane {} starting...", VERSION);

    if args.kill_all {
        let count = killall::kill_matching(&settings.kill_identifier, Signal::Interrupt)?;
        println!("Interrupted {} process(es) matching {:?}", count, settings.kill_identifier);
        return Ok(());
    }

    let program_root = match args.program_dir.or_else(|| settings.program_root.clone()) {
        Some(dir) => dir,
        None => env::current_dir()?,
    };

    run_console(settings, &program_root)
}

/// Run the interactive console until the user quits
fn run_console(mut settings: Config, program_root: &Path) -> anyhow::Result<()> {
    let mut console = Console::new(settings.console())?;
    let mut renderer = Renderer::new(settings.palette.clone(), settings.scrollback_lines);
    renderer.init()?;

    start_program(&mut console, &mut renderer, program_root);
    let result = run_main_loop(&mut console, &mut renderer, &mut settings, program_root);

    console.shutdown();
    renderer.cleanup()?;
    info!("runpane exiting");
    result
}

fn start_program(console: &mut Console, renderer: &mut Renderer, program_root: &Path) {
    if let Err(e) = console.start_program(program_root, renderer) {
        renderer.append_styled(&format!("{}\n", e), StyleTag::Red);
    }
}

fn status_line(console: &Console, program_root: &Path) -> String {
    let state = match (console.state(), console.pid()) {
        (ProcessState::Running, Some(pid)) => format!("Running, pid {}", pid),
        (ProcessState::Exiting, _) => "Stopping".to_string(),
        _ => "Stopped".to_string(),
    };
    format!(
        " {}  [{}]   F5 start/kill  F2 reload  F10 quit",
        program_root.display(),
        state
    )
}

fn run_main_loop(
    console: &mut Console,
    renderer: &mut Renderer,
    settings: &mut Config,
    program_root: &Path,
) -> anyhow::Result<()> {
    let mut next_tick = Instant::now();

    loop {
        if Instant::now() >= next_tick {
            console.tick(renderer);
            renderer.draw(&status_line(console, program_root))?;
            next_tick = Instant::now() + settings.tick();
        }

        let timeout = next_tick.saturating_duration_since(Instant::now());
        if !event::poll(timeout)? {
            continue;
        }

        match event::read()? {
            Event::Key(key_event) => {
                if key_event.kind == KeyEventKind::Press {
                    match key_event.code {
                        KeyCode::F(10) => {
                            info!("Quit requested");
                            break;
                        }
                        KeyCode::F(5) => {
                            if console.is_running() {
                                if let Err(e) = console.kill() {
                                    warn!("Kill failed: {}", e);
                                }
                            } else {
                                start_program(console, renderer, program_root);
                            }
                            continue;
                        }
                        KeyCode::F(2) => {
                            *settings = Config::load();
                            console.apply_config(settings.console());
                            info!("Configuration reloaded: {:?}", console.config());
                            renderer.set_palette(settings.palette.clone());
                            renderer.set_scrollback_lines(settings.scrollback_lines);
                            continue;
                        }
                        KeyCode::PageUp => {
                            renderer.page_up()?;
                            continue;
                        }
                        KeyCode::PageDown => {
                            renderer.page_down()?;
                            continue;
                        }
                        _ => {}
                    }
                }

                for input in KeyMapper::translate(&key_event, renderer.keyboard_enhanced()) {
                    if let Err(e) = console.handle_key(input, renderer) {
                        warn!("Input not delivered: {}", e);
                    }
                }
            }
            Event::Resize(_, _) => renderer.invalidate(),
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_arg_list(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_program_dir() {
        let parsed = args(&["/tmp/demo"]).unwrap();
        assert_eq!(parsed.program_dir, Some(PathBuf::from("/tmp/demo")));
        assert!(!parsed.kill_all);
    }

    #[test]
    fn test_parse_kill_all() {
        let parsed = args(&["--kill-all"]).unwrap();
        assert!(parsed.kill_all);
        assert!(parsed.program_dir.is_none());
        assert!(args(&["-k", "/tmp/demo"]).unwrap().kill_all);
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&["--bogus"]).is_err());
        assert!(args(&["a", "b"]).is_err());
    }
}
