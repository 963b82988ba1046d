//! termlink - a terminal client for remote command-execution servers
//!
//! termlink connects to a terminal server over Socket.IO, shows the remote
//! shell's output in a deduplicated scrollback and sends commands typed at
//! its prompt.
//!
//! # Features
//!
//! - **Scrollback cleanup**: ANSI codes stripped, spinner animations
//!   collapsed, re-printed progress lines suppressed
//! - **Persistent listeners**: event handlers survive reconnects
//! - **Command history**: Up/Down to recall previous commands
//! - **Resize tracking**: terminal size is forwarded to the server
//!
//! # Quick Start
//!
//! ```text
//! termlink -s http://localhost:5000 -t <token>
//! TERMLINK_TOKEN=<token> termlink -d /srv/app
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Enter | Run command (empty line sends a newline) |
//! | Up/Down | Browse history |
//! | Esc / Ctrl+U | Clear line |
//! | Ctrl+C, Ctrl+Z, ... | Send control character |
//! | PageUp/PageDown | Scroll output |
//! | Ctrl+R | Reconnect |
//! | Ctrl+D | Quit |

mod config;
mod core;
mod history;
mod ui;

use std::env;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Config, Overrides, TOKEN_ENV};
use crate::core::session::TerminalSession;
use crate::core::transport::{ConnectionStatus, Transport};
use crate::history::HistoryDirection;
use crate::ui::{row_count, Frame, InputAction, KeyMapper, LineEditor, Renderer};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("termlink {}", VERSION);
}

fn print_help() {
    eprintln!("termlink {} - Terminal client for remote command-execution servers", VERSION);
    eprintln!();
    eprintln!("Usage: termlink [OPTIONS]");
    eprintln!();
    eprintln!("Connection options:");
    eprintln!("  -s, --server <URL>    Server base URL (default: http://127.0.0.1:5000)");
    eprintln!("  -n, --namespace <NS>  Socket.IO namespace (default: /terminal)");
    eprintln!("  -t, --token <TOKEN>   Bearer token (or set {})", TOKEN_ENV);
    eprintln!("  -d, --cwd <DIR>       Initial working directory on the server");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Enter                 Run command");
    eprintln!("  Up/Down               Browse command history");
    eprintln!("  Esc, Ctrl+U           Clear the command line");
    eprintln!("  Ctrl+C                Interrupt the remote program");
    eprintln!("  PageUp/PageDown       Scroll output");
    eprintln!("  Ctrl+R                Reconnect");
    eprintln!("  Ctrl+D, exit          Quit");
    eprintln!();
    eprintln!("Configuration: ~/.termlink/config.toml");
    eprintln!("Log file:      ~/.termlink/termlink.log (level from RUST_LOG)");
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Overrides, String> {
    let mut overrides = Overrides::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().ok_or_else(|| format!("Missing {} argument", name));
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--server" => overrides.server = Some(value("server")?),
            "-n" | "--namespace" => overrides.namespace = Some(value("namespace")?),
            "-t" | "--token" => overrides.token = Some(value("token")?),
            "-d" | "--cwd" => overrides.initial_cwd = Some(value("cwd")?),
            other => {
                return Err(format!("Unknown argument: {}. Use -h for help.", other));
            }
        }
    }

    Ok(overrides)
}

/// Log to ~/.termlink/termlink.log; the terminal itself is in raw mode
fn init_logging() {
    let log_path = config::config_dir()
        .map(|dir| dir.join("termlink.log"))
        .unwrap_or_else(|| std::path::PathBuf::from("termlink.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let overrides = match parse_args(env::args().skip(1)) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("termlink {} starting...", VERSION);

    let mut config = Config::load()?;
    config.merge(overrides, env::var(TOKEN_ENV).ok());
    info!("Server: {} (namespace {})", config.server, config.namespace);

    run_terminal(&config)
}

fn run_terminal(config: &Config) -> anyhow::Result<()> {
    let transport = Transport::websocket(&config.server, &config.namespace);
    let mut session = TerminalSession::new(transport, config.session_options());

    let (cols, rows) = Renderer::size()?;
    info!("Terminal size: {}x{}", cols, rows);
    session.resize_terminal(cols, rows);

    let mut renderer = Renderer::new();
    renderer.init()?;

    if let Err(e) = session.connect_terminal() {
        error!("Initial connection failed: {}", e);
    }

    let result = run_main_loop(&mut session, &mut renderer, config);

    session.disconnect_terminal();
    let _ = renderer.cleanup();
    result
}

fn run_main_loop(
    session: &mut TerminalSession,
    renderer: &mut Renderer,
    config: &Config,
) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(10);
    let mut line = LineEditor::new();
    let mut scroll_offset = 0usize;
    let mut rendered_revision = None;
    let mut dirty = true;

    loop {
        if session.process_events() {
            dirty = true;
        }

        let revision = session.output().revision();
        if dirty || rendered_revision != Some(revision) {
            let state = session.state();
            renderer.render(&Frame {
                lines: session.output().lines(),
                status: session.status(),
                server: session.server(),
                cwd: &state.current_working_directory,
                input: &line,
                scroll_offset,
                show_status_bar: config.status_bar.visible,
            })?;
            rendered_revision = Some(revision);
            dirty = false;
        }

        if !event::poll(poll_timeout)? {
            continue;
        }

        match event::read()? {
            Event::Key(key_event) => {
                // Only process key press events
                if key_event.kind != KeyEventKind::Press {
                    continue;
                }
                let Some(action) = KeyMapper::map(&key_event) else {
                    continue;
                };
                dirty = true;

                if line.apply(&action) {
                    if action == InputAction::ClearLine {
                        session.reset_history_index();
                    }
                    continue;
                }

                match action {
                    InputAction::Submit => {
                        let command = line.take();
                        let command = command.trim();
                        scroll_offset = 0;
                        if command == "exit" {
                            info!("Exit requested");
                            break;
                        }
                        if command.is_empty() {
                            session.send_input("\n");
                        } else {
                            session.execute_command(command);
                        }
                    }
                    InputAction::HistoryUp => {
                        if let Some(command) = session.browse_history(HistoryDirection::Up) {
                            line.set(&command);
                        }
                    }
                    InputAction::HistoryDown => {
                        if let Some(command) = session.browse_history(HistoryDirection::Down) {
                            line.set(&command);
                        }
                    }
                    InputAction::SendRaw(text) => session.send_input(&text),
                    InputAction::ScrollUp => {
                        let (_, rows) = Renderer::size()?;
                        let max = row_count(session.output().lines()).saturating_sub(1);
                        scroll_offset = (scroll_offset + rows as usize / 2).min(max);
                    }
                    InputAction::ScrollDown => {
                        let (_, rows) = Renderer::size()?;
                        scroll_offset = scroll_offset.saturating_sub(rows as usize / 2);
                    }
                    InputAction::Reconnect => {
                        if session.status() != ConnectionStatus::Disconnected {
                            warn!("Reconnect requested while {}; ignoring", session.status());
                        } else if let Err(e) = session.connect_terminal() {
                            error!("Reconnect failed: {}", e);
                        }
                    }
                    InputAction::Quit => {
                        info!("Quit requested");
                        break;
                    }
                    _ => {}
                }
            }

            Event::Resize(cols, rows) => {
                info!("Resize: {}x{}", cols, rows);
                session.resize_terminal(cols, rows);
                dirty = true;
            }

            Event::Paste(text) => {
                for ch in text.chars().filter(|c| !c.is_control()) {
                    line.apply(&InputAction::Insert(ch));
                }
                dirty = true;
            }

            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_connection_flags() {
        let overrides = parse_args(args(&["-s", "http://host:1", "--token", "abc", "-d", "/srv"])).unwrap();
        assert_eq!(overrides.server.as_deref(), Some("http://host:1"));
        assert_eq!(overrides.token.as_deref(), Some("abc"));
        assert_eq!(overrides.initial_cwd.as_deref(), Some("/srv"));
        assert_eq!(overrides.namespace, None);
    }

    #[test]
    fn test_parse_missing_value() {
        assert_eq!(parse_args(args(&["--server"])), Err("Missing server argument".to_string()));
    }

    #[test]
    fn test_parse_unknown_flag() {
        assert!(parse_args(args(&["--bogus"])).unwrap_err().contains("Unknown argument"));
    }
}
