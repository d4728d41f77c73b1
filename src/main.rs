//! Purpose: `murmur` CLI entry point: server plus chat/listen/delete client modes.
//! Role: Binary crate root; parses args, runs commands, prints results on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Client modes talk to a running server only through `api::RemoteClient`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, BufRead, IsTerminal, Write};
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use time::format_description::BorrowedFormatItem;
use std::error::Error as StdError;

mod command_dispatch;
mod serve;

use murmur::api::{Error, ErrorKind, Message, RemoteClient, short_id, to_exit_code};

const DEFAULT_SERVER: &str = "http://127.0.0.1:50051";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_io_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "murmur",
    version,
    about = "In-memory chat message board over HTTP",
    long_about = None,
    before_help = r#"One server holds the messages in memory; clients publish, list, and delete.
Nothing is persisted: restarting the server clears the board.

Mental model:
  - `serve` runs the board
  - `chat` publishes a message (write)
  - `listen` prints every message currently on the board (read)
  - `delete` removes the oldest message whose id starts with a prefix
"#,
    after_help = r#"EXAMPLES
  $ murmur serve                          # Terminal 1
  $ murmur chat -u alice -m "hello"       # Terminal 2
  sent message 3f2a9c1d
  $ murmur listen
  [@alice] 2026-10-17 09:30:12
    hello
  $ murmur delete 3f2a
  deleted 3f2a"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Run the message board server",
        long_about = r#"Serve the in-memory message board over HTTP/JSON.

Routes:
  GET    /healthz
  POST   /v0/messages            {"sender_username": "...", "body": "..."}
  GET    /v0/messages            JSONL snapshot, oldest first
  DELETE /v0/messages/<prefix>   removes the oldest id starting with <prefix>"#,
        after_help = r#"EXAMPLES
  $ murmur serve
  $ murmur serve --bind 127.0.0.1:7000
  $ RUST_LOG=debug murmur serve

NOTES
  - Loopback-only unless --allow-non-loopback is set
  - Log level comes from RUST_LOG (default: info)"#
    )]
    Serve(ServeArgs),
    #[command(
        about = "Publish a message",
        long_about = r#"Publish one message. Prompts on stdin for anything not given as a flag."#,
        after_help = r#"EXAMPLES
  $ murmur chat
  enter your username: alice
  enter your message: hello
  sent message 3f2a9c1d
  $ murmur chat -u bob -m "yo" --json"#
    )]
    Chat {
        #[command(flatten)]
        client: ClientArgs,
        #[arg(short, long, help = "Sender username (prompted when omitted)")]
        username: Option<String>,
        #[arg(short, long, help = "Message body (prompted when omitted)")]
        message: Option<String>,
        #[arg(long, help = "Emit JSON instead of human-readable output")]
        json: bool,
    },
    #[command(
        about = "Print every message currently on the board",
        long_about = r#"Stream a snapshot of the board, oldest first. Messages published after the
snapshot is taken are not included.

Times are shown in UTC; --json keeps the raw {seconds, nanos} value."#,
        after_help = r#"EXAMPLES
  $ murmur listen
  $ murmur listen --json | jq .body"#
    )]
    Listen {
        #[command(flatten)]
        client: ClientArgs,
        #[arg(long, help = "Emit one JSON object per line")]
        json: bool,
    },
    #[command(
        about = "Delete a message by id prefix",
        long_about = r#"Delete the oldest message whose id starts with PREFIX.
Only one message is removed even when several ids share the prefix."#,
        after_help = r#"EXAMPLES
  $ murmur delete 3f2a
  $ murmur delete
  enter message id (first 4 - 8 characters): 3f2a9c1d

NOTES
  - Exits 3 when no message matches"#
    )]
    Delete {
        #[command(flatten)]
        client: ClientArgs,
        #[arg(help = "Message id prefix (prompted when omitted)")]
        prefix: Option<String>,
        #[arg(long, help = "Emit JSON instead of human-readable output")]
        json: bool,
    },
    #[command(about = "Print version info")]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ murmur completion bash > ~/.local/share/bash-completion/completions/murmur
  $ murmur completion zsh > ~/.zfunc/_murmur"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(
        long,
        default_value = serve::DEFAULT_BIND,
        help = "Bind address",
        help_heading = "Connection"
    )]
    bind: String,
    #[arg(
        long,
        help = "Allow non-loopback binds (anyone who can reach the port can post and delete)",
        help_heading = "Safety"
    )]
    allow_non_loopback: bool,
    #[arg(
        long,
        default_value_t = serve::DEFAULT_MAX_BODY_BYTES,
        help = "Max request body size in bytes",
        help_heading = "Safety"
    )]
    max_body_bytes: u64,
    #[arg(
        long,
        default_value_t = serve::DEFAULT_MAX_LIST_CONCURRENCY,
        help = "Max concurrent list streams",
        help_heading = "Safety"
    )]
    max_list_concurrency: usize,
}

#[derive(Args)]
struct ClientArgs {
    #[arg(
        long,
        default_value = DEFAULT_SERVER,
        help = "Server base url",
        help_heading = "Connection"
    )]
    server: String,
    #[arg(
        long,
        default_value_t = 60,
        help = "Request timeout in seconds",
        help_heading = "Connection"
    )]
    timeout_secs: u64,
}

impl ClientArgs {
    fn connect(&self) -> Result<RemoteClient, Error> {
        if self.timeout_secs == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--timeout-secs must be greater than zero")
                .with_hint("Use a positive value like 60."));
        }
        Ok(RemoteClient::new(self.server.clone())?
            .with_timeout(Duration::from_secs(self.timeout_secs)))
    }
}

fn serve_config_from_args(args: ServeArgs) -> Result<serve::ServeConfig, Error> {
    let bind: SocketAddr = args.bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:50051.")
    })?;
    Ok(serve::ServeConfig {
        bind,
        allow_non_loopback: args.allow_non_loopback,
        max_body_bytes: args.max_body_bytes,
        max_concurrent_lists: args.max_list_concurrency,
    })
}

/// Prints `label` and reads one line, without its line ending. EOF yields "".
fn prompt<R: BufRead>(label: &str, input: &mut R) -> Result<String, Error> {
    let mut stdout = io::stdout();
    write!(stdout, "{label}")
        .and_then(|()| stdout.flush())
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write prompt")
                .with_source(err)
        })?;
    read_answer(input)
}

fn read_answer<R: BufRead>(input: &mut R) -> Result<String, Error> {
    let mut line = String::new();
    input.read_line(&mut line).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read stdin")
            .with_source(err)
    })?;
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(trimmed.to_string())
}

fn listen_time_format() -> Result<Vec<BorrowedFormatItem<'static>>, Error> {
    time::format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]").map_err(
        |err| {
            Error::new(ErrorKind::Internal)
                .with_message("invalid time format description")
                .with_source(err)
        },
    )
}

fn render_message_human(
    message: &Message,
    time_format: &[BorrowedFormatItem<'_>],
) -> Result<String, Error> {
    let sent_at = message
        .sent_at
        .to_offset_date_time()?
        .format(time_format)
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("timestamp format failed")
                .with_id(message.id.clone())
                .with_source(err)
        })?;
    Ok(format!(
        "[@{}] {sent_at}\n  {}",
        message.sender_username, message.body
    ))
}

fn emit_json_line(value: &Value) {
    let json = serde_json::to_string(value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("murmur {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json_line(&json!({
            "name": "murmur",
            "version": env!("CARGO_PKG_VERSION"),
        }));
    }
}

fn add_io_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    if err.message() == Some("request failed") {
        return err.with_hint("Is `murmur serve` running? Check --server.");
    }
    err
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Busy => "server is busy".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(id) = err.id() {
        inner.insert("id".to_string(), json!(id));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(id) = err.id() {
        lines.push(format!(
            "{} {id}",
            colorize_label("id:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `murmur --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "murmur") else {
        return "Try `murmur --help`.".to_string();
    };

    let mut parts = Vec::new();
    for token in tokens.iter().skip(pos + 1) {
        if token.starts_with('-') || token.starts_with('<') || token.starts_with('[') {
            break;
        }
        parts.push(*token);
    }

    if parts.is_empty() {
        return "Try `murmur --help`.".to_string();
    }
    format!("Try `murmur {} --help`.", parts.join(" "))
}
