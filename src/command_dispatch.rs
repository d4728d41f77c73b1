//! Purpose: Route parsed CLI commands to their handlers.
//! Role: Keeps `main.rs` focused on parsing, bootstrap, and error emission.
//! Invariants: Handlers return `Error` values; nothing here exits the process.
use super::*;

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "murmur", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let config = serve_config_from_args(args)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Chat {
            client,
            username,
            message,
            json,
        } => {
            let remote = client.connect()?;
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let username = match username {
                Some(username) => username,
                None => prompt("enter your username: ", &mut input)?,
            };
            let body = match message {
                Some(body) => body,
                None => prompt("enter your message: ", &mut input)?,
            };
            let id = remote.publish(&username, &body)?;
            if json {
                emit_json_line(&json!({ "id": id }));
            } else {
                println!("sent message {}", short_id(&id));
            }
            Ok(RunOutcome::ok())
        }
        Command::Listen { client, json } => {
            let remote = client.connect()?;
            let time_format = listen_time_format()?;
            let mut stream = remote.list()?;
            let mut stdout = io::stdout().lock();
            while let Some(message) = stream.next_message()? {
                let line = if json {
                    serde_json::to_string(&message).map_err(|err| {
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to encode message json")
                            .with_source(err)
                    })?
                } else {
                    render_message_human(&message, &time_format)?
                };
                if let Err(err) = writeln!(stdout, "{line}") {
                    // Closed pipe (e.g. `| head`): stop reading and let the server abort.
                    if err.kind() == io::ErrorKind::BrokenPipe {
                        stream.cancel();
                        break;
                    }
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("failed to write stdout")
                        .with_source(err));
                }
            }
            Ok(RunOutcome::ok())
        }
        Command::Delete {
            client,
            prefix,
            json,
        } => {
            let remote = client.connect()?;
            let prefix = match prefix {
                Some(prefix) => prefix,
                None => {
                    let stdin = io::stdin();
                    let mut input = stdin.lock();
                    prompt("enter message id (first 4 - 8 characters): ", &mut input)?
                }
            };
            let prefix = prefix.trim().to_string();
            let deleted = remote.delete(&prefix).map_err(|err| {
                if err.kind() == ErrorKind::NotFound && err.hint().is_none() {
                    err.with_hint("Run `murmur listen` to see current message ids.")
                } else {
                    err
                }
            })?;
            if json {
                emit_json_line(&json!({ "deleted": deleted }));
            } else {
                println!("deleted {prefix}");
            }
            Ok(RunOutcome::ok())
        }
    }
}
