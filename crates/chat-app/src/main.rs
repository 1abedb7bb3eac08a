use std::io::Write;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use trilha::chat::{ChatHistory, Message, Mode};
use trilha::error::{GatewaySnafu, MissingApiKeySnafu, ReadInputSnafu, WriteOutputSnafu};
use trilha::location::{FixedLocation, LocationProvider, UnavailableLocation};
use trilha::{AppResult, ModeController, Settings, SubmitRejection};
use trilha_llm::{GEMINI_GATEWAY_NAME, create_gateway};
use trilha_storage::{FileStore, KeyValueStore, MemoryStore};

const HELP: &str = "commands: /chat /search /maps /fast switch mode, /clear wipes chat history, /quit exits";

/// Terminal front end.
///
/// Startup order:
/// 1. tracing to stderr, filtered by `RUST_LOG`
/// 2. layered settings (defaults, settings file, environment)
/// 3. gateway, history store and location resolution
/// 4. line loop over stdin
#[snafu::report]
#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load();
    let provider_config = settings
        .to_provider_config()
        .context(MissingApiKeySnafu {
            stage: "main-provider-config",
            config_path: Settings::default_config_path().display().to_string(),
        })?;
    let gateway = create_gateway(provider_config).context(GatewaySnafu {
        stage: "main-create-gateway",
        gateway: GEMINI_GATEWAY_NAME,
    })?;

    let history_dir = settings.history_dir();
    let store: Arc<dyn KeyValueStore> = match FileStore::open(&history_dir) {
        Ok(store) => Arc::new(store),
        Err(error) => {
            // History is best-effort; keep it for this run only.
            tracing::warn!(path = ?history_dir, error = %error, "falling back to in-memory history");
            Arc::new(MemoryStore::new())
        }
    };

    let mut controller = ModeController::new(gateway, Some(ChatHistory::new(store)));
    let location_provider: Box<dyn LocationProvider> = match settings.location {
        Some(location) => Box::new(FixedLocation(location)),
        None => Box::new(UnavailableLocation),
    };
    controller.resolve_location(location_provider.as_ref()).await;

    run_repl(&mut controller).await
}

async fn run_repl(controller: &mut ModeController) -> AppResult<()> {
    let mut mode = Mode::Chat;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    for message in controller.session(Mode::Chat).messages.messages() {
        print_message(message);
    }
    println!("{HELP}");

    loop {
        prompt(mode)?;
        let Some(line) = lines.next_line().await.context(ReadInputSnafu {
            stage: "repl-read-line",
        })?
        else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => println!("{HELP}"),
            "/clear" => {
                controller.clear_chat_history();
                println!("chat history cleared");
            }
            command if command.starts_with('/') => match command[1..].parse::<Mode>() {
                Ok(next) => {
                    mode = next;
                    println!("switched to {mode} mode");
                }
                Err(error) => println!("{error}; {HELP}"),
            },
            text => submit_line(controller, mode, text).await?,
        }
    }

    Ok(())
}

async fn submit_line(controller: &mut ModeController, mode: Mode, text: &str) -> AppResult<()> {
    let mut printed = String::new();
    let mut progress: AppResult<()> = Ok(());
    let result = controller
        .submit(mode, text, |reply| {
            if let Some(reply) = reply
                && progress.is_ok()
            {
                progress = print_stream_progress(&mut std::io::stdout(), &mut printed, reply);
            }
        })
        .await;
    progress?;

    match result {
        Ok(()) if mode == Mode::Chat => {
            println!();
            if let Some(reply) = controller.session(mode).messages.last() {
                print_references(reply);
            }
        }
        Ok(()) => {
            if let Some(reply) = controller.session(mode).messages.last() {
                print_message(reply);
            }
        }
        Err(SubmitRejection::EmptyInput) => {}
        Err(SubmitRejection::Busy(mode)) => println!("{mode} mode is still answering"),
    }

    std::io::stdout().flush().context(WriteOutputSnafu {
        stage: "repl-flush-reply",
    })
}

/// Prints only the part of the cumulative reply not yet on screen.
fn print_stream_progress(
    out: &mut impl Write,
    printed: &mut String,
    reply: &Message,
) -> AppResult<()> {
    let written = match reply.text.strip_prefix(printed.as_str()) {
        Some(tail) => write!(out, "{tail}"),
        // Error replies replace the streamed text outright.
        None => write!(out, "\n{}", reply.text),
    };
    written.context(WriteOutputSnafu {
        stage: "repl-write-stream",
    })?;
    printed.clone_from(&reply.text);
    out.flush().context(WriteOutputSnafu {
        stage: "repl-flush-stream",
    })
}

fn print_message(message: &Message) {
    println!("[{:?}] {}", message.sender, message.text);
    print_references(message);
}

fn print_references(message: &Message) {
    let Some(references) = &message.grounding_references else {
        return;
    };
    for (index, reference) in references.iter().enumerate() {
        println!("  [{}] {} <{}>", index + 1, reference.title, reference.uri);
    }
}

fn prompt(mode: Mode) -> AppResult<()> {
    print!("{mode}> ");
    std::io::stdout().flush().context(WriteOutputSnafu {
        stage: "repl-flush-prompt",
    })
}
