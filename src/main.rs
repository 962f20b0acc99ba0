use std::io::{self, Write};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Select};
use log::{info, warn};
use tokio::sync::mpsc;

mod app;
mod backend;
mod config;
mod controller;
mod conversation;
mod handler;
mod logging;
mod markdown;
mod tui;
mod ui;

use app::App;
use backend::BackendClient;
use config::Config;
use controller::ChatController;
use conversation::{Conversation, Role};
use logging::LogTarget;
use tui::{EventHandler, Tui};

const NO_MODELS: &str = "No models found. Please ensure Ollama is running and models are pulled.";

#[derive(Parser)]
#[command(name = "chatbot", version)]
#[command(about = "Chat with locally served language models")]
struct Cli {
    /// Base URL of the chat backend
    #[arg(long, env = "CHATBOT_BACKEND_URL", global = true)]
    backend_url: Option<String>,

    /// Milliseconds between revealed characters of a reply
    #[arg(long, env = "CHATBOT_REVEAL_MS", global = true)]
    reveal_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the chat interface (default)
    Chat,
    /// List the models the backend offers
    Models,
    /// Send one message and print the reply
    Ask {
        /// Your message
        message: String,
        /// Model to use (prompts when omitted)
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }
    if let Some(ms) = cli.reveal_ms {
        config.reveal_interval_ms = ms;
    }

    let command = cli.command.unwrap_or(Commands::Chat);
    let log_target = match command {
        // Keep the alternate screen clean
        Commands::Chat => LogTarget::File(config.log_path()?),
        _ => LogTarget::Stderr,
    };
    logging::init(&config.log_level, log_target)?;
    if let Some(e) = config_error {
        warn!("ignoring unreadable config, using defaults: {:#}", e);
    }

    match command {
        Commands::Chat => run_tui(config).await,
        Commands::Models => list_models(&config).await,
        Commands::Ask { message, model } => ask(&config, &message, model).await,
    }
}

fn backend_for(config: &Config) -> BackendClient {
    BackendClient::new(&config.backend_url).with_think_stripping(config.strip_think_tags)
}

async fn run_tui(config: Config) -> Result<()> {
    let backend = backend_for(&config);
    info!("starting chat against {}", backend.base_url());

    let (tx, rx) = mpsc::unbounded_channel();
    let controller = ChatController::new(backend, tx, config.reveal_interval());
    let mut app = App::new(controller, &config);
    if let Ok(path) = Config::path() {
        app = app.with_config_path(path);
    }
    let mut events = EventHandler::new(rx);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    app.start();
    let result = run_loop(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    info!("chat closed");
    result
}

async fn run_loop(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

async fn list_models(config: &Config) -> Result<()> {
    let backend = backend_for(config);

    println!("\n{}", "🤖 Available Models".bold().blue());
    println!("{}", "=".repeat(30).dimmed());

    match backend.list_models().await {
        Ok(models) => {
            if models.is_empty() {
                println!("{}", NO_MODELS.yellow());
            } else {
                for model in models {
                    let marker = if config.last_model.as_deref() == Some(model.as_str()) {
                        " (last used)".dimmed().to_string()
                    } else {
                        String::new()
                    };
                    println!("  • {}{}", model.green(), marker);
                }
            }
        }
        Err(e) => {
            println!("{}: {}", "Error connecting to backend".red(), e);
            println!("Make sure the backend is running at {}", config.backend_url.bold());
        }
    }

    Ok(())
}

async fn pick_model(backend: &BackendClient, config: &Config) -> Result<String> {
    let models = backend.list_models().await?;
    if models.is_empty() {
        bail!(NO_MODELS);
    }

    let default = config
        .last_model
        .as_ref()
        .and_then(|last| models.iter().position(|m| m == last))
        .unwrap_or(0);
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a model")
        .items(&models)
        .default(default)
        .interact()?;

    Ok(models[selection].clone())
}

/// Echo assistant text to stdout as it is revealed.
#[derive(Default)]
struct RevealPrinter {
    settled: usize,
    printed: usize, // bytes of the current assistant message already written
}

impl RevealPrinter {
    fn update(&mut self, conversation: &Conversation, out: &mut impl Write) -> io::Result<()> {
        for message in &conversation.settled()[self.settled..] {
            match message.role {
                Role::User => writeln!(out, "{} {}", "You:".cyan().bold(), message.content)?,
                Role::Assistant => {
                    writeln!(out, "{}", &message.content[self.printed..])?;
                    self.printed = 0;
                }
            }
        }
        self.settled = conversation.settled().len();

        if let Some(pending) = conversation.pending() {
            write!(out, "{}", &pending.display_content[self.printed..])?;
            self.printed = pending.display_content.len();
        }
        out.flush()
    }
}

async fn ask(config: &Config, message: &str, model: Option<String>) -> Result<()> {
    let backend = backend_for(config);
    let model = match model {
        Some(model) => model,
        None => pick_model(&backend, config).await?,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut controller = ChatController::new(backend, tx, config.reveal_interval());
    controller.select_model(&model);
    if !controller.send_message(message) {
        bail!("Nothing to send");
    }

    let mut printer = RevealPrinter::default();
    let mut stdout = io::stdout();
    printer.update(controller.conversation(), &mut stdout)?;
    while controller.is_busy() {
        let Some(event) = rx.recv().await else {
            break;
        };
        controller.handle_event(event);
        printer.update(controller.conversation(), &mut stdout)?;
    }

    Ok(())
}
