use anyhow::Result;
use clap::Parser;
use parley::cli::{Cli, Commands};
use parley::{utils, AppSnapshot, ChatHandle, Services, Settings};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)),
        )
        .init();

    let cli = Cli::parse();

    let services = Services::from_settings(&settings).await?;
    let handle = ChatHandle::spawn(settings, services).await?;

    let result = match cli.command {
        Commands::Chat { prompt, model } => handle_chat(&handle, prompt, model).await,
        Commands::Interactive { session } => handle_interactive(&handle, session).await,
        Commands::History => {
            print_history(&handle.snapshot());
            Ok(())
        }
        Commands::Show { id } => handle_show(&handle, id).await,
        Commands::Rename { id, title } => {
            handle.rename_session(id, title).await?;
            utils::print_success("Conversation renamed");
            Ok(())
        }
        Commands::Delete { id } => {
            handle.delete_session(id).await?;
            utils::print_success("Conversation deleted");
            Ok(())
        }
        Commands::Duplicate { id } => {
            handle.duplicate_session(id).await?;
            let snapshot = handle.snapshot();
            utils::print_success(&format!(
                "Created {}",
                snapshot.current_session_id.unwrap_or_default()
            ));
            Ok(())
        }
        Commands::Retitle { id } => handle_retitle(&handle, id).await,
        Commands::Models => handle_models(&handle).await,
        Commands::Set {
            api_key,
            temperature,
            system_prompt,
            model,
        } => handle_set(&handle, api_key, temperature, system_prompt, model).await,
    };

    handle.shutdown().await?;

    result
}

async fn handle_chat(handle: &ChatHandle, prompt: String, model: Option<String>) -> Result<()> {
    if let Some(model) = model {
        handle.select_model(model).await?;
    }

    utils::print_info("Sending request...");
    let before = handle.snapshot().messages.len();
    handle.change_input(prompt).await?;
    handle.send().await?;
    let snapshot = handle.wait_until_idle().await?;

    report_turn(&snapshot, before);
    Ok(())
}

async fn handle_show(handle: &ChatHandle, id: String) -> Result<()> {
    handle.select_session(&id).await?;
    let snapshot = handle.snapshot();

    if snapshot.current_session_id.as_deref() != Some(id.as_str()) {
        utils::print_error(&format!("No conversation with id {}", id));
        return Ok(());
    }

    utils::print_header(snapshot.current_title.as_deref().unwrap_or_default());
    print_messages(&snapshot);
    Ok(())
}

async fn handle_retitle(handle: &ChatHandle, id: String) -> Result<()> {
    handle.regenerate_title(&id).await?;
    let snapshot = handle.wait_until_idle().await?;

    match snapshot.history.iter().find(|entry| entry.id == id) {
        Some(entry) => utils::print_success(&format!("Title: {}", entry.title)),
        None => utils::print_error(&format!("No conversation with id {}", id)),
    }
    Ok(())
}

async fn handle_models(handle: &ChatHandle) -> Result<()> {
    handle.refresh_models().await?;
    let snapshot = handle.wait_until_idle().await?;

    if snapshot.models.is_empty() {
        utils::print_error("No models available");
    }
    for model in &snapshot.models {
        let marker = if model.id == snapshot.selected_model { "*" } else { " " };
        println!("{} {}", marker, model.id);
    }
    Ok(())
}

async fn handle_set(
    handle: &ChatHandle,
    api_key: Option<String>,
    temperature: Option<f32>,
    system_prompt: Option<String>,
    model: Option<String>,
) -> Result<()> {
    if let Some(key) = api_key {
        handle.set_credential(Some(key)).await?;
    }
    if let Some(temperature) = temperature {
        handle.set_temperature(temperature).await?;
    }
    if let Some(prompt) = system_prompt {
        handle.set_system_prompt(prompt).await?;
    }
    if let Some(model) = model {
        handle.select_model(model).await?;
    }

    let snapshot = handle.snapshot();
    utils::print_success("Preferences saved");
    println!("  model:         {}", snapshot.selected_model);
    println!("  temperature:   {}", snapshot.temperature);
    println!("  system prompt: {}", snapshot.system_prompt);
    println!("  api key:       {}", if snapshot.has_credential { "set" } else { "not set" });
    Ok(())
}

async fn handle_interactive(handle: &ChatHandle, session: Option<String>) -> Result<()> {
    utils::print_header("Interactive Mode");
    utils::print_info("Type your messages, or /help for commands\n");

    if let Some(id) = session {
        handle.select_session(id).await?;
        let snapshot = handle.snapshot();
        if let Some(title) = &snapshot.current_title {
            utils::print_success(&format!("Resumed \"{}\"", title));
        }
        print_messages(&snapshot);
    }

    let stdin = io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        utils::print_prompt("You: ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match run_line(handle, line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => utils::print_error(&format!("Error: {}", e)),
        }
    }

    Ok(())
}

/// Returns false when the user asked to quit
async fn run_line(handle: &ChatHandle, line: &str) -> Result<bool> {
    let Some(command) = line.strip_prefix('/') else {
        let before = handle.snapshot().messages.len();
        handle.change_input(line).await?;
        handle.send().await?;
        let snapshot = handle.wait_until_idle().await?;
        report_turn(&snapshot, before);
        return Ok(true);
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    let snapshot = handle.snapshot();

    match name {
        "quit" | "exit" => return Ok(false),
        "help" => print_help(),
        "new" => {
            handle.new_session().await?;
            utils::print_success("Started a new conversation");
        }
        "list" => print_history(&snapshot),
        "show" => print_messages(&snapshot),
        "open" => match lookup_session(&snapshot, rest) {
            Some(id) => {
                handle.select_session(id).await?;
                let snapshot = handle.snapshot();
                utils::print_header(snapshot.current_title.as_deref().unwrap_or_default());
                print_messages(&snapshot);
            }
            None => utils::print_error("Usage: /open <number|id>"),
        },
        "rename" => match &snapshot.current_session_id {
            Some(id) if !rest.is_empty() => {
                handle.rename_session(id.as_str(), rest).await?;
                utils::print_success("Conversation renamed");
            }
            Some(_) => utils::print_error("Usage: /rename <title>"),
            None => utils::print_error("Nothing saved yet"),
        },
        "delete" => match &snapshot.current_session_id {
            Some(id) => {
                handle.delete_session(id.as_str()).await?;
                utils::print_success("Conversation deleted");
            }
            None => utils::print_error("Nothing saved yet"),
        },
        "dup" => match &snapshot.current_session_id {
            Some(id) => {
                handle.duplicate_session(id.as_str()).await?;
                let snapshot = handle.snapshot();
                utils::print_success(&format!(
                    "Now in \"{}\"",
                    snapshot.current_title.unwrap_or_default()
                ));
            }
            None => utils::print_error("Nothing saved yet"),
        },
        "title" => match &snapshot.current_session_id {
            Some(id) => {
                handle.regenerate_title(id.as_str()).await?;
                let snapshot = handle.wait_until_idle().await?;
                utils::print_success(&format!(
                    "Title: {}",
                    snapshot.current_title.unwrap_or_default()
                ));
            }
            None => utils::print_error("Nothing saved yet"),
        },
        "edit" => {
            let (position, text) = rest.split_once(' ').unwrap_or((rest, ""));
            match message_id(&snapshot, position) {
                Some(id) if !text.trim().is_empty() => {
                    handle.edit_message(id, text.trim()).await?;
                    utils::print_success("Message edited");
                }
                _ => utils::print_error("Usage: /edit <n> <text>"),
            }
        }
        "del" => match message_id(&snapshot, rest) {
            Some(id) => {
                handle.delete_message(id).await?;
                utils::print_success("Message deleted");
            }
            None => utils::print_error("Usage: /del <n>"),
        },
        "retry" => match message_id(&snapshot, rest) {
            Some(id) => {
                let from = snapshot.messages.iter().position(|m| m.id == id).unwrap_or(0);
                handle.retry(id).await?;
                let snapshot = handle.wait_until_idle().await?;
                report_turn(&snapshot, from);
            }
            None => utils::print_error("Usage: /retry <n>"),
        },
        "key" => {
            let key = (!rest.is_empty()).then(|| rest.to_string());
            let removed = key.is_none();
            handle.set_credential(key).await?;
            utils::print_success(if removed { "API key removed" } else { "API key saved" });
        }
        "temp" => match rest.parse::<f32>() {
            Ok(value) => {
                handle.set_temperature(value).await?;
                utils::print_success(&format!("Temperature {}", handle.snapshot().temperature));
            }
            Err(_) => utils::print_error("Usage: /temp <0.0-2.0>"),
        },
        "system" => {
            handle.set_system_prompt(rest).await?;
            utils::print_success("System prompt updated");
        }
        "model" if rest.is_empty() => utils::print_info(&snapshot.selected_model),
        "model" => {
            handle.select_model(rest).await?;
            utils::print_success(&format!("Using {}", rest));
        }
        "models" => {
            handle.refresh_models().await?;
            let snapshot = handle.wait_until_idle().await?;
            for model in &snapshot.models {
                println!("  {}", model.id);
            }
        }
        _ => utils::print_error(&format!("Unknown command /{}. Try /help", name)),
    }

    Ok(true)
}

fn print_help() {
    println!("Commands:");
    println!("  /new              - Start a new conversation");
    println!("  /list             - List saved conversations");
    println!("  /open <n|id>      - Open a saved conversation");
    println!("  /show             - Print the current conversation");
    println!("  /rename <title>   - Rename the current conversation");
    println!("  /delete           - Delete the current conversation");
    println!("  /dup              - Duplicate the current conversation");
    println!("  /title            - Regenerate the title");
    println!("  /edit <n> <text>  - Edit message n");
    println!("  /del <n>          - Delete message n");
    println!("  /retry <n>        - Regenerate the response to message n");
    println!("  /key [key]        - Save or remove the API key");
    println!("  /temp <t>         - Set the temperature");
    println!("  /system [prompt]  - Set the system prompt");
    println!("  /model [id]       - Show or select the model");
    println!("  /models           - List available models");
    println!("  /quit             - Exit\n");
}

/// Print whatever the last request changed
fn report_turn(snapshot: &AppSnapshot, before: usize) {
    if snapshot.credential_required {
        utils::print_error(
            "No API key configured. Use /key <key>, `parley set --api-key`, or OPENAI_API_KEY.",
        );
        return;
    }
    if let Some(error) = &snapshot.error {
        utils::print_error(error);
        return;
    }

    for (index, message) in snapshot.messages.iter().enumerate().skip(before) {
        if message.role == parley::chat::Role::Assistant {
            utils::print_message(index + 1, message);
        }
    }
    println!();
}

fn print_messages(snapshot: &AppSnapshot) {
    for (index, message) in snapshot.messages.iter().enumerate() {
        utils::print_message(index + 1, message);
    }
    println!();
}

fn print_history(snapshot: &AppSnapshot) {
    if snapshot.history.is_empty() {
        utils::print_info("No saved conversations");
        return;
    }
    for (index, entry) in snapshot.history.iter().enumerate() {
        utils::print_entry(index + 1, entry);
    }
}

fn message_id<'a>(snapshot: &'a AppSnapshot, position: &str) -> Option<&'a str> {
    let position: usize = position.trim().parse().ok()?;
    snapshot
        .messages
        .get(position.checked_sub(1)?)
        .map(|message| message.id.as_str())
}

fn lookup_session<'a>(snapshot: &'a AppSnapshot, key: &'a str) -> Option<&'a str> {
    if key.is_empty() {
        return None;
    }
    match key.parse::<usize>() {
        Ok(position) => snapshot
            .history
            .get(position.checked_sub(1)?)
            .map(|entry| entry.id.as_str()),
        Err(_) => Some(key),
    }
}
