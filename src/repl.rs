use log::error;
use std::error::Error;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::assistant::Assistant;
use crate::cli::Args;
use crate::conversation::ExportFormat;

fn print_welcome(assistant: &Assistant) {
    println!("\n{}", "=".repeat(70));
    println!("AI Assistant - Multi-Provider Command-Line Interface");
    println!("{}", "=".repeat(70));
    println!("Current Provider: {}", assistant.provider_name());
    println!("Model: {}", assistant.model());
    println!(
        "Available Providers: {}",
        assistant.available_providers().join(", ")
    );
    println!("\nCommands:");
    print_commands();
    println!("{}\n", "=".repeat(70));
}

fn print_commands() {
    println!("  /help            - Show this help message");
    println!("  /clear           - Clear conversation history");
    println!("  /model <name>    - Switch provider (openai, anthropic)");
    println!("  /cost            - Show cost summary");
    println!("  /export [format] - Export conversation (json, markdown)");
    println!("  /quit            - Exit the application (also /exit)");
}

fn prompt() -> std::io::Result<()> {
    print!("You: ");
    std::io::stdout().flush()
}

/// The interactive conversation loop. Provider failures are reported and the
/// loop continues; only I/O failures on stdin end the session.
pub async fn run(
    assistant: &mut Assistant,
    args: &Args,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    print_welcome(assistant);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            println!("\nGoodbye!");
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.split_whitespace().next().unwrap_or_default() {
            "/quit" | "/exit" => {
                println!("\nGoodbye!");
                break;
            }
            "/help" => {
                println!("\nAvailable Commands:");
                print_commands();
                println!();
            }
            "/clear" => {
                assistant.clear_conversation();
                println!("Conversation history cleared\n");
            }
            "/model" => {
                let name = input.split_whitespace().nth(1);
                switch_provider(assistant, name);
            }
            "/cost" => {
                println!("\n{}\n", assistant.cost_summary());
            }
            "/export" => {
                let format = input.split_whitespace().nth(1).unwrap_or("json");
                export_conversation(assistant, format);
            }
            _ if input.starts_with('/') => {
                println!("Unknown command: {} (try /help)\n", input);
            }
            _ => {
                process_message(assistant, input, args.stream).await;
            }
        }
    }

    Ok(())
}

fn switch_provider(assistant: &mut Assistant, name: Option<&str>) {
    let Some(name) = name else {
        println!(
            "Available providers: {} (current: {})\n",
            assistant.available_providers().join(", "),
            assistant.provider_name()
        );
        return;
    };
    match assistant.switch_provider(name) {
        Ok(()) => println!("Switched to {}\n", name),
        Err(e) => println!("{}\n", e),
    }
}

fn export_conversation(assistant: &Assistant, format: &str) {
    if assistant.conversation().is_empty() {
        println!("No messages to export.\n");
        return;
    }
    let format = match format.parse::<ExportFormat>() {
        Ok(format) => format,
        Err(e) => {
            println!("{}\n", e);
            return;
        }
    };
    match assistant.export(format) {
        Ok(path) => println!("Exported to {}\n", path.display()),
        Err(e) => {
            error!("Export failed: {}", e);
            println!("Export failed: {}\n", e);
        }
    }
}

async fn process_message(assistant: &mut Assistant, input: &str, stream: bool) {
    if !assistant.can_spend() {
        let limit = assistant.costs().hard_limit().unwrap_or_default();
        println!(
            "Hard cost limit of ${:.2} exceeded. No more API calls allowed.\n",
            limit
        );
        return;
    }

    let result = if stream {
        print!("\nAssistant: ");
        let _ = std::io::stdout().flush();
        let outcome = assistant
            .send_streaming(input, |fragment| {
                print!("{}", fragment);
                let _ = std::io::stdout().flush();
            })
            .await;
        println!("\n");
        outcome
    } else {
        match assistant.send(input).await {
            Ok(exchange) => {
                println!("\nAssistant: {}\n", exchange.reply);
                Ok(exchange)
            }
            Err(e) => Err(e),
        }
    };

    if let Err(e) = result {
        error!("API call failed: {}", e);
        println!("\nError: {}\n", e);
    }
}
