use chatwise::cli::Args;
use clap::Parser;
use dotenv::dotenv;
use log::info;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("--- Core Configuration ---");
    info!("Default Provider: {}", args.provider);
    info!("OpenAI Model: {}", args.openai_model);
    info!("Anthropic Model: {}", args.anthropic_model);
    info!("Temperature: {}", args.temperature);
    info!("Max Tokens: {}", args.max_tokens);
    info!("Request Timeout: {}s", args.timeout);
    info!("Max Retries: {}", args.max_retries);
    info!("Cost Warning Threshold: ${:.2}", args.cost_warning_threshold);
    match args.cost_hard_limit {
        Some(limit) => info!("Cost Hard Limit: ${:.2}", limit),
        None => info!("Cost Hard Limit: Not set"),
    }
    if args.context_token_limit > 0 {
        info!("Context Token Limit: {}", args.context_token_limit);
    }
    info!("Mode: {}", if args.serve { "server" } else { "interactive" });
    if args.serve {
        info!("Server Address: {}", args.server_addr);
    }
    info!("-------------------------");

    chatwise::run(args).await
}
