pub mod assistant;
pub mod cli;
pub mod conversation;
pub mod cost;
pub mod llm;
pub mod repl;
pub mod server;

use assistant::Assistant;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut assistant = Assistant::new(&args)?;

    if args.serve {
        let addr = args.server_addr.clone();
        info!("Starting server on: {}", addr);
        let server = Server::new(addr, Arc::new(Mutex::new(assistant)));
        server.run().await
    } else {
        repl::run(&mut assistant, &args).await
    }
}
