pub mod api;

use crate::assistant::Assistant;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// HTTP surface over a single assistant. The mutex serializes access; this
/// is still a one-conversation system.
pub struct Server {
    addr: String,
    assistant: Arc<Mutex<Assistant>>,
}

impl Server {
    pub fn new(addr: String, assistant: Arc<Mutex<Assistant>>) -> Self {
        Self { addr, assistant }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(&self.addr, self.assistant.clone()).await
    }
}
