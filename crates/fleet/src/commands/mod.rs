use async_trait::async_trait;
use eyre::Result;

pub mod agent;
pub mod coordinator;

#[async_trait]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}
