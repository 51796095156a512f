use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    lookalike_cli::main_entry().await
}
