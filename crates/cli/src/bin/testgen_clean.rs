use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    testgen_cli::main_entry().await
}
