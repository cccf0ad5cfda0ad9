use jobsniper::llm::drafter::{LlmDrafter, ProposalDrafter};
use jobsniper::llm::remote::{RemoteLlmProvider, DEFAULT_API_URL, DEFAULT_MODEL};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let api_key = std::env::var("GEMINI_API_KEY")
        .map_err(|_| anyhow::anyhow!("Set GEMINI_API_KEY (or put it in .env)"))?;
    let base_url = std::env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

    println!("\n{}", "=".repeat(60));
    println!("Testing proposal drafter");
    println!("Base URL: {}", base_url);
    println!("Model: {}", model);
    println!("{}", "=".repeat(60));

    let provider = RemoteLlmProvider::new(&base_url, &api_key, &model).with_defaults(30, 400, 0.7);
    let drafter = LlmDrafter::new(Arc::new(provider));

    let title = "Python Web Scraping Bot Needed";
    let description =
        "I need someone to build a bot that scrapes product data from e-commerce sites daily.";
    println!("\nJob: {}", title);
    println!("Description: {}\n", description);

    match drafter.draft(title, description).await {
        Ok(proposal) => {
            println!("✓ Generated proposal:\n");
            println!("{}", proposal);
        }
        Err(e) => {
            eprintln!("✗ Failed: {}", e);
        }
    }

    println!("\n{}", "=".repeat(60));
    Ok(())
}
