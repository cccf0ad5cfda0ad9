use clap::Parser;
use jobsniper::ingestion::{FeedSource, HttpFeedSource};
use std::time::Duration;

/// Fetch a feed once and print what the poller would see.
#[derive(Parser, Debug)]
#[command(name = "check_feed")]
struct Args {
    /// Feed URL (RSS or Atom)
    url: String,

    /// Show at most this many postings
    #[arg(long, default_value_t = 10)]
    limit: usize,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let source = HttpFeedSource::new(Duration::from_secs(args.timeout_secs))?;

    println!("\n{}", "=".repeat(60));
    println!("Checking: {}", args.url);
    println!("{}", "=".repeat(60));

    match source.fetch(&args.url).await {
        Ok(postings) => {
            println!("✓ {} postings", postings.len());
            for (i, posting) in postings.iter().take(args.limit).enumerate() {
                println!("\n  {}. {}", i + 1, posting.title);
                println!("     Id:        {}", posting.id);
                println!("     Published: {}", posting.published_at);
                println!(
                    "     Summary:   {}...",
                    posting.description.chars().take(150).collect::<String>()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Failed: {}", e);
            Err(e.into())
        }
    }
}
