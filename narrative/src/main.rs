//! Narrative runner.
//!
//! A line-oriented driver for the narrative core: reads `#commands` from
//! stdin and prints what the game master does with them.
//!
//! ```bash
//! cargo run -p narrative -- --seed 42
//! cargo run -p narrative -- --load saves/session.json
//! ```

mod headless;

use narrative_core::DeepseekNarrator;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "narrative=info,narrative_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config = match headless::parse_config_from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run with --help for usage.");
            std::process::exit(2);
        }
    };

    let narrator = match DeepseekNarrator::from_env() {
        Ok(narrator) => narrator,
        Err(deepseek::Error::NoApiKey) => {
            eprintln!("Error: DEEPSEEK_API_KEY environment variable not set.");
            eprintln!("Please set it in .env file or with: export DEEPSEEK_API_KEY=your_key_here");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: failed to configure the narrative backend: {e}");
            std::process::exit(1);
        }
    };

    headless::run_headless(config, Arc::new(narrator)).await?;
    Ok(())
}

fn print_help() {
    println!("narrative - AI-driven narrative game master");
    println!();
    println!("USAGE:");
    println!("  narrative [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help       Show this help message");
    println!("  --seed <N>       Seed the random number generators");
    println!("  --load <PATH>    Resume a saved session instead of generating a world");
    println!();
    println!("ENVIRONMENT:");
    println!("  DEEPSEEK_API_KEY              API key (required)");
    println!("  DEEPSEEK_BASE_URL             API base URL");
    println!("  DEEPSEEK_MODEL                Model name");
    println!("  NARRATIVE_SURPRISE_FREQUENCY  Chance of a surprise per change (default 0.1)");
    println!("  NARRATIVE_MAX_REACTION_DEPTH  Deepest reaction chain processed (default 3)");
    println!("  NARRATIVE_MAX_REACTIONS       Reactions processed per drain (default 64)");
    println!("  NARRATIVE_SEED                Seed, overridden by --seed");
    println!("  RUST_LOG                      Log filter (default narrative=info,narrative_core=info)");
    println!();
    println!("Type #help once running for the list of commands.");
}
