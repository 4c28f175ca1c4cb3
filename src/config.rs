use clap::Parser;
use std::path::PathBuf;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "roast-gateway")]
#[command(about = "Rate limited portfolio roasting backend for Gemini")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Where the analytics snapshot is persisted
    #[arg(long, env = "ANALYTICS_FILE", default_value = "./data/analytics.json")]
    pub analytics_file: PathBuf,

    // Rate limit max roast requests per window and client
    #[arg(long, env = "RATE_LIMIT", default_value_t = 2)]
    pub rate_limit: u32,

    // Rate limit window in seconds, one week at most
    #[arg(long, env = "RATE_WINDOW", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..=604_800))]
    pub rate_window: u64,

    // Gemini model used for generateContent
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.5-flash-lite-preview-06-17")]
    pub gemini_model: String,

    // Base URL of the Gemini API
    #[arg(long, env = "GEMINI_BASE_URL", default_value = "https://generativelanguage.googleapis.com")]
    pub gemini_base_url: String,

    // Upstream request timeout in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value_t = 30)]
    pub upstream_timeout: u64,
}
