//! Relay binary: local HTTP server between the page context and the
//! chat-completion classifier.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;

use voicepage::classifier::{Classifier, DEFAULT_MODEL};
use voicepage::relay::{RelayState, router};

#[derive(Parser, Debug)]
#[command(name = "voicepage-relay", about = "Voice command relay server")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Chat model used for classification.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voicepage=info".into()),
        )
        .init();

    let args = Args::parse();

    if std::env::var("OPENAI_API_KEY").is_err() {
        tracing::warn!("OPENAI_API_KEY is not set; classification requests will fail");
    }

    let state = Arc::new(RelayState {
        classifier: Classifier::new(std::env::var("OPENAI_API_KEY").ok(), args.model),
    });

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    tracing::info!(port = args.port, "relay listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
