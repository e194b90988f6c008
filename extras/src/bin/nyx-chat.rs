use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::*;
use nyx_client::{NyxClient, NyxConfig};
use nyx_extras::{LlmConfig, NyxAgent, Provider};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Ask questions about the data you are subscribed to on Nyx
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Answer this question and exit instead of prompting
    question: Option<String>,

    #[arg(long, value_enum, default_value = "openai")]
    provider: Provider,

    /// Also use the datasets your organisation created
    #[arg(long)]
    include_own: bool,

    /// Build the database in this file instead of in memory
    #[arg(long)]
    sqlite_file: Option<PathBuf>,

    /// Env file with Nyx credentials (default: ./.env if present)
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let loaded = match &args.env_file {
        Some(path) => dotenv::from_path(path).map(|_| ()),
        None => dotenv::dotenv().map(|_| ()),
    };
    if loaded.is_err() {
        warn!("didn't load a .env file")
    }

    let config = match &args.env_file {
        Some(path) => NyxConfig::from_env_file(path),
        None => NyxConfig::load(std::env::current_dir()?),
    }
    .context("failed to load Nyx config")?;
    let client = NyxClient::connect(config)
        .await
        .context("failed to connect to Nyx")?;
    let llm = LlmConfig::from_env(args.provider)?;
    let agent = NyxAgent::new(client, llm.chat_model());
    let sqlite_file = args.sqlite_file.as_deref();

    if let Some(question) = &args.question {
        let answer = agent
            .query(question, None, args.include_own, sqlite_file)
            .await?;
        println!("{answer}");
        return Ok(());
    }

    let stdin = std::io::stdin();
    loop {
        print!("What is your question? ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        match agent
            .query(question, None, args.include_own, sqlite_file)
            .await
        {
            Ok(answer) => println!("{answer}\n"),
            Err(e) => eprintln!("failed to answer: {e:#}\n"),
        }
    }

    Ok(())
}
