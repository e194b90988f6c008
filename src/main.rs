use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::*;
use nyx_client::{
    config::{DEFAULT_ENV_FILE, DEFAULT_NYX_URL},
    DataFilter, NyxClient, NyxConfig, SubscriptionState,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TERMS: &str = "
To use Nyx you must agree to our Terms of Service when sharing content

I understand that the data I am uploading will be visible in the Nyx Playground,
including to users outside my organisation.
I confirm that I have the right to share this data.
I confirm that this data does not contain any Personally Identifiable Information
or otherwise sensitive information, and that it does not violate any laws.
I confirm I have read the Nyx Terms of Service and I am content to proceed.
https://www.get-nyx.io/terms

Agree (y/N): ";

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Env file to read the configuration from (default: ./.env if present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactively create an env file with Nyx credentials ("-" for stdout)
    Init {
        #[arg(default_value = DEFAULT_ENV_FILE)]
        file: String,
    },
    /// Search datasets on the network
    Search {
        text: Option<String>,
        #[arg(long)]
        category: Vec<String>,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long)]
        creator: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
        /// Only datasets you are subscribed to
        #[arg(long)]
        subscribed: bool,
    },
    /// List the datasets you are subscribed to
    Subscriptions,
    /// List the datasets your organisation created
    Mine,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let env_file = args.env_file.as_deref();

    let data = match args.command {
        Commands::Init { file } => return init_env(&file).await,
        Commands::Search {
            text,
            category,
            genre,
            creator,
            content_type,
            subscribed,
        } => {
            let mut filter = DataFilter::new().categories(category);
            filter.text = text;
            filter.genre = genre;
            filter.creator = creator;
            filter.content_type = content_type;
            if subscribed {
                filter = filter.subscription_state(SubscriptionState::Subscribed);
            }
            connect(env_file).await?.get_data(&filter).await?
        }
        Commands::Subscriptions => {
            connect(env_file)
                .await?
                .my_subscriptions(&DataFilter::new())
                .await?
        }
        Commands::Mine => connect(env_file).await?.my_data(&DataFilter::new()).await?,
    };

    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

async fn connect(env_file: Option<&Path>) -> Result<NyxClient> {
    let config = match env_file {
        Some(path) => NyxConfig::from_env_file(path),
        None => NyxConfig::load(std::env::current_dir()?),
    }
    .context("failed to load configuration")?;

    NyxClient::connect(config)
        .await
        .context("failed to connect to Nyx")
}

fn prompt(message: &str) -> Result<String> {
    eprint!("{message}");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn confirmed(answer: &str) -> bool {
    answer.eq_ignore_ascii_case("y")
}

async fn init_env(file: &str) -> Result<()> {
    let to_stdout = file == "-";
    if !to_stdout {
        let question = if Path::new(file).exists() {
            format!("'{file}' already exists, do you wish to override it? (y/N): ")
        } else {
            format!("Do you want to interactively create '{file}'? (y/N): ")
        };
        if !confirmed(&prompt(&question)?) {
            eprintln!("Exiting with no changes");
            return Ok(());
        }
    }

    if !confirmed(&prompt(TERMS)?) {
        bail!("you must agree to the Terms of Service");
    }

    let url = prompt(&format!("Enter Nyx URL [{DEFAULT_NYX_URL}]: "))?;
    let url = if url.is_empty() {
        DEFAULT_NYX_URL.to_string()
    } else {
        url.trim_end_matches('/').to_string()
    };
    let email = prompt("Enter Nyx email: ")?;
    let password = rpassword::prompt_password("Enter Nyx password: ")?;

    let config = NyxConfig::builder()
        .default_env_file(false)
        .process_env(false)
        .url(url)
        .email(email)
        .password(password)
        .build()?;

    let client = NyxClient::connect(config.clone())
        .await
        .context("unable to authorize on Nyx instance")?;
    info!(org = %client.org(), "credentials verified");

    if to_stdout {
        print!("{}", config.to_env_string());
    } else {
        eprintln!("Writing contents to {file}");
        config.write_env_file(file)?;
    }
    Ok(())
}
