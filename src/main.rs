use clap::{Parser, Subcommand};
use invoice_chat::analysis::AzureDocumentAnalyzer;
use invoice_chat::config::{self, Config};
use invoice_chat::invoice::{self, InvoiceExtraction};
use invoice_chat::llm_chat::ChatSession;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "invoice_chat", about = "Chat with an invoice (PDF or image)")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the extracted invoice text.
    Extract {
        file: PathBuf,
        /// Also print the accumulated tables as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Ask one question about an invoice.
    Ask { file: PathBuf, question: String },
    /// Interactive chat about an invoice.
    Chat { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_with_env(&cli.config)?;

    match cli.command {
        Command::Extract { file, json } => {
            let extraction = extract(&cfg, &file).await?;
            println!("{}", extraction.text);
            if json {
                println!("{}", serde_json::to_string_pretty(&extraction.tables)?);
            }
        }
        Command::Ask { file, question } => {
            let extraction = extract(&cfg, &file).await?;
            let mut chat = ChatSession::connect(&cfg.llm, extraction).await?;
            println!("{}", chat.ask(&question).await?);
        }
        Command::Chat { file } => {
            let extraction = extract(&cfg, &file).await?;
            let chat = ChatSession::connect(&cfg.llm, extraction).await?;
            repl(&cfg, chat).await?;
        }
    }

    Ok(())
}

async fn extract(cfg: &Config, path: &Path) -> Result<InvoiceExtraction, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(path).await?;
    extract_bytes(cfg, path, &bytes).await
}

async fn extract_bytes(
    cfg: &Config,
    path: &Path,
    bytes: &[u8],
) -> Result<InvoiceExtraction, Box<dyn std::error::Error>> {
    let analyzer = AzureDocumentAnalyzer::from_env(cfg.analysis.clone())?;
    let filename = path.file_name().and_then(|n| n.to_str());

    info!(path = %path.display(), id_mode = ?cfg.tables.id_mode, "Extracting invoice via Document Intelligence");
    let extraction = invoice::analyze_invoice(&analyzer, bytes, filename, cfg.tables.id_mode).await?;

    if !extraction.failed_pages.is_empty() {
        warn!(pages = ?extraction.failed_pages, "Some pages could not be analyzed");
    }
    info!(tables = extraction.tables.len(), images = extraction.images.len(), "Invoice data extracted");
    Ok(extraction)
}

async fn repl(cfg: &Config, mut chat: ChatSession) -> Result<(), Box<dyn std::error::Error>> {
    println!("You may begin the conversation now (:reset, :tables, :load PATH, :quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            ":quit" | ":q" => break,
            ":reset" => {
                chat.reset();
                println!("Chat reset.");
            }
            ":tables" => println!("{}", serde_json::to_string_pretty(&chat.extraction().tables)?),
            _ if line.starts_with(":load ") => {
                let path = Path::new(line.trim_start_matches(":load ").trim());
                let bytes = match tokio::fs::read(path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        println!("Cannot read {}: {e}", path.display());
                        continue;
                    }
                };
                if chat.extraction().is_same_document(&bytes) {
                    println!("Same document already loaded.");
                    continue;
                }
                match extract_bytes(cfg, path, &bytes).await {
                    Ok(extraction) => {
                        chat.replace_document(extraction);
                        println!("Invoice data extracted!");
                    }
                    Err(e) => println!("Could not extract invoice: {e}"),
                }
            }
            question => match chat.ask(question).await {
                Ok(reply) => println!("{reply}\n"),
                Err(e) => {
                    tracing::error!(error = %e, "Chat request failed");
                    println!("Error: {e}\n");
                }
            },
        }
    }

    Ok(())
}
