use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mailfs::config::MailFsConfig;
use mailfs::vfs::demo::e2e_localfs_demo;
use mailfs::vfs::sdk::LocalClient;
use mailfs::vfs::tree::FileType;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailfs")]
#[command(about = "A filesystem view over a mail store", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true, value_name = "CONFIG_YAML")]
    config: Option<PathBuf>,

    /// Root of the directory-backed store, overrides the configuration
    #[arg(long, global = true, value_name = "DIR")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Write, remount and verify files in a scratch store")]
    Demo {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    #[command(about = "List a directory")]
    Ls {
        #[arg(value_name = "PATH", default_value = "/")]
        path: String,
    },
    #[command(about = "Print a file to stdout")]
    Cat {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Write a local file into the store from offset 0")]
    Put {
        #[arg(value_name = "LOCAL_FILE")]
        local: PathBuf,
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Create a directory and its missing parents")]
    Mkdir {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Remove a file")]
    Rm {
        #[arg(value_name = "PATH")]
        path: String,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<MailFsConfig> {
    let mut config = match &cli.config {
        Some(path) => MailFsConfig::load(path)?,
        None => MailFsConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.local_store_root = Some(store.clone());
    }
    Ok(config)
}

async fn open(config: MailFsConfig) -> anyhow::Result<LocalClient> {
    let root = config.store_root();
    LocalClient::open_local(&root, config)
        .await
        .with_context(|| format!("Failed to open store at {}", root.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Demo { dir } => {
            e2e_localfs_demo(&dir, config)
                .await
                .map_err(|e| anyhow::anyhow!("demo failed: {e}"))?;
            println!("demo: OK");
        }
        Commands::Ls { path } => {
            let cli = open(config).await?;
            for entry in cli.readdir(&path).await? {
                let marker = if entry.attr.kind == FileType::Dir { "/" } else { "" };
                println!("{:>10}  {}{marker}", entry.attr.size, entry.name);
            }
        }
        Commands::Cat { path } => {
            let cli = open(config).await?;
            let data = cli.read_file(&path).await?;
            std::io::stdout().write_all(&data)?;
        }
        Commands::Put { local, path } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let cli = open(config).await?;
            cli.write_file(&path, &data).await?;
        }
        Commands::Mkdir { path } => {
            let cli = open(config).await?;
            cli.mkdir_p(&path).await?;
        }
        Commands::Rm { path } => {
            let cli = open(config).await?;
            cli.unlink(&path).await?;
        }
    }
    Ok(())
}
