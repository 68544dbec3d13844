use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hashed_wallet::chain::ethereum::JsonRpcClient;
use hashed_wallet::chain::price::CoinGeckoPriceFeed;
use hashed_wallet::config::WalletConfig;
use hashed_wallet::crypto::keys;
use hashed_wallet::crypto::sensitive::SecretString;
use hashed_wallet::error::{Result, WalletError};
use hashed_wallet::relay::hub::RelayHub;
use hashed_wallet::state::models::Network;
use hashed_wallet::storage::file::FileStore;
use hashed_wallet::wallet::service::WalletService;

#[derive(Parser)]
#[command(name = "hashed-wallet")]
#[command(about = "Ethereum wallet core: encrypted vault, accounts and dApp request handling")]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Wallet password for commands that need an unlocked wallet
    #[arg(long, global = true, env = "HASHED_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vault (generates a phrase when none is given)
    Init {
        #[arg(long)]
        mnemonic: Option<String>,
    },
    /// Check the password and print the public wallet state
    Unlock,
    /// Show whether a vault exists and the selected network
    Status,
    /// List accounts
    Accounts,
    /// Derive the next account from the seed
    CreateAccount {
        #[arg(long)]
        name: Option<String>,
    },
    /// Import an account from a private key
    Import {
        #[arg(long)]
        name: String,
        #[arg(long)]
        private_key: String,
    },
    /// Track an address without its key
    Watch {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
    },
    DeleteAccount {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
    },
    /// Address book
    Saved {
        #[command(subcommand)]
        command: SavedCommands,
    },
    /// Show or switch the network
    Network { name: Option<String> },
    /// Balance of an address (selected account by default)
    Balance {
        #[arg(long)]
        address: Option<String>,
    },
    ChangePassword {
        #[arg(long)]
        new_password: String,
    },
    /// Print the seed phrase
    RevealSeed,
}

#[derive(Subcommand)]
enum SavedCommands {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
    },
    Update {
        index: usize,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
    Delete {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(code = e.code(), "{e}");
        std::process::exit(1);
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = WalletConfig::load(cli.config.as_deref())?;
    let store = Arc::new(FileStore::open(&config.data_dir).await?);
    let price = Arc::new(CoinGeckoPriceFeed::new(config.price_url.clone()));
    let service = Arc::new(WalletService::new(
        config,
        store,
        Arc::new(JsonRpcClient::new()),
        price,
        Arc::new(RelayHub::new()),
    ));
    let password = cli.password.unwrap_or_default();

    match cli.command {
        Commands::Init { mnemonic } => {
            let phrase = match mnemonic {
                Some(m) => SecretString::from(m),
                None => {
                    let generated = keys::generate_mnemonic()?;
                    println!("{}", generated.expose());
                    generated
                }
            };
            service.set_wallet_password(&password, phrase.expose()).await?;
            print(&service.snapshot().await?)
        }
        Commands::Status => {
            let initialized = service.is_initialized().await?;
            let network = service.network().await?;
            print(&serde_json::json!({
                "initialized": initialized,
                "network": network,
                "chainId": network.chain_id(),
            }))
        }
        command => {
            if !service.unlock_wallet(&password).await? {
                return Err(WalletError::WrongPassword);
            }
            unlocked(&service, command, &password).await
        }
    }
}

async fn unlocked(service: &WalletService, command: Commands, password: &str) -> Result<()> {
    match command {
        Commands::Unlock => print(&service.snapshot().await?),
        Commands::Accounts => print(&service.accounts().await?),
        Commands::CreateAccount { name } => print(&service.create_account(name.as_deref()).await?),
        Commands::Import { name, private_key } => {
            print(&service.import_account(&name, &private_key).await?)
        }
        Commands::Watch { name, address } => print(&service.add_watch_only(&name, &address).await?),
        Commands::DeleteAccount { name, address } => {
            service.delete_account(&name, &address).await?;
            print(&service.accounts().await?)
        }
        Commands::Saved { command } => match command {
            SavedCommands::List => print(&service.saved_addresses().await?),
            SavedCommands::Add { name, address } => {
                print(&service.add_saved_address(&name, &address).await?)
            }
            SavedCommands::Update {
                index,
                name,
                address,
            } => print(
                &service
                    .update_saved_address(index, name.as_deref(), address.as_deref())
                    .await?,
            ),
            SavedCommands::Delete { name, address } => {
                service.delete_saved_address(&name, &address).await?;
                print(&service.saved_addresses().await?)
            }
        },
        Commands::Network { name } => {
            if let Some(name) = name {
                service.change_network(name.parse::<Network>()?).await?;
            }
            print(&service.network().await?)
        }
        Commands::Balance { address } => print(&service.get_balance(address.as_deref()).await?),
        Commands::ChangePassword { new_password } => {
            service.change_password(password, &new_password).await?;
            info!("Password changed");
            Ok(())
        }
        Commands::RevealSeed => {
            println!("{}", service.reveal_seed(password).await?.expose());
            Ok(())
        }
        Commands::Init { .. } | Commands::Status => Ok(()),
    }
}
