//! Storefront Sync CLI - Drive the cart and favorites from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart
//! sync-cli cart show
//!
//! # Add two units of a variant at $19.99
//! sync-cli cart add v-123 p-45 "Pineapple Tee" 2 19.99
//!
//! # Change a quantity (0 removes the line)
//! sync-cli cart set v-123 3
//!
//! # Toggle a favorite
//! sync-cli favorites toggle p-45 "Pineapple Tee"
//! ```
//!
//! # Environment Variables
//!
//! - `STOREFRONT_SYNC_API_URL` - Storefront API base URL (required)
//! - `STOREFRONT_SYNC_ACCESS_TOKEN` - Bearer credential; without one the
//!   first 401 triggers a cookie-based refresh
//!
//! See `storefront_sync::config` for the full list.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use storefront_sync::{ClientConfig, RequestPipeline};

mod commands;

#[derive(Parser)]
#[command(name = "sync-cli")]
#[command(author, version, about = "Storefront cart and favorites CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and change the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Inspect and toggle favorites
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the cart lines and totals
    Show,
    /// Add units of a variant
    Add {
        variant_id: String,
        product_id: String,
        title: String,
        quantity: i64,
        /// Unit price in USD (e.g., 19.99)
        unit_price: Decimal,
    },
    /// Set the quantity of a line (0 removes it)
    Set { variant_id: String, quantity: i64 },
    /// Remove a line
    Remove { variant_id: String },
    /// Empty the cart
    Clear,
}

#[derive(Subcommand)]
enum FavoritesAction {
    /// Print favorited products
    List,
    /// Favorite a product, or unfavorite it if already favorited
    Toggle {
        product_id: String,
        title: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    let _sentry_guard = storefront_sync::telemetry::init(&config, "storefront_sync=info,sync_cli=info");

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, &config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = RequestPipeline::from_config(config)?;

    match cli.command {
        Commands::Cart { action } => {
            let cart = storefront_sync::Cart::new(storefront_sync::CartCollection, pipeline);
            match action {
                CartAction::Show => commands::cart::show(&cart).await?,
                CartAction::Add {
                    variant_id,
                    product_id,
                    title,
                    quantity,
                    unit_price,
                } => {
                    commands::cart::add(&cart, variant_id, product_id, title, quantity, unit_price)
                        .await?;
                }
                CartAction::Set {
                    variant_id,
                    quantity,
                } => commands::cart::set(&cart, variant_id, quantity).await?,
                CartAction::Remove { variant_id } => {
                    commands::cart::remove(&cart, variant_id).await?;
                }
                CartAction::Clear => commands::cart::clear(&cart).await?,
            }
        }
        Commands::Favorites { action } => {
            let favorites =
                storefront_sync::Favorites::new(storefront_sync::FavoritesCollection, pipeline);
            match action {
                FavoritesAction::List => commands::favorites::list(&favorites).await?,
                FavoritesAction::Toggle { product_id, title } => {
                    commands::favorites::toggle(&favorites, product_id, title).await?;
                }
            }
        }
    }
    Ok(())
}
