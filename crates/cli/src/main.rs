//! Marketstall CLI - drive the storefront client from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Browse
//! mstall products list --search tea
//! mstall products show 42
//!
//! # Anonymous cart, kept in the local storage file
//! mstall cart add 42 --quantity 2
//! mstall cart show
//!
//! # Log in; the anonymous cart is dropped and favorites are synced
//! mstall login -e ada@example.com
//!
//! # Place a cash-on-delivery order from the saved default address
//! mstall checkout --saved-address
//! ```
//!
//! # Environment Variables
//!
//! Everything `ClientConfig::from_env` reads, plus:
//! - `MARKETSTALL_STORAGE_PATH` - Local storage file (default: `.marketstall/storage.json`)
//! - `MARKETSTALL_PASSWORD` - Password for `login` and `register`

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use marketstall_client::Storefront;
use marketstall_client::config::ClientConfig;
use marketstall_client::storage::FileStorage;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

use commands::CommandError;

#[derive(Parser)]
#[command(name = "mstall")]
#[command(author, version, about = "Marketstall storefront CLI")]
struct Cli {
    /// Local storage file standing in for browser storage
    #[arg(
        long,
        global = true,
        env = "MARKETSTALL_STORAGE_PATH",
        default_value = ".marketstall/storage.json"
    )]
    storage: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and sync the anonymous cart and favorites
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "MARKETSTALL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account (does not log in)
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "MARKETSTALL_PASSWORD", hide_env_values = true)]
        password: String,

        /// Account role (`user` or `seller`)
        #[arg(short, long, default_value = "user")]
        role: String,
    },
    /// End the session
    Logout,
    /// Show the current session
    Whoami,
    /// Manage the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Manage favorites
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
    /// Browse products
    Products {
        #[command(subcommand)]
        action: ProductsAction,
    },
    /// List categories
    Categories,
    /// Place a cash-on-delivery order for the cart
    Checkout(commands::checkout::CheckoutArgs),
    /// Show one of your orders
    Order { order_id: i64 },
}

#[derive(Subcommand)]
enum CartAction {
    /// Show the cart
    Show,
    /// Add a product
    Add {
        product_id: i64,

        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Set the quantity of a product already in the cart (0 removes it)
    Update { product_id: i64, quantity: u32 },
    /// Remove a product from the cart
    Remove { product_id: i64 },
    /// Empty the cart
    Clear,
}

#[derive(Subcommand)]
enum FavoritesAction {
    /// List favorites
    List,
    /// Add a product to favorites
    Add { product_id: i64 },
    /// Remove a product from favorites
    Remove { product_id: i64 },
    /// Add a product to favorites, or remove it if already there
    Toggle { product_id: i64 },
}

#[derive(Subcommand)]
enum ProductsAction {
    /// List products
    List {
        #[arg(long, default_value_t = 0)]
        page: u32,

        #[arg(long)]
        size: Option<u32>,

        #[arg(long)]
        category: Option<i64>,

        #[arg(long)]
        search: Option<String>,
    },
    /// Show one product
    Show { product_id: i64 },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            output::failure(&e.to_string());
            std::process::exit(2);
        }
    };

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "marketstall_client=info,marketstall_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, config).await {
        e.report();
        output::failure(&e.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: ClientConfig) -> Result<(), CommandError> {
    let storage = Arc::new(FileStorage::new(&cli.storage));
    let app = Storefront::connect(config, storage)?;
    app.init().await;

    match cli.command {
        Commands::Login { email, password } => {
            commands::session::login(&app, &email, password).await?;
        }
        Commands::Register {
            username,
            email,
            password,
            role,
        } => commands::session::register(&app, username, &email, password, &role).await?,
        Commands::Logout => commands::session::logout(&app).await,
        Commands::Whoami => commands::session::whoami(&app).await,
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(&app),
            CartAction::Add {
                product_id,
                quantity,
            } => commands::cart::add(&app, product_id, quantity).await?,
            CartAction::Update {
                product_id,
                quantity,
            } => commands::cart::update(&app, product_id, quantity).await?,
            CartAction::Remove { product_id } => commands::cart::remove(&app, product_id).await?,
            CartAction::Clear => commands::cart::clear(&app).await?,
        },
        Commands::Favorites { action } => match action {
            FavoritesAction::List => commands::favorites::list(&app),
            FavoritesAction::Add { product_id } => {
                commands::favorites::add(&app, product_id).await?;
            }
            FavoritesAction::Remove { product_id } => {
                commands::favorites::remove(&app, product_id).await?;
            }
            FavoritesAction::Toggle { product_id } => {
                commands::favorites::toggle(&app, product_id).await?;
            }
        },
        Commands::Products { action } => match action {
            ProductsAction::List {
                page,
                size,
                category,
                search,
            } => commands::catalog::list_products(&app, page, size, category, search).await?,
            ProductsAction::Show { product_id } => {
                commands::catalog::show_product(&app, product_id).await?;
            }
        },
        Commands::Categories => commands::catalog::list_categories(&app).await?,
        Commands::Checkout(args) => commands::checkout::run(&app, args).await?,
        Commands::Order { order_id } => commands::checkout::show_order(&app, order_id).await?,
    }
    Ok(())
}
