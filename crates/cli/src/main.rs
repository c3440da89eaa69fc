//! Agenda CLI - Database migrations and tenant management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! agenda-cli migrate
//!
//! # Provision a tenant with a spreadsheet mirror
//! agenda-cli tenant add clinic-a --mirror-document 1AbC...xyz
//!
//! # Bind an identity-provider user to a tenant
//! agenda-cli tenant bind-user 6f1c...e2 clinic-a
//!
//! # Rewrite every appointment of a tenant into its mirror
//! agenda-cli mirror resync clinic-a
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `tenant add` / `tenant bind-user` - Provision tenants and user bindings
//! - `mirror resync` - Repair a tenant's spreadsheet mirror

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "agenda-cli")]
#[command(author, version, about = "Agenda CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage tenants
    Tenant {
        #[command(subcommand)]
        action: TenantAction,
    },
    /// Maintain spreadsheet mirrors
    Mirror {
        #[command(subcommand)]
        action: MirrorAction,
    },
}

#[derive(Subcommand)]
enum TenantAction {
    /// Create a tenant, or replace its mirror document
    Add {
        /// Tenant identifier, as used in request paths
        tenant: String,

        /// Spreadsheet document receiving the tenant's appointments
        #[arg(short, long)]
        mirror_document: Option<String>,
    },
    /// Bind a user to a tenant
    BindUser {
        /// User id issued by the identity provider
        user_id: String,

        /// Tenant identifier
        tenant: String,
    },
}

#[derive(Subcommand)]
enum MirrorAction {
    /// Re-reflect every appointment of a tenant, cancelled ones included
    Resync {
        /// Tenant identifier
        tenant: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Tenant { action } => match action {
            TenantAction::Add {
                tenant,
                mirror_document,
            } => commands::tenant::add(&tenant, mirror_document.as_deref()).await?,
            TenantAction::BindUser { user_id, tenant } => {
                commands::tenant::bind_user(&user_id, &tenant).await?;
            }
        },
        Commands::Mirror { action } => match action {
            MirrorAction::Resync { tenant } => commands::mirror::resync(&tenant).await?,
        },
    }
    Ok(())
}
