use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use recipeshare_client::models::RecipeDetails;
use recipeshare_client::{
    smart_contains, ApiClient, ClientConfig, DiskStorage, PartnerStore, Scope, SessionStore,
    TokenStorage, Transport,
};

#[derive(Parser)]
#[command(name = "recipeshare")]
#[command(about = "Terminal client for a RecipeShare server")]
struct Args {
    /// Base URL of the server (overrides RECIPESHARE_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in with your Paprika credentials
    Login {
        email: String,
        #[arg(long, env = "RECIPESHARE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Change your display name
    Rename { name: String },
    /// List recipes, yours or a partner's
    Recipes {
        #[arg(long)]
        partner: Option<i64>,
        /// Keep only recipes whose name matches every word
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show a single recipe
    Recipe {
        id: i64,
        #[arg(long)]
        partner: Option<i64>,
    },
    /// List categories
    Categories {
        #[arg(long)]
        partner: Option<i64>,
    },
    /// Manage partners
    #[command(subcommand)]
    Partners(PartnerCommand),
    /// Trigger a remote re-sync of your Paprika data
    Sync,
}

#[derive(Subcommand)]
enum PartnerCommand {
    /// List active and pending partners
    List,
    /// Request a partnership by partner code
    Request { code: String },
    /// Approve an incoming request
    Approve { id: i64 },
    /// Remove an active partner
    Remove { id: i64 },
    /// Cancel an outgoing request or reject an incoming one
    Reject { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = ClientConfig::from_env();
    if let Some(api_url) = args.api_url {
        config.api_url = api_url;
    }

    let storage_file = config.storage_file();
    let storage: Arc<dyn TokenStorage> = Arc::new(
        DiskStorage::open(&storage_file)
            .with_context(|| format!("failed to open {}", storage_file.display()))?,
    );
    let transport: Arc<dyn Transport> =
        Arc::new(ApiClient::new(config.api_url.clone(), storage.clone())?);

    let session = SessionStore::new(transport.clone(), storage);
    // resurrect a persisted session before doing anything else
    session.refresh().await;
    let store = PartnerStore::new(transport);

    match args.command {
        Command::Login { email, password } => match session.login(&email, &password).await {
            Ok(()) => println!("Logged in as {email}"),
            Err(err) => bail!("{err}"),
        },
        Command::Logout => {
            session.logout();
            println!("Logged out");
        }
        Command::Whoami => {
            let Some(user) = session.user() else {
                println!("Not logged in");
                return Ok(());
            };
            println!("{} <{}>", user.name.as_deref().unwrap_or("(no name)"), user.email);
            println!("Partner code: {}", user.partner_code);
        }
        Command::Rename { name } => {
            require_login(&session)?;
            session.rename(&name).await;
            match session.user().and_then(|user| user.name) {
                Some(current) if current == name => println!("You are now {current}"),
                _ => bail!("rename failed"),
            }
        }
        Command::Recipes { partner, filter } => {
            require_login(&session)?;
            let scope = Scope::from(partner);
            println!("{}", scope_heading(&store, scope).await);
            store.load_categories(scope).await;
            store.load_recipes(scope).await;
            let Some(recipes) = store.recipes_for(scope) else {
                bail!("could not load recipes; try again");
            };
            if recipes.is_empty() {
                println!("(no recipes yet)");
                return Ok(());
            }
            let categories = store.categories_for(scope);
            let needle = filter.unwrap_or_default();
            let mut shown = 0;
            for recipe in &recipes {
                if !smart_contains(&recipe.name, &needle) {
                    continue;
                }
                shown += 1;
                let names: Vec<&str> = recipe
                    .categories
                    .iter()
                    .filter_map(|uid| categories.get(uid).map(String::as_str))
                    .collect();
                if names.is_empty() {
                    println!("{:>6}  {}", recipe.id, recipe.name);
                } else {
                    println!("{:>6}  {}  [{}]", recipe.id, recipe.name, names.join(", "));
                }
            }
            if shown == 0 {
                println!("(no recipes match the filter)");
            }
        }
        Command::Recipe { id, partner } => {
            require_login(&session)?;
            let scope = Scope::from(partner);
            store.load_categories(scope).await;
            let Some(details) = store.fetch_recipe(scope, id).await else {
                bail!("could not load recipe {id}");
            };
            print_recipe(&details, &store.categories_for(scope));
        }
        Command::Categories { partner } => {
            require_login(&session)?;
            let scope = Scope::from(partner);
            store.load_categories(scope).await;
            let categories = store.categories_for(scope);
            if categories.is_empty() {
                println!("(no categories)");
            } else {
                let mut names: Vec<&String> = categories.values().collect();
                names.sort();
                for name in names {
                    println!("{name}");
                }
            }
        }
        Command::Partners(command) => {
            require_login(&session)?;
            run_partner_command(command, &session, &store).await?;
        }
        Command::Sync => {
            require_login(&session)?;
            let Some(changes) = store.refresh_paprika().await else {
                bail!("sync failed; try again");
            };
            let mut updated = Vec::new();
            if changes.categories {
                updated.push("categories");
            }
            if changes.recipes {
                updated.push("recipes");
            }
            if changes.photos {
                updated.push("photos");
            }
            if updated.is_empty() {
                println!("Already up to date");
            } else {
                println!("Updated: {}", updated.join(", "));
            }
        }
    }

    Ok(())
}

fn require_login(session: &SessionStore) -> Result<()> {
    if !session.logged_in() {
        bail!("not logged in — run `recipeshare login <email>` first");
    }
    Ok(())
}

async fn scope_heading(store: &PartnerStore, scope: Scope) -> String {
    match scope.partner_id() {
        None => "My recipes".to_string(),
        Some(id) => {
            store.load_active_partners().await;
            match store.partner_name(id) {
                Some(name) => format!("Recipes of {name}"),
                None => format!("Recipes of partner {id}"),
            }
        }
    }
}

fn print_recipe(details: &RecipeDetails, categories: &recipeshare_client::store::CategoryMap) {
    println!("{}", details.name);
    let names: Vec<&str> = details
        .data
        .categories
        .iter()
        .filter_map(|uid| categories.get(uid).map(String::as_str))
        .collect();
    if !names.is_empty() {
        println!("Categories: {}", names.join(", "));
    }
    for (title, text) in [
        ("Ingredients", &details.data.ingredients),
        ("Description", &details.data.description),
        ("Directions", &details.data.directions),
        ("Notes", &details.data.notes),
    ] {
        if !text.trim().is_empty() {
            println!("\n## {title}\n{text}");
        }
    }
    if !details.photos.is_empty() {
        println!("\nPhotos:");
        for url in &details.photos {
            println!("  {url}");
        }
    }
}

async fn run_partner_command(
    command: PartnerCommand,
    session: &SessionStore,
    store: &PartnerStore,
) -> Result<()> {
    match command {
        PartnerCommand::List => {
            store.load_active_partners().await;
            store.load_pending_partners().await;
            let active = store.active_partners();
            let pending = store.pending_partners();
            if active.is_empty() && pending.incoming.is_empty() && pending.outgoing.is_empty() {
                println!("You do not have any partners yet");
                return Ok(());
            }
            for partner in &active {
                println!(
                    "{:>6}  {}  ({} recipe{})",
                    partner.id,
                    partner.name,
                    partner.recipe_count,
                    if partner.recipe_count == 1 { "" } else { "s" }
                );
            }
            for partner in &pending.incoming {
                println!("{:>6}  {}  (awaiting your approval)", partner.id, partner.name);
            }
            for partner in &pending.outgoing {
                println!("{:>6}  {}  (request sent)", partner.id, partner.name);
            }
        }
        PartnerCommand::Request { code } => {
            let own_code = session.user().map(|user| user.partner_code);
            match store.request_partnership(&code, own_code.as_deref()).await {
                Ok(()) => println!("Partnership requested"),
                Err(err) => bail!("{err}"),
            }
        }
        PartnerCommand::Approve { id } => {
            store.approve_pending_partner(id).await;
            match store.partner_name(id) {
                Some(name) => println!("{name} is now a partner"),
                None => bail!("approval failed; is {id} an incoming request?"),
            }
        }
        PartnerCommand::Remove { id } => {
            store.delete_active_partner(id).await;
            println!("Removed partner {id}");
        }
        PartnerCommand::Reject { id } => {
            store.delete_pending_partner(id).await;
            println!("Dismissed pending partner {id}");
        }
    }
    Ok(())
}
