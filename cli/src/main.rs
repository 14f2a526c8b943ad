use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use foodshare::config::{API_BASE_ENV, ConfigError, DEFAULT_API_BASE};
use foodshare::net::reqwest_transport::ReqwestTransport;
use foodshare::net::types::{DonationItem, MultiDonation, NewWasteLog, RegisterRequest, UserUpdate};
use foodshare::util::guard::{self, GuardDecision};
use foodshare::util::reports::{self, InventoryTotals};
use foodshare::util::storage::{FileStore, KeyValueStore};
use foodshare::util::validation;
use foodshare::{ApiClient, ApiError, ClientConfig, SessionError, SessionStore};
use serde::Serialize;
use serde_json::json;

#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{}", describe_session(.0))]
    Session(#[from] SessionError),
    #[error("{}", describe_api(.0))]
    Api(#[from] ApiError),
    #[error("not logged in; run `foodshare login` first (guard redirect to {0})")]
    NotLoggedIn(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("no session file location; set HOME or pass --session-file")]
    NoSessionFile,
    #[error("http client build failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

fn describe_api(err: &ApiError) -> String {
    match err.detail() {
        Some(detail) => format!("{err}: {detail}"),
        None => err.to_string(),
    }
}

fn describe_session(err: &SessionError) -> String {
    match err {
        SessionError::Api(api) => describe_api(api),
        other => other.to_string(),
    }
}

#[derive(Parser, Debug)]
#[command(name = "foodshare", about = "FoodShare inventory, waste, and donation CLI")]
struct Cli {
    #[arg(long, env = API_BASE_ENV, default_value = DEFAULT_API_BASE)]
    base_url: String,

    /// Where the session (user record + token) is persisted.
    #[arg(long, env = "FOODSHARE_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "FOODSHARE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register(RegisterArgs),
    Logout,
    Whoami,
    Food(FoodCommand),
    Waste(WasteCommand),
    Centers,
    Donations(DonationCommand),
    Categories,
    Profile(ProfileCommand),
    /// Inventory totals, waste per food, and donations per month.
    Summary,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    username: String,
    #[arg(long, env = "FOODSHARE_PASSWORD", hide_env_values = true)]
    password: String,
    /// Defaults to `--password`.
    #[arg(long)]
    confirm_password: Option<String>,
}

#[derive(Args, Debug)]
struct FoodCommand {
    #[command(subcommand)]
    command: FoodSubcommand,
}

#[derive(Subcommand, Debug)]
enum FoodSubcommand {
    List {
        /// Only items with stock left.
        #[arg(long, default_value_t = false)]
        available: bool,
    },
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        quantity: String,
        #[arg(long)]
        category: i64,
        /// `YYYY-MM-DD`
        #[arg(long)]
        expires: Option<String>,
    },
    Delete {
        id: i64,
    },
}

#[derive(Args, Debug)]
struct WasteCommand {
    #[command(subcommand)]
    command: WasteSubcommand,
}

#[derive(Subcommand, Debug)]
enum WasteSubcommand {
    List,
    Add {
        #[arg(long)]
        food_log: i64,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        reason: String,
    },
    Delete {
        id: i64,
    },
}

#[derive(Args, Debug)]
struct DonationCommand {
    #[command(subcommand)]
    command: DonationSubcommand,
}

#[derive(Subcommand, Debug)]
enum DonationSubcommand {
    List,
    Create {
        #[arg(long)]
        center: i64,
        /// `FOOD_LOG_ID:QUANTITY`, repeatable.
        #[arg(long = "item", value_parser = parse_donation_item, required = true)]
        items: Vec<DonationItem>,
    },
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Show,
    Stats,
    Update {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        dark_mode: Option<bool>,
        #[arg(long, hide_env_values = true, env = "FOODSHARE_NEW_PASSWORD")]
        new_password: Option<String>,
    },
    /// Delete the account and end the session.
    Delete,
}

fn parse_donation_item(raw: &str) -> Result<DonationItem, String> {
    let (id, quantity) = raw.split_once(':').ok_or_else(|| format!("expected FOOD_LOG_ID:QUANTITY, got {raw:?}"))?;
    let food_log = id.trim().parse::<i64>().map_err(|_| format!("invalid food log id {id:?}"))?;
    let quantity = quantity.trim().parse::<f64>().map_err(|_| format!("invalid quantity {quantity:?}"))?;
    Ok(DonationItem { food_log, quantity })
}

fn default_session_file() -> Result<PathBuf, CliError> {
    let home = std::env::var_os("HOME").filter(|h| !h.is_empty()).ok_or(CliError::NoSessionFile)?;
    Ok(PathBuf::from(home).join(".foodshare").join("session.json"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = ClientConfig::new(&cli.base_url)?;
    let session_file = match cli.session_file {
        Some(path) => path,
        None => default_session_file()?,
    };
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(session_file));
    let http = reqwest::Client::builder().user_agent(concat!("foodshare-cli/", env!("CARGO_PKG_VERSION"))).build()?;
    let client = ApiClient::new(config, Arc::new(ReqwestTransport::new(http)), store);

    let session = SessionStore::new(client);
    session.restore();

    let result = run(&session, cli.command).await;
    if let Err(CliError::Api(err)) = &result {
        if session.expire_if_unauthorized(err) {
            eprintln!("session expired; log in again");
        }
    }
    result
}

/// Resolve the route guard for commands that need a signed-in user.
fn require_user(session: &SessionStore) -> Result<&ApiClient, CliError> {
    match guard::decide(&session.state()) {
        GuardDecision::Render => Ok(session.client()),
        GuardDecision::Redirect(route) => Err(CliError::NotLoggedIn(route)),
        GuardDecision::Pending => Err(CliError::NotLoggedIn(guard::LOGIN_ROUTE)),
    }
}

async fn run(session: &SessionStore, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login { username, password } => {
            let (username, password) = validation::validate_login(&username, &password).map_err(invalid)?;
            let user = session.login(&username, &password).await?;
            eprintln!("logged in as {}", user.username);
            Ok(())
        }
        Command::Register(args) => run_register(session, args).await,
        Command::Logout => {
            session.logout().await?;
            eprintln!("logged out");
            Ok(())
        }
        Command::Whoami => {
            require_user(session)?;
            let user = session.user();
            print_json(&json!({
                "id": user.as_ref().map(|u| u.id),
                "username": user.as_ref().map(|u| u.username.as_str()),
                "first_name": user.as_ref().map(|u| u.first_name.as_str()),
                "last_name": user.as_ref().map(|u| u.last_name.as_str()),
                "email": user.as_ref().map(|u| u.email.as_str()),
            }))
        }
        Command::Food(food) => run_food(session, food).await,
        Command::Waste(waste) => run_waste(session, waste).await,
        Command::Centers => print_json(&require_user(session)?.donation_centers().await?),
        Command::Donations(donations) => run_donations(session, donations).await,
        Command::Categories => print_json(&require_user(session)?.categories().await?),
        Command::Profile(profile) => run_profile(session, profile).await,
        Command::Summary => run_summary(session).await,
    }
}

async fn run_register(session: &SessionStore, args: RegisterArgs) -> Result<(), CliError> {
    let confirm = args.confirm_password.clone().unwrap_or_else(|| args.password.clone());
    let form = RegisterRequest {
        first_name: args.first_name,
        last_name: args.last_name,
        email: args.email,
        username: args.username,
        password: args.password,
    };
    let form = validation::validate_registration(&form, &confirm).map_err(invalid)?;
    let user = session.register(&form).await?;
    eprintln!("registered and logged in as {}", user.username);
    Ok(())
}

async fn run_food(session: &SessionStore, food: FoodCommand) -> Result<(), CliError> {
    let client = require_user(session)?;
    match food.command {
        FoodSubcommand::List { available } => {
            let logs = client.my_food_logs().await?;
            if available {
                print_json(&reports::available_items(&logs))
            } else {
                print_json(&logs)
            }
        }
        FoodSubcommand::Add { name, quantity, category, expires } => {
            let item =
                validation::validate_food_log(&name, &quantity, Some(category), expires.as_deref()).map_err(invalid)?;
            print_json(&client.create_food_log(&item).await?)
        }
        FoodSubcommand::Delete { id } => {
            client.delete_food_log(id).await?;
            eprintln!("deleted food log {id}");
            Ok(())
        }
    }
}

async fn run_waste(session: &SessionStore, waste: WasteCommand) -> Result<(), CliError> {
    let client = require_user(session)?;
    match waste.command {
        WasteSubcommand::List => print_json(&client.my_waste_logs().await?),
        WasteSubcommand::Add { food_log, amount, reason } => {
            let reason = validation::sanitize_input(&reason);
            if reason.is_empty() {
                return Err(invalid("Please fill in all required fields"));
            }
            let logs = client.my_food_logs().await?;
            let item = logs
                .iter()
                .find(|log| log.id == food_log)
                .ok_or_else(|| CliError::Invalid("Selected food item not found.".to_owned()))?;
            let amount = validation::validate_waste_amount(&amount, item.available_quantity).map_err(CliError::Invalid)?;
            let user_id = session.user().map(|u| u.id);
            client.add_waste_log(&NewWasteLog::new(user_id, food_log, amount, &reason)).await?;
            print_json(&client.my_waste_logs().await?)
        }
        WasteSubcommand::Delete { id } => {
            client.delete_waste_log(id).await?;
            eprintln!("deleted waste log {id}");
            Ok(())
        }
    }
}

async fn run_donations(session: &SessionStore, donations: DonationCommand) -> Result<(), CliError> {
    let client = require_user(session)?;
    match donations.command {
        DonationSubcommand::List => print_json(&client.my_donations().await?),
        DonationSubcommand::Create { center, items } => {
            let items = validation::validate_donation_items(&items).map_err(invalid)?;
            print_json(&client.create_donations(&MultiDonation { center, items }).await?)
        }
    }
}

async fn run_profile(session: &SessionStore, profile: ProfileCommand) -> Result<(), CliError> {
    let client = require_user(session)?;
    match profile.command {
        ProfileSubcommand::Show => print_json(&client.current_user().await?),
        ProfileSubcommand::Stats => print_json(&client.user_stats().await?),
        ProfileSubcommand::Update { username, email, first_name, last_name, dark_mode, new_password } => {
            let info = client.current_user().await?;
            let mut update = UserUpdate::from_info(&info);
            if let Some(username) = username {
                update.username = validation::sanitize_input(&username);
            }
            if let Some(email) = email {
                update.email = validation::sanitize_input(&email);
            }
            if let Some(first_name) = first_name {
                update.first_name = validation::sanitize_input(&first_name);
            }
            if let Some(last_name) = last_name {
                update.last_name = validation::sanitize_input(&last_name);
            }
            if let Some(dark_mode) = dark_mode {
                update.profile.prefers_dark_mode = dark_mode;
            }
            if let Some(password) = new_password {
                validation::validate_password(&password).map_err(invalid)?;
                update.password = Some(password);
            }
            client.update_user(&update).await?;
            print_json(&client.current_user().await?)
        }
        ProfileSubcommand::Delete => {
            client.delete_user().await?;
            if let Err(e) = session.logout().await {
                tracing::warn!(error = %e, "logout after account deletion failed");
            }
            eprintln!("account deleted");
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct Summary {
    totals: Totals,
    waste_by_food: Vec<(String, f64)>,
    donations_by_month: Vec<(String, usize)>,
}

#[derive(Serialize)]
struct Totals {
    items_available: usize,
    quantity_available: f64,
    quantity_donated: f64,
    quantity_wasted: f64,
}

impl From<InventoryTotals> for Totals {
    fn from(t: InventoryTotals) -> Self {
        Self {
            items_available: t.items_available,
            quantity_available: t.quantity_available,
            quantity_donated: t.quantity_donated,
            quantity_wasted: t.quantity_wasted,
        }
    }
}

async fn run_summary(session: &SessionStore) -> Result<(), CliError> {
    let client = require_user(session)?;
    let logs = client.my_food_logs().await?;
    let waste = client.my_waste_logs().await?;
    let donations = client.my_donations().await?;
    print_json(&Summary {
        totals: InventoryTotals::from_logs(&logs).into(),
        waste_by_food: reports::waste_by_food(&waste),
        donations_by_month: reports::donations_by_month(&donations),
    })
}

fn invalid(message: &str) -> CliError {
    CliError::Invalid(message.to_owned())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
