use anyhow::Context;
use clap::{Parser, Subcommand};
use roomcast_config::load as load_config;
use roomcast_database::{ChatStore, CreateRoomRequest, CreateUserRequest, MemberRole, StoreError};
use roomcast_gateway::{create_router, GatewayState};
use roomcast_runtime::{telemetry, BackendServices};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "roomcast-server")]
#[command(about = "Real-time presence and room fan-out server (serves by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server
    Serve,
    /// Create two demo users sharing a room and print their tokens
    SeedData,
    /// Print a fresh token for an existing user
    IssueToken {
        /// User id to issue the token for
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;
    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(&config, &services).await,
        Commands::SeedData => seed_data(&services).await,
        Commands::IssueToken { user } => issue_token(&services, &user).await,
    };

    services.shutdown().await;
    result
}

async fn run_server(
    config: &roomcast_config::AppConfig,
    services: &BackendServices,
) -> anyhow::Result<()> {
    let state = GatewayState::new(services.coordinator.clone(), services.database.clone());
    let app = create_router(state);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(roomcast_runtime::shutdown_signal())
        .await
        .context("http server error")?;

    info!("server shut down");
    Ok(())
}

async fn seed_data(services: &BackendServices) -> anyhow::Result<()> {
    info!("seeding database with demo data");

    let alice = services
        .store
        .create_user(&CreateUserRequest::named("alice"))
        .await
        .map_err(already_seeded)?;
    let bob = services
        .store
        .create_user(&CreateUserRequest::named("bob"))
        .await
        .map_err(already_seeded)?;

    let room = services
        .store
        .create_room(&CreateRoomRequest::public("general", &alice.id))
        .await
        .context("failed to create demo room")?;
    services
        .store
        .add_member(&room.id, &bob.id, MemberRole::Member)
        .await
        .context("failed to add bob to the demo room")?;

    println!("Database seeded:");
    println!("- room    {} ({})", room.name, room.id);
    for user in [&alice, &bob] {
        let issued = services
            .authenticator
            .issue_token(&user.id)
            .with_context(|| format!("failed to issue token for {}", user.username))?;
        println!("- user    {} ({})", user.username, user.id);
        println!("  token   {}", issued.token);
        println!("  expires {}", issued.expires_at.to_rfc3339());
    }

    Ok(())
}

async fn issue_token(services: &BackendServices, user_id: &str) -> anyhow::Result<()> {
    let user = services
        .store
        .find_user(user_id)
        .await
        .context("failed to look up user")?
        .with_context(|| format!("no user with id {user_id}"))?;

    let issued = services
        .authenticator
        .issue_token(&user.id)
        .context("failed to issue token")?;

    println!("{}", issued.token);
    info!(user_id = %user.id, expires_at = %issued.expires_at, "token issued");
    Ok(())
}

fn already_seeded(error: StoreError) -> anyhow::Error {
    match error {
        StoreError::Duplicate(_) => {
            anyhow::anyhow!("demo users already exist; the database has been seeded before")
        }
        other => anyhow::Error::new(other).context("failed to create demo user"),
    }
}
