use clap::{Parser, Subcommand};

use rampart::{app, auth, config, database, models::Role, tasks};

#[derive(Parser)]
#[command(name = "rampart", about = "Security-awareness training backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server
    Serve {
        /// Port to bind (also RAMPART_PORT / PORT env)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Apply pending database migrations and exit
    Migrate,
    /// Create a platform admin account
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rampart=info,tower_http=info".into()),
        )
        .init();

    let config = config::config();
    tracing::info!("Starting Rampart in {:?} mode", config.environment);

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => serve(port).await,
        Command::Migrate => {
            database::migrate().await.expect("migrations failed");
        }
        Command::CreateAdmin { email, password } => {
            create_admin(&email, &password).await.expect("create-admin failed");
        }
    }
}

async fn serve(port: Option<u16>) {
    database::migrate().await.expect("migrations failed");
    tasks::jobs::spawn_daily_snapshot_loop();

    let port = port
        .or_else(|| std::env::var("RAMPART_PORT").ok().and_then(|s| s.parse().ok()))
        .or_else(|| std::env::var("PORT").ok().and_then(|s| s.parse().ok()))
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("Rampart API listening on http://{}", bind_addr);
    axum::serve(listener, app()).await.expect("server");
}

async fn create_admin(email: &str, password: &str) -> anyhow::Result<()> {
    let pool = database::pool().await?;
    sqlx::query(
        "INSERT INTO users (id, email, password_digest, role, is_active, is_email_verified) \
         VALUES (gen_random_uuid(), $1, $2, $3, TRUE, TRUE)",
    )
    .bind(email.to_lowercase())
    .bind(auth::hash_password(password))
    .bind(Role::Admin.as_str())
    .execute(&pool)
    .await?;
    println!("Admin account created for {}", email);
    Ok(())
}
