/// Bootstrap an admin account.
///
/// Usage: create-admin --name NAME --email EMAIL [--password PASSWORD]
///   Without --password a random one is generated and printed once.

use anyhow::Context;
use clap::Parser;
use rand::{distributions::Alphanumeric, Rng};

use fundportal_api::{
    db,
    services::auth::{normalize_email, validate_credentials},
};

#[derive(Parser)]
#[command(name = "create-admin", about = "Create an admin user in the fund portal database")]
struct Args {
    #[arg(long)]
    name: String,

    #[arg(long)]
    email: String,

    /// Generated when omitted
    #[arg(long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let generated = args.password.is_none();
    let password = args.password.unwrap_or_else(|| {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(20)
            .map(char::from)
            .collect()
    });

    validate_credentials(&args.name, &args.email, &password).map_err(|e| anyhow::anyhow!("{e}"))?;
    let email = normalize_email(&args.email);

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL required")?;
    let pool = db::create_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = $1)")
        .bind(&email)
        .fetch_one(&pool)
        .await?;
    if exists {
        anyhow::bail!("A user with email {email} already exists");
    }

    let password_hash = bcrypt::hash(&password, 12)?;
    let id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO users (name, email, password_hash, role, is_email_verified, is_onboarded)
         VALUES ($1, $2, $3, 'admin', TRUE, TRUE)
         RETURNING id",
    )
    .bind(args.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .fetch_one(&pool)
    .await?;

    tracing::info!("admin {} created ({})", email, id);
    if generated {
        println!("Generated password: {password}");
    }
    Ok(())
}
