use clap::Parser;
use migration::MigratorTrait;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use teahouse::{settings, storage, web};

#[derive(Parser, Debug)]
#[command(name = "teahouse", version, about = "Online tea shop backend API")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database) and bring the schema up to date
    let db = storage::init(&settings.database).await?;
    migration::Migrator::up(&db, None).await.into_diagnostic()?;

    // ensure the bootstrap admin exists
    ensure_admin_user(&db, &settings).await?;

    // start web server
    web::serve(settings, db).await?;
    Ok(())
}

async fn ensure_admin_user(
    db: &sea_orm::DatabaseConnection,
    settings: &settings::Settings,
) -> Result<()> {
    if storage::get_user_by_email(db, &settings.auth.admin_email)
        .await
        .into_diagnostic()?
        .is_none()
    {
        let user = storage::create_user(
            db,
            storage::NewUser {
                username: "admin".to_string(),
                email: settings.auth.admin_email.clone(),
                password: settings.auth.admin_password.clone(),
            },
        )
        .await
        .into_diagnostic()?;
        storage::set_admin(db, user.id, true)
            .await
            .into_diagnostic()?;
        tracing::info!(email = %settings.auth.admin_email, "Created bootstrap admin user");
    }
    Ok(())
}
