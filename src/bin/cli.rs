use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use kanban_hub::authz::{seed_catalog, RoleCatalog, SqliteGrantStore};
use kanban_hub::db;
use kanban_hub::utils::{hash_password, normalize_email, utc_now};

#[derive(Parser, Debug)]
#[command(author, version, about = "kanban-hub operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration (reversible migrations only)
    MigrateRollback,
    /// Create or reset every role group of the catalog (ROLE_CATALOG_PATH overrides the built-in one)
    SeedGroups,
    /// Create a superuser, or promote the account when the email already exists
    CreateSuperuser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Mark an account as staff
    SetStaff {
        #[arg(long)]
        email: String,
        /// Remove the staff flag instead
        #[arg(long)]
        off: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenvy::dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            get_migrator().await?.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            print_status(&pool, &get_migrator().await?).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            rollback_last(&pool, &get_migrator().await?).await?;
        }
        Commands::SeedGroups => {
            let pool = db::init().await?;
            let catalog = RoleCatalog::from_env()?;
            let report = seed_catalog(&SqliteGrantStore::new(pool), &catalog).await?;
            for group in &report.groups {
                println!("{:<28} {:>2} permissions{}", group.name, group.permissions, if group.created { " (new)" } else { "" });
            }
            println!("{} created, {} reset", report.created, report.updated);
        }
        Commands::CreateSuperuser { name, email, password } => {
            let pool = db::init().await?;
            let id = create_superuser(&pool, &name, &email, &password).await?;
            println!("Superuser ready: {id}");
        }
        Commands::SetStaff { email, off } => {
            let pool = db::init().await?;
            let email = normalize_email(&email);
            let updated = sqlx::query("UPDATE users SET is_staff = ?, updated_at = ? WHERE email = ?")
                .bind(!off)
                .bind(utc_now())
                .bind(&email)
                .execute(&pool)
                .await?
                .rows_affected();
            if updated == 0 {
                anyhow::bail!("no user with email {email}");
            }
            println!("{email}: is_staff = {}", !off);
        }
    }

    Ok(())
}

async fn create_superuser(pool: &SqlitePool, name: &str, email: &str, password: &str) -> anyhow::Result<Uuid> {
    let email = normalize_email(email);
    let password_hash = hash_password(password)?;
    let now = utc_now();

    let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(pool)
        .await?;

    if let Some(id) = existing {
        sqlx::query(
            "UPDATE users SET name = ?, password_hash = ?, is_superuser = 1, is_staff = 1, is_active = 1, updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(&password_hash)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        return Ok(id);
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO users (id, name, email, password_hash, provider, is_superuser, is_staff, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'local', 1, 1, 1, ?, ?)
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(&email)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let filename = format!("{}_{}.sql", timestamp, sanitize_name(name));
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options = SqliteConnectOptions::from_str(&database_url)
        .with_context(|| format!("invalid DATABASE_URL: {database_url}"))?;
    SqlitePool::connect_with(db::tune(options))
        .await
        .context("failed to connect to database")
}

async fn applied_versions(pool: &SqlitePool) -> anyhow::Result<BTreeSet<i64>> {
    let table: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    if table.is_none() {
        return Ok(BTreeSet::new());
    }

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
        .fetch_all(pool)
        .await?;
    Ok(versions.into_iter().collect())
}

async fn print_status(pool: &SqlitePool, migrator: &Migrator) -> anyhow::Result<()> {
    let applied = applied_versions(pool).await?;

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter().filter(|m| !m.migration_type.is_down_migration()) {
        let status = if applied.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        println!("{:<8} {:<20} {}", status, migration.version, if desc.is_empty() { "unknown" } else { desc });
    }

    Ok(())
}

async fn rollback_last(pool: &SqlitePool, migrator: &Migrator) -> anyhow::Result<()> {
    let applied = applied_versions(pool).await?;
    let Some(&last) = applied.iter().next_back() else {
        println!("Nothing to roll back");
        return Ok(());
    };

    let reversible = migrator
        .iter()
        .any(|m| m.version == last && m.migration_type.is_down_migration());
    if !reversible {
        anyhow::bail!("migration {last} has no down script");
    }

    let target = applied.range(..last).next_back().copied().unwrap_or(0);
    migrator.undo(pool, target).await.context("rollback failed")?;
    println!("Rolled back {last}");
    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

async fn get_migrator() -> anyhow::Result<Migrator> {
    // ./migrations when run from the repo root, the crate's own folder otherwise.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {display}"))
}
