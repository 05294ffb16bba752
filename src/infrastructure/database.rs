use crate::entities::{directories, project_access, projects, stored_files, upload_sessions};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::env;
use std::time::Duration;
use tracing::info;

pub async fn setup_database() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://uploads.db?mode=rwc".to_string());

    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(&db_url);
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;

    Ok(db)
}

pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    info!("🔄 Running auto-migrations...");

    // Order matters for foreign keys: projects -> directories
    let stmts = vec![
        (
            "projects",
            schema
                .create_table_from_entity(projects::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "directories",
            schema
                .create_table_from_entity(directories::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "project_access",
            schema
                .create_table_from_entity(project_access::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "upload_sessions",
            schema
                .create_table_from_entity(upload_sessions::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "stored_files",
            schema
                .create_table_from_entity(stored_files::Entity)
                .if_not_exists()
                .to_owned(),
        ),
    ];

    for (name, stmt) in stmts {
        db.execute(builder.build(&stmt)).await?;
        info!("   - Table '{}' checked/created", name);
    }

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_stored_files_checksum ON stored_files(checksum)",
        "CREATE INDEX IF NOT EXISTS idx_stored_files_dir_name ON stored_files(directory_id, name)",
        "CREATE INDEX IF NOT EXISTS idx_upload_sessions_project ON upload_sessions(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_upload_sessions_identity ON upload_sessions(project_id, directory_id, file_name, checksum)",
    ];

    for query in indexes {
        if let Err(e) = db
            .execute(sea_orm::Statement::from_string(builder, query.to_owned()))
            .await
        {
            tracing::warn!("   - Index creation warning: {} -> {}", query, e);
        }
    }

    Ok(())
}
