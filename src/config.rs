use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub admin_token: Option<String>, // Imports are unauthenticated when unset
    pub max_upload_bytes: usize,
    pub prefetch_chunk: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            admin_token: std::env::var("ADMIN_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            max_upload_bytes: std::env::var("IMPORT_MAX_UPLOAD_MB")
                .unwrap_or_else(|_| "20".to_string())
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("IMPORT_MAX_UPLOAD_MB must be a whole number"))
                .and_then(|mb| {
                    if mb == 0 {
                        anyhow::bail!("IMPORT_MAX_UPLOAD_MB must be at least 1");
                    }
                    Ok(mb * 1024 * 1024)
                })?,
            prefetch_chunk: std::env::var("IMPORT_PREFETCH_CHUNK")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!("IMPORT_PREFETCH_CHUNK must be a whole number (0 disables)")
                })?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            config.database_url.chars().take(20).collect::<String>()
        );
        if config.admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN not set, import endpoint is open");
        }
        tracing::debug!(
            "Upload limit: {} bytes, prefetch chunk: {}",
            config.max_upload_bytes,
            config.prefetch_chunk
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
