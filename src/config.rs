use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct VindiConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct ClicksignConfig {
    pub access_token: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub vindi: VindiConfig,
    pub clicksign: ClicksignConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("SERVER_PORT must be a valid port number")?;

        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;

        let vindi = VindiConfig {
            api_key: std::env::var("VINDI_API_KEY").context("VINDI_API_KEY is not set")?,
            base_url: std::env::var("VINDI_BASE_URL")
                .unwrap_or_else(|_| "https://app.vindi.com.br/api/v1".to_string()),
        };

        let clicksign = ClicksignConfig {
            access_token: std::env::var("CLICKSIGN_ACCESS_TOKEN")
                .context("CLICKSIGN_ACCESS_TOKEN is not set")?,
            base_url: std::env::var("CLICKSIGN_BASE_URL")
                .unwrap_or_else(|_| "https://app.clicksign.com/api/v3".to_string()),
        };

        Ok(Self {
            server: ServerConfig { host, port },
            database_url,
            vindi,
            clicksign,
        })
    }
}
