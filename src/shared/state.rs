use crate::billing::vindi::VindiClient;
use crate::config::AppConfig;
use crate::shared::utils::DbPool;
use crate::signature::clicksign::ClicksignClient;

/// Shared state handed to every request handler. Provider clients are
/// built once from the config so credentials never get read from the
/// environment inside request paths.
pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub vindi: VindiClient,
    pub clicksign: ClicksignClient,
}

impl AppState {
    pub fn new(config: AppConfig, conn: DbPool) -> Self {
        let vindi = VindiClient::new(config.vindi.clone());
        let clicksign = ClicksignClient::new(config.clicksign.clone());
        Self {
            conn,
            config,
            vindi,
            clicksign,
        }
    }
}
