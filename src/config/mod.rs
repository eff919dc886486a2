use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres URL. Without it positions live in memory for the life of the process.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,

    // Decision validation
    pub btc_eth_max_leverage: i64,
    pub altcoin_max_leverage: i64,
    pub min_risk_reward: f64,

    // Logging
    pub log_json: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,

            btc_eth_max_leverage: env::var("BTC_ETH_MAX_LEVERAGE")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),
            altcoin_max_leverage: env::var("ALTCOIN_MAX_LEVERAGE")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),
            min_risk_reward: env::var("MIN_RISK_REWARD")
                .unwrap_or_else(|_| "3.0".into())
                .parse()
                .unwrap_or(3.0),

            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        config.check_leverage_ceilings()?;
        Ok(config)
    }

    /// Leverage ceilings clamp open decisions, so they must allow at least 1x.
    pub fn check_leverage_ceilings(&self) -> anyhow::Result<()> {
        if self.btc_eth_max_leverage < 1 {
            anyhow::bail!(
                "BTC_ETH_MAX_LEVERAGE must be at least 1, got {}",
                self.btc_eth_max_leverage
            );
        }
        if self.altcoin_max_leverage < 1 {
            anyhow::bail!(
                "ALTCOIN_MAX_LEVERAGE must be at least 1, got {}",
                self.altcoin_max_leverage
            );
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            host: "0.0.0.0".into(),
            port: 8080,
            btc_eth_max_leverage: 5,
            altcoin_max_leverage: 5,
            min_risk_reward: 3.0,
            log_json: false,
        }
    }
}
