/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Optional JSON file overriding the built-in cycle schedule.
    pub schedule_path: Option<String>,
    pub market_cache_ttl_secs: u64,
    pub reconcile_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./ipg.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse()
            .unwrap_or(3001);

        let schedule_path = std::env::var("SCHEDULE_PATH").ok().filter(|p| !p.is_empty());

        let market_cache_ttl_secs = std::env::var("MARKET_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(300);

        let reconcile_interval_secs = std::env::var("RECONCILE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(3600);

        Ok(Self {
            database_path,
            port,
            schedule_path,
            market_cache_ttl_secs,
            reconcile_interval_secs,
        })
    }
}
