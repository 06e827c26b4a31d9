use clap::Parser;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "points-ledger")]
#[command(version = "0.1.0")]
#[command(about = "Loyalty points ledger with accrual reconciliation", long_about = None)]
pub struct Cli {
    /// HTTP listen address (host:port)
    #[arg(short = 'a', long = "address", env = "RUN_ADDRESS")]
    pub address: Option<String>,

    /// Accrual system base URL
    #[arg(short = 'r', long = "accrual-address", env = "ACCRUAL_SYSTEM_ADDRESS")]
    pub accrual_address: Option<String>,

    /// PostgreSQL connection URL
    #[arg(short = 'd', long = "database-uri", env = "DATABASE_URI")]
    pub database_uri: Option<String>,

    /// Config directory
    #[arg(short = 'c', long = "config-dir", default_value = "config")]
    pub config_dir: String,

    /// Keep all data in memory instead of PostgreSQL
    #[arg(long)]
    pub in_memory: bool,
}

impl Cli {
    /// Command-line values override file and environment config
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(address) = &self.address {
            config.server.address = address.clone();
        }
        if let Some(accrual) = &self.accrual_address {
            config.accrual.base_url = with_scheme(accrual);
        }
        if let Some(uri) = &self.database_uri {
            config.database.url = uri.clone();
        }
        config.normalize();
    }
}

fn with_scheme(address: &str) -> String {
    let address = address.trim();
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "points-ledger",
            "-a",
            "0.0.0.0:9000",
            "-r",
            "accrual:8080/",
            "-d",
            "postgres://ledger@db/ledger",
        ]);
        let mut config = AppConfig::default_config();
        cli.apply(&mut config);

        assert_eq!(config.server.address, "0.0.0.0:9000");
        assert_eq!(config.accrual.base_url, "http://accrual:8080");
        assert_eq!(config.database.url, "postgres://ledger@db/ledger");
        assert!(!cli.in_memory);
    }

    #[test]
    fn test_missing_flags_keep_config() {
        let cli = Cli::parse_from(["points-ledger", "--in-memory"]);
        let mut config = AppConfig::default_config();
        cli.apply(&mut config);
        assert!(cli.in_memory);
        assert_eq!(config.accrual.base_url, "http://localhost:8080");
    }
}
