//! unipub - run the tap conformance protocol against the simulated substrate
//!
//! Exits with status 0 when every check passed and non-zero on the first
//! violation.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tapcheck_common::logging::{
    parse_component_level, Component, ComponentKey, LogLevel, Logger, LoggingConfig,
};
use tapcheck_common::{log_error, log_info};
use tapcheck_harness::{run_simulated, HarnessConfig};

#[derive(Parser)]
#[command(name = "unipub")]
#[command(about = "Publish/subscribe tap conformance harness")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of publisher addresses
    #[arg(short = 'n', long)]
    fan_out: Option<i64>,

    /// Numbered messages sent before the sentinel
    #[arg(short, long)]
    max_msg_count: Option<i32>,

    /// Settle wait before each post-teardown check, in milliseconds
    #[arg(short, long)]
    settle_ms: Option<u64>,

    /// Sent count at which the in-traffic listing check runs
    #[arg(long)]
    listing_check_at: Option<u64>,

    /// Cooperating processes that list and check alongside the publisher
    #[arg(short, long)]
    peers: Option<usize>,

    /// Log level: off, error, warn, info, debug, trace
    #[arg(short, long, default_value = "info")]
    debug: LogLevel,

    /// Level override for one component, e.g. `hub=debug`; repeatable
    #[arg(long = "log", value_name = "COMPONENT=LEVEL", value_parser = parse_component_level)]
    component_levels: Vec<(ComponentKey, LogLevel)>,
}

impl Cli {
    fn logging_config(&self) -> LoggingConfig {
        self.component_levels.iter().fold(
            LoggingConfig::new().with_default_level(self.debug),
            |config, (component, level)| config.with_component_level(*component, *level),
        )
    }

    fn harness_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default(),
        };
        if let Some(fan_out) = self.fan_out {
            config = config.with_fan_out(fan_out);
        }
        if let Some(max_msg_count) = self.max_msg_count {
            config = config.with_max_msg_count(max_msg_count);
        }
        if let Some(settle_ms) = self.settle_ms {
            config = config.with_settle_ms(settle_ms);
        }
        if let Some(sent) = self.listing_check_at {
            config = config.with_listing_check_at(sent);
        }
        if let Some(peers) = self.peers {
            config = config.with_peers(peers);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.logging_config().apply();
    let logger = Logger::new_root(Component::CLI, "main");

    let config = cli.harness_config()?;
    log_info!(logger, "Running with {config:?}");

    match run_simulated(config).await {
        Ok(report) => {
            log_info!(
                logger,
                "PASS: {} messages sent, primary count {}, copy count {}, {} listing checks",
                report.messages_sent,
                report.primary_count,
                report.copy_count,
                report.checkpoints.len()
            );
            for (service, count) in &report.subscriber_counts {
                log_info!(logger, "Subscriber {service}: copy count {count}");
            }
            Ok(())
        }
        Err(e) => {
            log_error!(logger, "FAIL: {e}");
            Err(e).context("conformance run failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_level_flags() {
        let cli = Cli::parse_from(["unipub", "-d", "warn", "--log", "hub=debug", "--log", "node=off"]);
        let logging = cli.logging_config();
        assert_eq!(logging.default_level, LogLevel::Warn);
        assert_eq!(logging.component_levels[&ComponentKey::Hub], LogLevel::Debug);
        assert_eq!(logging.component_levels[&ComponentKey::Node], LogLevel::Off);

        assert!(Cli::try_parse_from(["unipub", "--log", "hub"]).is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from(["unipub", "-n", "3", "-m", "10", "-p", "0"]);
        let config = cli.harness_config().unwrap();
        assert_eq!(config.fan_out, 3);
        assert_eq!(config.max_msg_count, 10);
        assert_eq!(config.peers, 0);
        assert_eq!(config.settle_ms, HarnessConfig::default().settle_ms);
    }
}
