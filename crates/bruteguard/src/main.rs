mod commands;
mod config;
mod logging;

use bruteguard_core::ListKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bruteguard")]
#[command(about = "Brute-force protection for login services", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/bruteguard/config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the admission API server
    Server {
        /// Generate default configuration file
        #[arg(long)]
        init_config: bool,
    },

    /// Manage blacklisted subnets
    #[command(subcommand)]
    Blacklist(SubnetCommands),

    /// Manage whitelisted subnets
    #[command(subcommand)]
    Whitelist(SubnetCommands),

    /// Reset rate-limit buckets for a login and/or IP
    Reset {
        #[arg(long)]
        login: Option<String>,

        #[arg(long)]
        ip: Option<String>,
    },

    /// Run one admission check and print the verdict
    Check {
        #[arg(long)]
        login: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        ip: String,
    },

    /// Create or update the database schema
    Migrate,
}

#[derive(Subcommand)]
enum SubnetCommands {
    /// List subnets
    List,

    /// Add a subnet
    Add {
        /// IPv4 CIDR, e.g. 10.0.0.0/8
        cidr: String,
    },

    /// Remove a subnet
    Remove {
        /// CIDR exactly as it was added
        cidr: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Server { init_config: true } = cli.command {
        return commands::server::init_config(&cli.config).await;
    }

    let mut config = config::load_config(&cli.config).await?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let _log_guard = logging::init(&config.logging)?;

    match cli.command {
        Commands::Server { .. } => commands::server::run(config).await?,
        Commands::Blacklist(cmd) => {
            commands::subnet::handle(&config, ListKind::Blacklist, cmd).await?;
        }
        Commands::Whitelist(cmd) => {
            commands::subnet::handle(&config, ListKind::Whitelist, cmd).await?;
        }
        Commands::Reset { login, ip } => commands::reset::run(&config, login, ip).await?,
        Commands::Check {
            login,
            password,
            ip,
        } => commands::check::run(&config, login, password, ip).await?,
        Commands::Migrate => commands::migrate::run(&config).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subnet_commands() {
        let cli = Cli::try_parse_from(["bruteguard", "blacklist", "add", "10.0.0.0/8"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Blacklist(SubnetCommands::Add { ref cidr }) if cidr == "10.0.0.0/8"
        ));
        assert_eq!(cli.config, PathBuf::from("/etc/bruteguard/config.toml"));
    }

    #[test]
    fn test_cli_check_requires_all_fields() {
        assert!(Cli::try_parse_from(["bruteguard", "check", "--login", "alice"]).is_err());

        let cli = Cli::try_parse_from([
            "bruteguard", "-c", "/tmp/bg.toml", "check", "--login", "alice", "--password", "pw",
            "--ip", "10.0.0.1",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/bg.toml"));
        assert!(matches!(cli.command, Commands::Check { .. }));
    }
}
