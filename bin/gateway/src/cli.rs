use std::path::PathBuf;

use clap::Parser;

/// JSON-RPC gateway fronting pools of blockchain nodes.
#[derive(Debug, Parser)]
#[command(name = "gateway", version, about)]
pub(crate) struct Cli {
    /// Path to the YAML config file.
    #[arg(long, short, default_value = "gateway.yml")]
    pub(crate) config: PathBuf,

    /// Override the configured listen port.
    #[arg(long)]
    pub(crate) port: Option<u16>,

    /// Log filter, e.g. `info` or `gateway_health=debug`. `RUST_LOG` wins
    /// when set.
    #[arg(long, default_value = "info")]
    pub(crate) log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults_and_overrides() {
        let cli = Cli::parse_from(["gateway"]);
        assert_eq!(cli.config, PathBuf::from("gateway.yml"));
        assert_eq!(cli.port, None);
        assert_eq!(cli.log_level, "info");

        let cli = Cli::parse_from(["gateway", "-c", "/etc/gw.yml", "--port", "9000"]);
        assert_eq!(cli.config, PathBuf::from("/etc/gw.yml"));
        assert_eq!(cli.port, Some(9000));
    }
}
