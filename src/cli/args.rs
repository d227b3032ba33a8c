use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "Content delivery node", version = "0.1.0")]
/// Multi-source content delivery node
pub struct Arguments {
    #[arg(short, long, required = true)]
    /// Config file with node's configuration. In YAML format.
    pub config: PathBuf,

    #[arg(short, long)]
    /// Overrides the UDP port of the existence query protocol.
    pub udp_port: Option<u16>,

    #[arg(short, long)]
    /// Overrides the storage directory.
    pub storage: Option<PathBuf>,

    #[arg(short, long)]
    /// Log info about the ongoing communication to stdout. (For debugging purposes).
    pub verbose: bool,
}

/*

* - required

*   -c --config: Config file with node's configuration. In YAML format.
        Contains at least:
            - public_url: URL under which peers reach this node
        Optional:
            - main_domain: rendezvous domain resolving to all cluster members
            - seed_peers: peer URLs to sync with regardless of DNS
            - storage_path, cache_file_path, udp_port, http_bind, ...
    -u --udp-port: Overrides udp_port from the config file.
    -s --storage: Overrides storage_path from the config file.
    -v --verbose: Log info about the ongoing communication to stdout. (For debugging purposes)
    -h --help: Print help message
 */

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_argument_parsing_with_config() {
        let args = Arguments::parse_from(["test", "--config", "config.yaml"]);
        assert_eq!(args.config, PathBuf::from("config.yaml"));
        assert_eq!(args.udp_port, None);
        assert_eq!(args.storage, None);
        assert!(!args.verbose);
    }

    #[test]
    fn test_argument_parsing_with_overrides() {
        let args = Arguments::parse_from([
            "test",
            "--config",
            "config.yaml",
            "--udp-port",
            "9100",
            "--storage",
            "/srv/cdn",
        ]);
        assert_eq!(args.udp_port, Some(9100));
        assert_eq!(args.storage, Some(PathBuf::from("/srv/cdn")));
    }

    #[test]
    fn test_argument_parsing_with_verbose() {
        let args = Arguments::parse_from(["test", "-c", "config.yaml", "-v"]);
        assert_eq!(args.config, PathBuf::from("config.yaml"));
        assert!(args.verbose);
    }

    #[test]
    fn test_argument_parsing_missing_config() {
        let result = Arguments::try_parse_from(["test"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_argument_parsing_invalid_port() {
        let result =
            Arguments::try_parse_from(["test", "--config", "config.yaml", "--udp-port", "70000"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_argument_parsing_unknown_argument() {
        let result = Arguments::try_parse_from(["test", "--config", "config.yaml", "--unknown"]);
        assert!(result.is_err());
    }
}
