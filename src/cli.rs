use clap::Parser;
use std::path::PathBuf;

/// ffu_controld: supervision daemon for fan filter units
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: /etc/ffu_controld/config.yml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and log to syslog
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_foreground() {
        let cli = Cli::parse_from(["ffu_controld"]);

        assert!(cli.config.is_none());
        assert!(!cli.daemonize);
    }

    #[test]
    fn accepts_config_and_daemonize() {
        let cli = Cli::parse_from(["ffu_controld", "-c", "/tmp/ffu.yml", "--daemonize"]);

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ffu.yml")));
        assert!(cli.daemonize);
    }
}
