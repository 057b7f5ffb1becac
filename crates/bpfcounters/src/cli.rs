//! Command line definition.

use std::path::PathBuf;

use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};

use bpf_counters::{CounterResult, CountersConfig, OutputFormat};

/// Show and reset BPF dataplane counters
#[derive(Parser, Debug)]
#[command(name = "bpfcounters")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// bpffs directory holding the pinned counter maps
    #[arg(long, value_name = "DIR", global = true)]
    pub pin_dir: Option<PathBuf>,

    /// Number of per-CPU replicas (defaults to the possible CPU count)
    #[arg(long, value_name = "N", global = true)]
    pub replicas: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show and reset counters
    #[command(subcommand)]
    Counters(CountersCommand),
}

#[derive(Subcommand, Debug)]
pub enum CountersCommand {
    /// Dumps counters of one interface, or of every interface
    Dump(DumpArgs),
    /// Flushes the counters of one interface
    Flush(FlushArgs),
    /// Dumps the per-policy-rule counters
    Rules(DumpArgs),
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Interface name
    #[arg(long, value_name = "NAME")]
    pub iface: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl DumpArgs {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        }
    }
}

#[derive(Args, Debug)]
pub struct FlushArgs {
    /// Interface name
    #[arg(long, value_name = "NAME", value_parser = NonEmptyStringValueParser::new())]
    pub iface: String,
}

impl Cli {
    /// Builds the effective configuration: file first, then flag overrides.
    pub fn load_config(&self) -> CounterResult<CountersConfig> {
        let mut config = match &self.config {
            Some(path) => CountersConfig::load(path)?,
            None => CountersConfig::default(),
        };
        if let Some(dir) = &self.pin_dir {
            config.pin_dir = dir.clone();
        }
        if self.replicas.is_some() {
            config.replicas = self.replicas;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_dump_all() {
        let cli = Cli::try_parse_from(["bpfcounters", "counters", "dump"]).unwrap();
        match cli.command {
            Command::Counters(CountersCommand::Dump(args)) => {
                assert_eq!(args.iface, None);
                assert_eq!(args.format(), OutputFormat::Table);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_flush_with_overrides() {
        let cli = Cli::try_parse_from([
            "bpfcounters",
            "counters",
            "flush",
            "--iface",
            "eth0",
            "--replicas",
            "4",
            "--pin-dir",
            "/run/bpf",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.replicas, Some(4));
        assert_eq!(config.pin_dir, PathBuf::from("/run/bpf"));
        match cli.command {
            Command::Counters(CountersCommand::Flush(args)) => {
                assert_eq!(args.iface, "eth0");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_flush_requires_interface() {
        let missing = Cli::try_parse_from(["bpfcounters", "counters", "flush"]);
        assert_eq!(
            missing.unwrap_err().kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );

        let empty = Cli::try_parse_from(["bpfcounters", "counters", "flush", "--iface", ""]);
        assert_eq!(
            empty.unwrap_err().kind(),
            clap::error::ErrorKind::InvalidValue
        );
    }

    #[test]
    fn test_zero_replicas_rejected() {
        let cli =
            Cli::try_parse_from(["bpfcounters", "counters", "dump", "--replicas", "0"]).unwrap();
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn test_rules_json() {
        let cli = Cli::try_parse_from(["bpfcounters", "counters", "rules", "--json"]).unwrap();
        match cli.command {
            Command::Counters(CountersCommand::Rules(args)) => {
                assert_eq!(args.format(), OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
