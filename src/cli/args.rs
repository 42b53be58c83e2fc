use clap::{Parser, Subcommand};
use anyhow::Result;
use std::path::PathBuf;
use log::debug;

/// Subscription lifecycle manager and change-notification router
#[derive(Parser, Debug)]
#[command(name = "subsync")]
#[command(about = "Keeps change-notification subscriptions alive, mirrors them into a tracking store, and routes notifications by their client-state directives")]
#[command(version)]
pub struct Args {
    /// Verbose output (debug level logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (error level logging only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug output (trace level logging)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log format: text or json
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log file path for file output
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log level for file output (independent of console level)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_file_level: Option<String>,

    /// Configuration file path
    #[arg(long, value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Configuration section name
    #[arg(long, value_name = "SECTION", global = true)]
    pub config_name: Option<String>,

    /// JSON snapshot backing the local provider, store, items and queues
    #[arg(long, value_name = "FILE", default_value = "subsync-state.json", global = true)]
    pub state: PathBuf,

    /// Print reports as JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable coloured output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Parse a client state string and print its directives
    Parse {
        /// Raw client state, e.g. "forward:https://x.example/y;uipath:QueueA"
        client_state: String,
    },

    /// Renew subscriptions close to expiry
    Renew {
        /// Renew when less than this remains (e.g. 12h); defaults to config
        #[arg(long, value_name = "DURATION")]
        threshold: Option<String>,
    },

    /// Align the tracking store with the live subscriptions
    Reconcile,

    /// Renew then reconcile, repeatedly
    Maintain {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },

    /// Handle one notification intake request
    Dispatch {
        /// File holding the request body; stdin when omitted
        #[arg(long, value_name = "FILE")]
        payload: Option<PathBuf>,

        /// Answer a validation handshake with this token
        #[arg(long, value_name = "TOKEN")]
        validation_token: Option<String>,
    },

    /// Register a new subscription
    Subscribe {
        /// Resource path to monitor
        #[arg(long, value_name = "PATH")]
        resource: String,

        /// Directive string stored as the subscription's client state
        #[arg(long, value_name = "DIRECTIVES", default_value = "")]
        client_state: String,

        #[arg(long, value_name = "TYPE", default_value = "updated")]
        change_type: String,

        /// Notification endpoint; defaults to config
        #[arg(long, value_name = "URL")]
        notification_url: Option<String>,
    },

    /// Delete a subscription and mark its record Deleted
    Unsubscribe {
        id: String,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Args {
    let args = Args::parse();
    debug!("Parsed CLI arguments: {:?}", args);
    args
}

/// Validate CLI argument combinations
pub fn validate_args(args: &Args) -> Result<()> {
    let log_flags_count = [args.verbose, args.quiet, args.debug]
        .iter()
        .filter(|&&flag| flag)
        .count();

    if log_flags_count > 1 {
        return Err(anyhow::anyhow!(
            "Conflicting log level flags: only one of --verbose, --quiet, or --debug may be specified"
        ));
    }

    match args.log_format.to_lowercase().as_str() {
        "text" | "json" => {},
        _ => return Err(anyhow::anyhow!(
            "Invalid log format '{}'. Valid options: text, json", args.log_format
        )),
    }

    if let Some(ref level) = args.log_file_level {
        crate::logging::parse_log_level(level)?;
    }

    if args.log_file_level.is_some() && args.log_file.is_none() {
        return Err(anyhow::anyhow!(
            "--log-file-level requires --log-file to be specified"
        ));
    }

    if let Command::Renew { threshold: Some(threshold) } = &args.command {
        crate::config::parse_duration(threshold)
            .map_err(|e| anyhow::anyhow!("Invalid --threshold '{}': {}", threshold, e))?;
    }

    if let Command::Dispatch { payload: None, validation_token: None } = &args.command {
        debug!("No payload file given, reading request body from stdin");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_subcommand() {
        let args = parse(&["subsync", "parse", "forward:https://x.example/y;uipath:QueueA"]);
        assert_eq!(args.command, Command::Parse {
            client_state: "forward:https://x.example/y;uipath:QueueA".to_string(),
        });
        assert_eq!(args.state, PathBuf::from("subsync-state.json"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["subsync", "renew", "--threshold", "12h", "--json", "-v", "--state", "/tmp/s.json"]);
        assert!(args.json);
        assert!(args.verbose);
        assert_eq!(args.state, PathBuf::from("/tmp/s.json"));
        assert_eq!(args.command, Command::Renew { threshold: Some("12h".to_string()) });
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_subscribe_defaults() {
        let args = parse(&["subsync", "subscribe", "--resource", "sites/a/lists/b"]);
        match args.command {
            Command::Subscribe { resource, client_state, change_type, notification_url } => {
                assert_eq!(resource, "sites/a/lists/b");
                assert_eq!(client_state, "");
                assert_eq!(change_type, "updated");
                assert!(notification_url.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_validation_failures() {
        assert!(validate_args(&parse(&["subsync", "-v", "-q", "reconcile"])).is_err());
        assert!(validate_args(&parse(&["subsync", "--log-format", "xml", "reconcile"])).is_err());
        assert!(validate_args(&parse(&["subsync", "--log-file-level", "debug", "reconcile"])).is_err());
        assert!(validate_args(&parse(&["subsync", "renew", "--threshold", "soon"])).is_err());
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Args::try_parse_from(["subsync"]).is_err());
    }
}
