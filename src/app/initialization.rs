//! Application initialization and configuration

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, LevelFilter};

use crate::collaborators::{HttpForwarder, LocalCollaborators, LocalState};
use crate::config::{ConfigManager, EngineConfig};
use crate::dispatch::NotificationDispatcher;
use crate::lifecycle::SubscriptionManager;
use crate::{cli, display, logging, processor};

pub fn load_configuration(args: &cli::Args) -> Result<ConfigManager> {
    let mut manager = if let Some(config_file) = &args.config_file {
        debug!("Loading configuration from explicit file: {}", config_file.display());
        ConfigManager::load_from_file(config_file.clone())?
    } else {
        ConfigManager::load()?
    };

    if let Some(section_name) = &args.config_name {
        manager.select_section(section_name.clone());
    }

    Ok(manager)
}

pub fn configure_logging(args: &cli::Args, config: &ConfigManager) -> Result<logging::LogConfig> {
    let console_level = if args.debug {
        LevelFilter::Trace
    } else if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        match config.get_log_level("base", "console-level") {
            Ok(Some(level)) => level,
            Ok(None) => LevelFilter::Info,
            Err(e) => {
                debug!("Invalid console-level in config, using default: {}", e);
                LevelFilter::Info
            }
        }
    };

    let format = if args.log_format != "text" {
        logging::LogFormat::from_str(&args.log_format).map_err(|e| anyhow::anyhow!(e))?
    } else {
        config
            .get_value("base", "log-format")
            .and_then(|value| logging::LogFormat::from_str(value).ok())
            .unwrap_or(logging::LogFormat::Text)
    };

    let log_file_path = args.log_file.clone().or_else(|| config.get_path("base", "log-file"));

    let file_log_level = match &args.log_file_level {
        Some(level_str) => Some(logging::parse_log_level(level_str)?),
        None => match config.get_log_level("base", "file-log-level") {
            Ok(level) => level,
            Err(e) => {
                debug!("Invalid file-log-level in config, ignoring: {}", e);
                None
            }
        },
    };

    let (destination, file_level) = match (log_file_path, file_log_level) {
        (Some(path), level) => {
            let level = level.unwrap_or(console_level);
            debug!("File logging enabled: {} (level: {:?})", path.display(), level);
            (logging::LogDestination::Both(path), Some(level))
        }
        (None, None) => (logging::LogDestination::Console, None),
        (None, Some(_)) => {
            error!("Log file level specified without log file");
            return Err(anyhow::anyhow!("Log file level specified without log file"));
        }
    };

    Ok(logging::LogConfig {
        console_level,
        file_level,
        format,
        destination,
    })
}

/// Engine settings from config, validated
pub fn load_engine_config(config: &ConfigManager) -> Result<EngineConfig> {
    let engine = config.get_engine_config().context("Failed to read [engine] configuration")?;
    engine.validate().context("Invalid [engine] configuration")?;
    debug!("Engine configuration: {:?}", engine);
    Ok(engine)
}

pub fn create_colour_manager(args: &cli::Args, config: &ConfigManager) -> display::ColourManager {
    match config.get_bool("base", "color") {
        Ok(Some(false)) => display::ColourManager::with_colours(false),
        _ => display::ColourManager::from_args(args.no_color),
    }
}

/// Everything a command needs, wired over the local state snapshot
pub struct Engine {
    pub collaborators: LocalCollaborators,
    pub manager: Arc<SubscriptionManager>,
    pub dispatcher: NotificationDispatcher,
    pub config: EngineConfig,
}

impl Engine {
    pub fn build(state: LocalState, config: EngineConfig) -> Result<Self> {
        let lifecycle = config.lifecycle_settings()?;
        let collaborators = LocalCollaborators::from_state(state, lifecycle.max_lifetime);

        let manager = Arc::new(SubscriptionManager::new(
            collaborators.provider.clone(),
            collaborators.store.clone(),
            collaborators.items.clone(),
            lifecycle,
        ));

        let forwarder = Arc::new(HttpForwarder::new(&config.source_name, config.forward_timeout));
        let dispatcher = NotificationDispatcher::new(
            collaborators.store.clone(),
            forwarder,
            collaborators.items.clone(),
            collaborators.queue.clone(),
            Arc::new(processor::default_registry()),
            config.dispatch_settings(),
        );

        Ok(Self { collaborators, manager, dispatcher, config })
    }

    pub fn snapshot(&self) -> LocalState {
        self.collaborators.to_state()
    }
}
