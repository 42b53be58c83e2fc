//! Application orchestration module

pub mod initialization;
pub mod execution;

pub use initialization::{
    configure_logging,
    create_colour_manager,
    load_configuration,
    load_engine_config,
    Engine,
};
pub use execution::run_command;
