//! Display module for colour management and report tables

pub mod colours;
pub mod reports;

pub use colours::ColourManager;
pub use reports::{
    format_compact_table, render_batch, render_directives, render_maintenance, render_renewal, render_sync,
};
