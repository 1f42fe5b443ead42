pub mod data;
pub mod defaults;
pub mod handle;
pub mod io;
pub mod printing;
pub mod vars;

pub use data::{FileConfig, ScenarioOverride};
pub use handle::{ActiveConfig, ConfigHandle};
pub use io::{ConfigError, ConfigSources};
pub use vars::VarSource;

#[cfg(test)]
mod tests;
