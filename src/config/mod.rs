mod paths;
mod settings;

pub use paths::global_config_path;
pub use settings::{parse_peer_list, Overrides, Settings};
