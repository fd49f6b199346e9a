use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Where should the engine store data, including logs?
    pub writeable_path: String,

    /// Should we log at all?
    pub logs: bool,
    /// Should logs be printed to stdout?
    pub stdout_logs: bool,
    /// Should logs be colored?
    pub colored_logs: bool,
}

impl Config {
    /// No logging, e.g. for tests and one-shot tools.
    pub fn no_logs(writeable_path: &str) -> Config {
        Config {
            writeable_path: writeable_path.to_string(),
            logs: false,
            stdout_logs: false,
            colored_logs: false,
        }
    }

    pub fn ui_config(writeable_path: &str) -> Config {
        Config {
            writeable_path: writeable_path.to_string(),
            logs: true,
            stdout_logs: true,
            colored_logs: true,
        }
    }
}
