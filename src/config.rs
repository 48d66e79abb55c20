use std::path::PathBuf;

/// Per-node runtime options, read once at startup. Chain parameters live in
/// `core::params`; everything here may differ between nodes.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the gossip server listens on
    pub port: u16,

    /// Initial peers to dial, e.g. `ws://127.0.0.1:3001`
    pub peers: Vec<String>,

    /// Address advertised in handshakes
    pub my_address: String,

    /// Miner/signer key (hex); generated when absent
    pub private_key: Option<String>,

    pub enable_mining: bool,

    /// Enter `Syncing` at startup and request the chain from peers
    pub enable_chain_request: bool,

    /// Emit contract-interpreter log events
    pub enable_logging: bool,

    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 3000,
            peers: Vec::new(),
            my_address: "ws://127.0.0.1:3000".to_string(),
            private_key: None,
            enable_mining: false,
            enable_chain_request: false,
            enable_logging: false,
            data_dir: PathBuf::from("ember-data"),
        }
    }
}

impl Config {
    /// Build a config from the environment, falling back to defaults.
    /// Richer configuration files are the launcher's concern, not ours.
    pub fn from_env() -> Config {
        let defaults = Config::default();
        let port = env_var("PORT")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.port);

        Config {
            port,
            peers: env_var("PEERS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            my_address: env_var("MY_ADDRESS")
                .unwrap_or_else(|| format!("ws://127.0.0.1:{port}")),
            private_key: env_var("PRIVATE_KEY"),
            enable_mining: env_flag("ENABLE_MINING"),
            enable_chain_request: env_flag("ENABLE_CHAIN_REQUEST"),
            enable_logging: env_flag("ENABLE_LOGGING"),
            data_dir: env_var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_flag(name: &str) -> bool {
    matches!(env_var(name).as_deref(), Some("true") | Some("1"))
}
