use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "iptv-sync")]
#[command(about = "Synchronize IPTV provider catalogs into PostgreSQL", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "IPTV_SYNC_CONFIG_PATH")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Sync every enabled provider
    Sync,

    /// Sync one provider, enabled or not
    SyncProvider {
        /// Provider id
        id: i64,
    },

    /// Refresh a provider's category list from upstream
    Discover {
        /// Provider id
        id: i64,
    },

    /// Print the current sync progress
    Progress {
        /// Read the shared record instead of this process's cache
        #[arg(long)]
        force: bool,
    },

    /// Ask the running sync to stop; a second request force-resets it
    Cancel,

    /// Apply database migrations
    Migrate,

    /// Apply migrations, then sync due providers until interrupted
    Daemon,
}
