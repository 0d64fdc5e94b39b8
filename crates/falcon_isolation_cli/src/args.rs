use std::path::PathBuf;

use clap::Parser;
use falcon_isolation::config::IsolationConfig;

/// fisotest: run an isolation spec file against PostgreSQL
#[derive(Debug, Parser)]
#[command(
    name = "fisotest",
    about = "Interleaving isolation tester: runs every permutation of a spec file",
    version,
    disable_help_flag = true
)]
pub struct Args {
    /// Spec file to run
    #[arg(required_unless_present = "print_default_config")]
    pub spec: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Database host
    #[arg(short = 'h', long, env = "PGHOST")]
    pub host: Option<String>,

    /// Database port
    #[arg(short = 'p', long, env = "PGPORT")]
    pub port: Option<u16>,

    /// Database user
    #[arg(short = 'U', long, env = "PGUSER")]
    pub user: Option<String>,

    /// Database name
    #[arg(short = 'd', long, env = "PGDATABASE")]
    pub dbname: Option<String>,

    /// Password (use PGPASSWORD env var to keep it off the command line)
    #[arg(short = 'W', long, env = "PGPASSWORD")]
    pub password: Option<String>,

    /// Print the statements each permutation would run, without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    pub print_default_config: bool,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9187)
    #[arg(long)]
    pub metrics_addr: Option<String>,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,
}

impl Args {
    /// Command-line and environment values override the file.
    pub fn apply_overrides(&self, config: &mut IsolationConfig) {
        let conn = &mut config.connection;
        if let Some(host) = &self.host {
            conn.host = host.clone();
        }
        if let Some(port) = self.port {
            conn.port = port;
        }
        if let Some(user) = &self.user {
            conn.user = user.clone();
        }
        if let Some(dbname) = &self.dbname {
            conn.dbname = dbname.clone();
        }
        if let Some(password) = &self.password {
            conn.password = Some(password.clone());
        }
    }
}
