// 处理命令行参数

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::handle::databases::DatabaseListSource;
use crate::handle::report::OutputFormat;
use crate::handle::resolve::ConnectionArgs;
use crate::util::common::split_database_arg;

/// Move MySQL/MariaDB databases between servers
#[derive(Parser, Debug)]
#[command(name = "dbferry")]
#[command(version, about = "Move MySQL/MariaDB databases between servers")]
pub struct Cli {
    /// Settings file (TOML); missing file means defaults
    #[arg(long, global = true, default_value = "dbferry.toml")]
    pub settings: PathBuf,

    /// Answer every prompt with its default and never read from the terminal
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up databases on the source and restore them on the target
    Migrate(MigrateArgs),
    /// Print the replication identity (GTID / binlog position) of a server
    Capture(CaptureArgs),
    /// Check a data directory against the server version about to start
    Datadir(DatadirArgs),
    /// Manage encrypted connection profiles
    #[command(subcommand)]
    Profile(ProfileCommand),
}

#[derive(Args, Debug, Default)]
pub struct SourceArgs {
    /// Encrypted connection profile for the source
    #[arg(id = "source_config", long = "source-config")]
    pub config: Option<PathBuf>,
    #[arg(id = "source_host", long = "source-host")]
    pub host: Option<String>,
    #[arg(id = "source_port", long = "source-port")]
    pub port: Option<u16>,
    #[arg(id = "source_user", long = "source-user")]
    pub user: Option<String>,
    #[arg(id = "source_password", long = "source-password")]
    pub password: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// Encrypted connection profile for the target
    #[arg(id = "target_config", long = "target-config")]
    pub config: Option<PathBuf>,
    #[arg(id = "target_host", long = "target-host")]
    pub host: Option<String>,
    #[arg(id = "target_port", long = "target-port")]
    pub port: Option<u16>,
    #[arg(id = "target_user", long = "target-user")]
    pub user: Option<String>,
    #[arg(id = "target_password", long = "target-password")]
    pub password: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct ServerArgs {
    /// Encrypted connection profile
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub user: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
}

macro_rules! impl_connection {
    ($($ty:ty),*) => {$(
        impl $ty {
            pub fn connection(&self, passphrase: Option<String>) -> ConnectionArgs {
                ConnectionArgs {
                    config: self.config.clone(),
                    host: self.host.clone(),
                    port: self.port,
                    user: self.user.clone(),
                    password: self.password.clone(),
                    database: None,
                    passphrase,
                }
            }
        }
    )*};
}

impl_connection!(SourceArgs, TargetArgs, ServerArgs);

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Comma separated database names
    #[arg(long)]
    pub databases: Option<String>,

    /// File with one database name per line
    #[arg(long)]
    pub database_file: Option<PathBuf>,

    /// Every non-system database on the source
    #[arg(long)]
    pub all_databases: bool,

    /// Also migrate accounts holding privileges on each database
    #[arg(long)]
    pub users: bool,

    #[arg(long)]
    pub no_data: bool,

    #[arg(long)]
    pub no_structure: bool,

    /// Verify the artifact checksum before restoring
    #[arg(long)]
    pub verify: bool,

    /// Back up the target database before overwriting it
    #[arg(long)]
    pub backup_target: bool,

    /// Fail the database when its target backup fails
    #[arg(long, requires = "backup_target")]
    pub strict_target_backup: bool,

    /// Drop the target database before restoring
    #[arg(long)]
    pub drop_target: bool,

    /// Do not create a missing target database
    #[arg(long)]
    pub no_create_target: bool,

    /// Override the backup directory from the settings file
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    #[arg(long)]
    pub no_compress: bool,

    /// Encrypt artifacts (passphrase from DBFERRY_BACKUP_PASSPHRASE)
    #[arg(long)]
    pub encrypt: bool,

    #[arg(long)]
    pub no_checksum: bool,

    /// Delete this database's artifacts older than N days (0 keeps all)
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// Summary format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,
}

impl MigrateArgs {
    pub fn database_list(&self) -> DatabaseListSource {
        DatabaseListSource {
            explicit: self
                .databases
                .as_deref()
                .map(split_database_arg)
                .unwrap_or_default(),
            file: self.database_file.clone(),
            all: self.all_databases,
        }
    }
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct DatadirArgs {
    /// Data directory the server will start on
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Version about to run; detected from the installed server when omitted
    #[arg(long)]
    pub target_version: Option<String>,

    /// Service names to stop before moving the directory (repeatable)
    #[arg(long = "service")]
    pub services: Vec<String>,

    /// OS account for the initializer
    #[arg(long)]
    pub user: Option<String>,

    /// Only report; never remediate
    #[arg(long)]
    pub check: bool,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Write an encrypted connection profile (passphrase from DBFERRY_PASSPHRASE)
    Save {
        /// Output file, conventionally `<name>.enc` in the profile directory
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        database: Option<String>,
    },
    /// List saved profiles
    List,
}
