use std::{env, process, sync::Arc};

use clap::Parser;
use dbferry::{
    args::{CaptureArgs, Cli, Commands, DatadirArgs, MigrateArgs, ProfileCommand},
    error::{Error, Result},
    handle::{
        capture::capture_server,
        databases::resolve_database_list,
        guard::{check_compatibility, DataDirSafetyGuard},
        help::MysqlHelp,
        migrate::MigrationOrchestrator,
        report::{render_guard, render_identity, render_summary},
        resolve::ConfigResolver,
        select::{AutoSelector, ConsoleSelector, Selector},
        service::{detect_installed_version, CommandInitializer, SystemServiceManager},
    },
    model::{
        migration::MigrationConfig,
        profile::{ConnectionProfile, DEFAULT_PORT, DEFAULT_USER},
        settings::Settings,
    },
    util::{common::load_toml_or_default, profile_store::EncryptedConfigStore},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(env::var("RUST_LOG").ok()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

// RUST_LOG 缺失或无法解析时使用 dbferry=info
fn log_filter(rust_log: Option<String>) -> EnvFilter {
    rust_log
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new("dbferry=info"))
}

async fn run(cli: Cli) -> Result<()> {
    let settings: Settings = load_toml_or_default(&cli.settings)?;
    let selector: Arc<dyn Selector> = if cli.yes {
        Arc::new(AutoSelector)
    } else {
        Arc::new(ConsoleSelector::stdio())
    };

    match cli.command {
        Commands::Migrate(args) => run_migrate(args, settings, selector).await,
        Commands::Capture(args) => run_capture(args, &settings, selector).await,
        Commands::Datadir(args) => run_datadir(args, &settings, selector).await,
        Commands::Profile(cmd) => run_profile(cmd, &settings, selector),
    }
}

// 每个连接角色可单独设置口令, 否则使用通用口令
fn passphrase_for(role: &str) -> Option<String> {
    env::var(format!("DBFERRY_{}_PASSPHRASE", role.to_ascii_uppercase()))
        .or_else(|_| env::var("DBFERRY_PASSPHRASE"))
        .ok()
        .filter(|p| !p.is_empty())
}

async fn run_migrate(args: MigrateArgs, mut settings: Settings, selector: Arc<dyn Selector>) -> Result<()> {
    let resolver = ConfigResolver::new(selector.as_ref(), settings.profiles.resolved_dir());
    let (source, _) = resolver.resolve(&args.source.connection(passphrase_for("source")), "source")?;
    let (target, _) = resolver.resolve(&args.target.connection(passphrase_for("target")), "target")?;

    if let Some(dir) = &args.backup_dir {
        settings.backup.dir = dir.clone();
    }
    let backup_passphrase = env::var("DBFERRY_BACKUP_PASSPHRASE")
        .ok()
        .filter(|p| !p.is_empty());

    let mut config = MigrationConfig::new(source, target);
    config.migrate_users = args.users;
    config.migrate_data = !args.no_data;
    config.migrate_structure = !args.no_structure;
    config.verify_data = args.verify;
    config.backup_target = args.backup_target;
    config.strict_target_backup = args.strict_target_backup;
    config.drop_target = args.drop_target;
    config.create_target = !args.no_create_target;
    config.compress = settings.backup.compress && !args.no_compress;
    config.encrypt = settings.backup.encrypt || args.encrypt;
    config.checksum = settings.backup.checksum && !args.no_checksum;
    config.retention_days = args.retention_days.unwrap_or(settings.backup.retention_days);
    // 在选库和连接之前失败
    if config.needs_passphrase() && backup_passphrase.is_none() {
        return Err(Error::config(
            "--encrypt needs DBFERRY_BACKUP_PASSPHRASE in the environment",
        ));
    }

    let help = Arc::new(MysqlHelp::new(&settings, backup_passphrase));
    let databases =
        resolve_database_list(&args.database_list(), help.as_ref(), selector.as_ref(), &config.source).await?;

    let orchestrator = MigrationOrchestrator::new(help.clone(), help.clone(), help);
    match orchestrator.migrate_batch(&config, &databases).await {
        Ok(summary) => {
            println!("{}", render_summary(&summary, args.format));
            Ok(())
        }
        Err(Error::BatchFailed(summary)) => {
            println!("{}", render_summary(&summary, args.format));
            Err(Error::BatchFailed(summary))
        }
        Err(e) => Err(e),
    }
}

async fn run_capture(args: CaptureArgs, settings: &Settings, selector: Arc<dyn Selector>) -> Result<()> {
    let resolver = ConfigResolver::new(selector.as_ref(), settings.profiles.resolved_dir());
    let (profile, provenance) = resolver.resolve(&args.server.connection(passphrase_for("server")), "server")?;
    info!("capturing {} ({})", profile, provenance);
    let identity = capture_server(&profile).await?;
    println!("{}", render_identity(&identity, args.format));
    Ok(())
}

async fn run_datadir(args: DatadirArgs, settings: &Settings, selector: Arc<dyn Selector>) -> Result<()> {
    let version = match args.target_version {
        Some(v) => v,
        None => detect_installed_version(settings.timeouts.service()).await?,
    };

    if args.check {
        let (conflict, record) = check_compatibility(&args.data_dir, &version);
        println!(
            "existing: {}, target: {}, downgrade: {}",
            record.existing_version.as_deref().unwrap_or("-"),
            record.target_version,
            record.is_downgrade
        );
        if conflict {
            return Err(Error::SafetyConflict {
                data_dir: args.data_dir,
                existing: record.existing_version.unwrap_or_default(),
                target: version,
            });
        }
        return Ok(());
    }

    let services = if args.services.is_empty() {
        settings.datadir.services.clone()
    } else {
        args.services
    };
    let guard = DataDirSafetyGuard::new(
        Arc::new(SystemServiceManager::new(settings.timeouts.service())),
        Arc::new(CommandInitializer::new(
            settings.timeouts.init(),
            args.user.or_else(|| settings.datadir.user.clone()),
        )),
        selector,
        services,
    );
    let outcome = guard.ensure_compatible(&args.data_dir, &version).await?;
    println!("{}", render_guard(&outcome));
    Ok(())
}

fn run_profile(cmd: ProfileCommand, settings: &Settings, selector: Arc<dyn Selector>) -> Result<()> {
    let store = EncryptedConfigStore;
    match cmd {
        ProfileCommand::Save {
            output,
            host,
            port,
            user,
            password,
            database,
        } => {
            let profile = ConnectionProfile {
                host: host.unwrap_or_else(|| ConnectionProfile::default().host),
                port: port.unwrap_or(DEFAULT_PORT),
                user: user.unwrap_or_else(|| DEFAULT_USER.to_string()),
                password: password.unwrap_or_default(),
                database,
            };
            let passphrase = match passphrase_for("profile") {
                Some(p) => p,
                None => selector
                    .secret("passphrase for the new profile")?
                    .ok_or_else(|| Error::config("no passphrase (set DBFERRY_PASSPHRASE)"))?,
            };
            store.save(&output, &profile, &passphrase)?;
            println!("saved {}", output.display());
            Ok(())
        }
        ProfileCommand::List => {
            let Some(dir) = settings.profiles.resolved_dir() else {
                return Err(Error::config("no profile directory configured"));
            };
            let found = store.discover(&dir)?;
            if found.is_empty() {
                println!("no profiles in {}", dir.display());
            }
            for path in found {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_falls_back_to_crate_info() {
        assert_eq!(log_filter(None).to_string(), "dbferry=info");
        assert_eq!(log_filter(Some("dbferry=notalevel".to_string())).to_string(), "dbferry=info");
        assert!(log_filter(Some("sqlx=debug".to_string())).to_string().contains("sqlx"));
    }
}
