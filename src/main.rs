use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use rust_authd::config::{HashType, UserConfig};
use rust_authd::{AuthResult, Authenticators, Config};
use std::io::BufRead;
use std::path::Path;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn password_arg() -> Arg {
    Arg::new("password")
        .short('p')
        .long("password")
        .value_name("PASSWORD")
        .help("Password (read from stdin when omitted)")
}

fn cli() -> Command {
    Command::new("rust-authd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Checks credentials against pluggable authentication backends")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("authd.yml"),
        )
        .arg(
            Arg::new("generate-config")
                .short('g')
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::Count)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress all output except errors")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with("verbose")
                .global(true),
        )
        .subcommand(
            Command::new("check")
                .about("Authenticate a user against the configured backends")
                .arg(Arg::new("username").required(true))
                .arg(password_arg()),
        )
        .subcommand(
            Command::new("hash")
                .about("Print a new password hash")
                .arg(
                    Arg::new("type")
                        .short('t')
                        .long("type")
                        .value_name("SCHEME")
                        .help("argon2, bcrypt, scrypt, sha256-crypt or sha512-crypt")
                        .default_value("argon2"),
                )
                .arg(password_arg()),
        )
        .subcommand(
            Command::new("users")
                .about("Manage a user file of the file backend")
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_name("FILE")
                        .required(true),
                )
                .arg(
                    Arg::new("hash-type")
                        .long("hash-type")
                        .value_name("SCHEME")
                        .help("Scheme for a newly created user file"),
                )
                .subcommand_required(true)
                .subcommand(Command::new("add").arg(Arg::new("username").required(true)).arg(password_arg()))
                .subcommand(Command::new("remove").arg(Arg::new("username").required(true)))
                .subcommand(Command::new("passwd").arg(Arg::new("username").required(true)).arg(password_arg()))
                .subcommand(Command::new("enable").arg(Arg::new("username").required(true)))
                .subcommand(Command::new("disable").arg(Arg::new("username").required(true))),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    if let Some(config_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(config_path)?;
        return Ok(());
    }

    let config_path = matches
        .get_one::<String>("config")
        .ok_or_else(|| anyhow!("missing --config"))?;

    let config = if Path::new(config_path).exists() {
        match Config::load_from_file(config_path) {
            Ok(config) => config,
            // check reports every failure through its exit code
            Err(e) if matches.subcommand_name() == Some("check") => {
                println!("error: Failed to load configuration from {}: {}", config_path, e);
                std::process::exit(2);
            }
            Err(e) => return Err(anyhow!("Failed to load configuration from {}: {}", config_path, e)),
        }
    } else {
        Config::default()
    };

    let guard = setup_logging(&config, &matches)?;

    match matches.subcommand() {
        Some(("check", sub)) => {
            let code = check(&config, sub).await;
            // exit() skips destructors, flush the file writer first
            drop(guard);
            std::process::exit(code);
        }
        Some(("hash", sub)) => hash(sub),
        Some(("users", sub)) => users(sub),
        _ => {
            info!("Configured authenticators: {}", config.authn.backends.len());
            let authenticators = Authenticators::from_config(&config.authn).await?;
            info!("Authenticators ready: {}", authenticators.names().join(", "));
            authenticators.stop().await;
            Ok(())
        }
    }
}

fn read_password(matches: &ArgMatches) -> Result<String> {
    if let Some(password) = matches.get_one::<String>("password") {
        return Ok(password.clone());
    }
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow!("missing <{}>", name))
}

/// Exit code 0 when allowed, 1 when denied, 2 on any error.
async fn check(config: &Config, matches: &ArgMatches) -> i32 {
    match run_check(config, matches).await {
        Ok(AuthResult::Allowed { labels }) => {
            println!("allowed");
            if !labels.is_empty() {
                match serde_yaml::to_string(&labels) {
                    Ok(text) => print!("{}", text),
                    Err(e) => error!("Failed to print labels: {}", e),
                }
            }
            0
        }
        Ok(_) => {
            println!("denied");
            1
        }
        Err(e) => {
            error!("Authentication check failed: {:#}", e);
            println!("error: {:#}", e);
            2
        }
    }
}

async fn run_check(config: &Config, matches: &ArgMatches) -> Result<AuthResult> {
    let username = required(matches, "username")?;
    let password = read_password(matches)?;

    let authenticators = Authenticators::from_config(&config.authn).await?;
    let result = authenticators.authenticate(username, &password).await;
    authenticators.stop().await;

    Ok(result?)
}

fn hash(matches: &ArgMatches) -> Result<()> {
    let hash_type: HashType = required(matches, "type")?.parse()?;
    let password = read_password(matches)?;
    println!("{}", rust_authd::auth::hash::hash_password(hash_type, &password)?);
    Ok(())
}

fn users(matches: &ArgMatches) -> Result<()> {
    let path = required(matches, "file")?;

    let mut user_config = if Path::new(path).exists() {
        UserConfig::load_from_file(path)?
    } else {
        let mut fresh = UserConfig::default();
        if let Some(scheme) = matches.get_one::<String>("hash-type") {
            fresh.hash_type = scheme.parse()?;
        }
        fresh
    };

    match matches.subcommand() {
        Some(("add", sub)) => {
            let password = read_password(sub)?;
            user_config.add_user(required(sub, "username")?.clone(), &password)?;
        }
        Some(("remove", sub)) => user_config.remove_user(required(sub, "username")?)?,
        Some(("passwd", sub)) => {
            let password = read_password(sub)?;
            user_config.update_password(required(sub, "username")?, &password)?;
        }
        Some(("enable", sub)) => user_config.enable_user(required(sub, "username")?, true)?,
        Some(("disable", sub)) => user_config.enable_user(required(sub, "username")?, false)?,
        _ => return Err(anyhow!("unknown users command")),
    }

    user_config.save_to_file(path)?;
    info!("Updated user file {}", path);
    Ok(())
}

fn generate_default_config(path: &str) -> Result<()> {
    let config = Config::default();
    config.save_to_file(path)?;

    println!("Generated default configuration file: {}", path);
    println!("Add entries under authn.backends to enable authenticators.");

    Ok(())
}

fn setup_logging(config: &Config, matches: &ArgMatches) -> Result<Option<WorkerGuard>> {
    let level = if matches.get_flag("quiet") {
        "error"
    } else {
        match matches.get_count("verbose") {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = if matches.get_flag("quiet") || matches.get_count("verbose") > 0 {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let console = config.logging.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    let (file, guard) = match &config.logging.file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("Invalid log file path: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let journald = if config.logging.journald {
        Some(tracing_journald::layer()?)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .with(journald)
        .try_init()?;

    Ok(guard)
}
