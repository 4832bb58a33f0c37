//! Command-line definition and flag overrides.

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use lockclash_core::{EngineKind, Error, HarnessConfig, Result};

pub fn build_cli() -> Command {
    Command::new("lockclash")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Lockclash Contributors")
        .about("Provoke a row-lock conflict between concurrent transactions and classify it")
        .long_about(
            "Lockclash opens one transaction per session and makes the sessions lock\n\
             two rows in opposite orders after a shared start signal. Each session\n\
             ends COMMITTED, DEADLOCK, TIMEOUT, ERROR or INTERRUPTED, and a summary\n\
             is printed once every session has finished or the await bound elapses.\n\n\
             Settings come from defaults, ~/.config/lockclash/config.toml,\n\
             ./lockclash.toml (or --config), LOCKCLASH_* variables and these flags,\n\
             in increasing precedence.",
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Config file to load instead of ./lockclash.toml"),
        )
        .arg(
            Arg::new("engine")
                .long("engine")
                .short('e')
                .value_name("ENGINE")
                .value_parser(["mysql", "memory"])
                .help("Storage engine (mysql, memory)"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .value_name("URL")
                .help("Database url, e.g. mysql://localhost:3306/producto_barras"),
        )
        .arg(
            Arg::new("user")
                .long("user")
                .short('u')
                .value_name("USER")
                .help("Database user"),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .value_name("PASSWORD")
                .help("Database password (prefer LOCKCLASH_DB_PASSWORD)"),
        )
        .arg(
            Arg::new("table")
                .long("table")
                .short('t')
                .value_name("TABLE")
                .help("Table holding the contended rows"),
        )
        .arg(
            Arg::new("id-a")
                .long("id-a")
                .value_name("ID")
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true)
                .help("First contended row id"),
        )
        .arg(
            Arg::new("id-b")
                .long("id-b")
                .value_name("ID")
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true)
                .help("Second contended row id"),
        )
        .arg(
            Arg::new("hold-ms")
                .long("hold-ms")
                .value_name("MILLIS")
                .value_parser(value_parser!(u64))
                .help("How long each session holds its first lock"),
        )
        .arg(
            Arg::new("await-secs")
                .long("await-secs")
                .value_name("SECS")
                .value_parser(value_parser!(u64))
                .help("Bound on the whole run before sessions are cancelled"),
        )
        .arg(
            Arg::new("sessions")
                .long("sessions")
                .short('n')
                .value_name("COUNT")
                .value_parser(value_parser!(usize))
                .help("Number of sessions, alternating lock order"),
        )
        .arg(
            Arg::new("isolation")
                .long("isolation")
                .value_name("LEVEL")
                .value_parser(["repeatable_read", "serializable"])
                .help("Transaction isolation level"),
        )
        .arg(
            Arg::new("lock-wait-timeout-secs")
                .long("lock-wait-timeout-secs")
                .value_name("SECS")
                .value_parser(value_parser!(u64))
                .help("Engine bound on a single lock wait"),
        )
        .arg(
            Arg::new("no-deadlock-detection")
                .long("no-deadlock-detection")
                .action(ArgAction::SetTrue)
                .help("Disable deadlock detection in the memory engine"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the summary as JSON"),
        )
}

/// Explicit config file, if one was given.
pub fn config_path(matches: &ArgMatches) -> Option<PathBuf> {
    matches.get_one::<PathBuf>("config").cloned()
}

/// Apply command-line flags on top of loaded configuration, then validate.
///
/// # Errors
///
/// Returns `InvalidConfig` if a flag value is unusable or the resulting
/// configuration fails validation.
pub fn apply_args(config: &mut HarnessConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(engine) = matches.get_one::<String>("engine") {
        config.engine = engine
            .parse::<EngineKind>()
            .map_err(|e| Error::InvalidConfig(format!("Invalid engine '{engine}': {e}")))?;
    }
    if let Some(url) = matches.get_one::<String>("url") {
        config.database.url.clone_from(url);
    }
    if let Some(user) = matches.get_one::<String>("user") {
        config.database.user.clone_from(user);
    }
    if let Some(password) = matches.get_one::<String>("password") {
        config.database.password.clone_from(password);
    }
    if let Some(table) = matches.get_one::<String>("table") {
        config.table.clone_from(table);
    }
    if let Some(id) = matches.get_one::<i64>("id-a") {
        config.id_a = *id;
    }
    if let Some(id) = matches.get_one::<i64>("id-b") {
        config.id_b = *id;
    }
    if let Some(hold) = matches.get_one::<u64>("hold-ms") {
        config.hold_ms = *hold;
    }
    if let Some(secs) = matches.get_one::<u64>("await-secs") {
        config.await_secs = *secs;
    }
    if let Some(sessions) = matches.get_one::<usize>("sessions") {
        config.sessions = *sessions;
    }
    if let Some(level) = matches.get_one::<String>("isolation") {
        config.isolation = level
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("Invalid isolation '{level}': {e}")))?;
    }
    if let Some(secs) = matches.get_one::<u64>("lock-wait-timeout-secs") {
        config.lock_wait_timeout_secs = Some(*secs);
    }
    if matches.get_flag("no-deadlock-detection") {
        config.memory.deadlock_detection = false;
    }

    config.validate()
}

#[cfg(test)]
mod tests {
    use lockclash_core::types::IsolationLevel;

    use super::*;

    fn matches(args: &[&str]) -> std::result::Result<ArgMatches, clap::Error> {
        build_cli().try_get_matches_from(std::iter::once("lockclash").chain(args.iter().copied()))
    }

    #[test]
    fn test_flags_override_config() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let matches = matches(&[
            "--engine",
            "memory",
            "--id-a",
            "5",
            "--id-b",
            "6",
            "--hold-ms",
            "250",
            "--sessions",
            "4",
            "--isolation",
            "serializable",
            "--no-deadlock-detection",
        ])?;
        let mut config = HarnessConfig::default();
        apply_args(&mut config, &matches)?;

        assert_eq!(config.engine, EngineKind::Memory);
        assert_eq!((config.id_a, config.id_b), (5, 6));
        assert_eq!(config.hold_ms, 250);
        assert_eq!(config.sessions, 4);
        assert_eq!(config.isolation, IsolationLevel::Serializable);
        assert!(!config.memory.deadlock_detection);
        Ok(())
    }

    #[test]
    fn test_no_flags_keeps_config() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let matches = matches(&[])?;
        let mut config = HarnessConfig::default();
        apply_args(&mut config, &matches)?;
        assert_eq!(config, HarnessConfig::default());
        assert!(config_path(&matches).is_none());
        Ok(())
    }

    #[test]
    fn test_flags_are_validated() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let matches = matches(&["--sessions", "0"])?;
        let mut config = HarnessConfig::default();
        assert!(matches!(
            apply_args(&mut config, &matches),
            Err(Error::InvalidConfig(_))
        ));
        Ok(())
    }

    #[test]
    fn test_unknown_engine_rejected_by_parser() {
        assert!(matches(&["--engine", "oracle"]).is_err());
    }
}
