//! Local server launchers

use std::{net::SocketAddr, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command, ValueHint};
use futures::future::{self, Either};
use log::{info, trace};
use tokio::runtime::Builder;

use crate::{
    config::{Config, ServerAddr, ServerConfig},
    crypto::{available_ciphers, CipherKind},
    local::Socks5Local,
    logging,
    monitor,
    vparser,
};

/// Defines command line options
pub fn define_command_line_options(app: Command) -> Command {
    app.arg(
        Arg::new("CONFIG")
            .short('c')
            .long("config")
            .num_args(1)
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(PathBuf))
            .value_hint(ValueHint::FilePath)
            .help("Shadowsocks configuration file"),
    )
    .arg(
        Arg::new("LOCAL_ADDR")
            .short('b')
            .long("local-addr")
            .num_args(1)
            .action(ArgAction::Set)
            .value_parser(vparser::parse_socket_addr)
            .help("Local SOCKS5 listen address, 0.0.0.0:9090 by default"),
    )
    .arg(
        Arg::new("SERVER_ADDR")
            .short('s')
            .long("server-addr")
            .num_args(1)
            .action(ArgAction::Set)
            .value_parser(vparser::parse_server_addr)
            .help("Server address"),
    )
    .arg(
        Arg::new("PASSWORD")
            .short('k')
            .long("password")
            .num_args(1)
            .action(ArgAction::Set)
            .help("Server's password"),
    )
    .arg(
        Arg::new("ENCRYPT_METHOD")
            .short('m')
            .long("encrypt-method")
            .num_args(1)
            .action(ArgAction::Set)
            .value_parser(PossibleValuesParser::new(available_ciphers()))
            .help("Server's encryption method, aes-128-cfb by default"),
    )
    .arg(
        Arg::new("TIMEOUT")
            .long("timeout")
            .num_args(1)
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(u64))
            .help("Timeout seconds for connecting to the server"),
    )
    .arg(
        Arg::new("VERBOSE")
            .short('v')
            .action(ArgAction::Count)
            .help("Set log level"),
    )
    .arg(
        Arg::new("LOG_WITHOUT_TIME")
            .long("log-without-time")
            .action(ArgAction::SetTrue)
            .help("Log without datetime prefix"),
    )
    .arg(
        Arg::new("LOG_CONFIG")
            .long("log-config")
            .num_args(1)
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(PathBuf))
            .value_hint(ValueHint::FilePath)
            .help("log4rs configuration file"),
    )
}

/// Override the server loaded from the configuration file with command line options
fn set_server_options(config: &mut Config, matches: &ArgMatches) -> Result<(), String> {
    let current = config.server.take();

    let addr = match matches.get_one::<ServerAddr>("SERVER_ADDR") {
        Some(addr) => addr.clone(),
        None => match current {
            Some(ref svr_cfg) => svr_cfg.addr().clone(),
            None => {
                if matches.contains_id("PASSWORD") || matches.contains_id("ENCRYPT_METHOD") {
                    return Err("`--server-addr` is required".to_owned());
                }
                return Ok(());
            }
        },
    };

    let method = match matches.get_one::<String>("ENCRYPT_METHOD") {
        Some(m) => m.parse::<CipherKind>().map_err(|err| err.to_string())?,
        None => current.as_ref().map(ServerConfig::method).unwrap_or_default(),
    };

    let password = match matches.get_one::<String>("PASSWORD") {
        Some(pwd) => pwd.clone(),
        None => match current {
            Some(ref svr_cfg) => svr_cfg.password().to_owned(),
            None => return Err(format!("missing `password` for server {addr}")),
        },
    };

    let timeout = match matches.get_one::<u64>("TIMEOUT") {
        Some(timeout) => Some(Duration::from_secs(*timeout)),
        None => current.as_ref().map(ServerConfig::timeout),
    };

    let mut svr_cfg = ServerConfig::new(addr, password, method);
    if let Some(timeout) = timeout {
        svr_cfg.set_timeout(timeout);
    }
    config.server = Some(svr_cfg);

    Ok(())
}

/// Override local and logging options with command line options
fn set_local_options(config: &mut Config, matches: &ArgMatches) {
    if let Some(local_addr) = matches.get_one::<SocketAddr>("LOCAL_ADDR") {
        config.local_addr = *local_addr;
    }

    match matches.get_count("VERBOSE") {
        0 => {}
        level => config.log.level = level as u32,
    }
    if matches.get_flag("LOG_WITHOUT_TIME") {
        config.log.format.without_time = true;
    }
    if let Some(log_config) = matches.get_one::<PathBuf>("LOG_CONFIG").cloned() {
        config.log.config_path = Some(log_config);
    }
}

/// Program entrance `main`
pub fn main(matches: &ArgMatches) -> ExitCode {
    let (config, runtime) = {
        let mut config = match matches.get_one::<PathBuf>("CONFIG") {
            Some(config_path) => match Config::load_from_file(config_path) {
                Ok(c) => c,
                Err(err) => {
                    eprintln!("loading config {config_path:?}, {err}");
                    return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
                }
            },
            None => Config::new(),
        };

        if let Err(err) = set_server_options(&mut config, matches) {
            eprintln!("{err}");
            return crate::EXIT_CODE_INSUFFICIENT_PARAMS.into();
        }
        set_local_options(&mut config, matches);

        let log_result = match config.log.config_path {
            Some(ref path) => logging::init_with_file(path),
            None => logging::init_with_config("sslocal", &config.log),
        };
        if let Err(err) = log_result {
            eprintln!("{err}");
            return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
        }

        trace!("{:?}", config);

        if let Err(err) = config.check_integrity() {
            eprintln!("config integrity check failed, {err}");
            return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
        }

        info!("shadowsocks local {}", crate::VERSION);

        let runtime = match Builder::new_multi_thread().enable_all().build() {
            Ok(r) => r,
            Err(err) => {
                eprintln!("create tokio Runtime, {err}");
                return crate::EXIT_CODE_SERVER_ABORTED.into();
            }
        };

        (config, runtime)
    };

    runtime.block_on(async move {
        let svr_cfg = match config.server {
            Some(svr_cfg) => Arc::new(svr_cfg),
            None => return ExitCode::from(crate::EXIT_CODE_INSUFFICIENT_PARAMS),
        };

        let instance = match Socks5Local::bind(config.local_addr, svr_cfg).await {
            Ok(i) => i,
            Err(err) => {
                eprintln!("failed to listen on {}, {err}", config.local_addr);
                return ExitCode::from(crate::EXIT_CODE_SERVER_ABORTED);
            }
        };

        let abort_signal = monitor::create_signal_monitor();
        let server = instance.run();

        tokio::pin!(abort_signal);
        tokio::pin!(server);

        match future::select(server, abort_signal).await {
            // Server future resolved without an error. This should never happen.
            Either::Left((Ok(..), ..)) => {
                eprintln!("server exited unexpectedly");
                ExitCode::from(crate::EXIT_CODE_SERVER_EXIT_UNEXPECTEDLY)
            }
            // Server future resolved with error, which are listener errors in most cases
            Either::Left((Err(err), ..)) => {
                eprintln!("server aborted with {err}");
                ExitCode::from(crate::EXIT_CODE_SERVER_ABORTED)
            }
            // The abort signal future resolved. Means we should just exit.
            Either::Right(_) => ExitCode::SUCCESS,
        }
    })
}

#[cfg(test)]
mod test {
    use clap::Command;

    use super::*;

    fn command() -> Command {
        define_command_line_options(Command::new("sslocal"))
    }

    #[test]
    fn verify_local_command() {
        command().debug_assert();
    }

    #[test]
    fn server_from_command_line() {
        let matches = command()
            .try_get_matches_from(["sslocal", "-s", "127.0.0.1:8388", "-k", "foobar", "--timeout", "3"])
            .unwrap();

        let mut config = Config::new();
        set_server_options(&mut config, &matches).unwrap();

        let svr_cfg = config.server.unwrap();
        assert_eq!(svr_cfg.addr(), &"127.0.0.1:8388".parse::<ServerAddr>().unwrap());
        assert_eq!(svr_cfg.method(), CipherKind::Aes128Cfb);
        assert_eq!(svr_cfg.password(), "foobar");
        assert_eq!(svr_cfg.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn command_line_overrides_file() {
        let mut config =
            Config::load_from_str(r#"{ server: "example.com", server_port: 8388, password: "a", timeout: 9 }"#).unwrap();

        let matches = command()
            .try_get_matches_from(["sslocal", "-k", "b", "-b", "127.0.0.1:1080", "-vv"])
            .unwrap();
        set_server_options(&mut config, &matches).unwrap();
        set_local_options(&mut config, &matches);

        let svr_cfg = config.server.as_ref().unwrap();
        assert_eq!(svr_cfg.addr(), &ServerAddr::DomainName("example.com".to_owned(), 8388));
        assert_eq!(svr_cfg.password(), "b");
        assert_eq!(svr_cfg.timeout(), Duration::from_secs(9));
        assert_eq!(config.local_addr, "127.0.0.1:1080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log.level, 2);
    }

    #[test]
    fn missing_password() {
        let matches = command().try_get_matches_from(["sslocal", "-s", "127.0.0.1:8388"]).unwrap();
        assert!(set_server_options(&mut Config::new(), &matches).is_err());
    }

    #[test]
    fn unsupported_method() {
        assert!(command()
            .try_get_matches_from(["sslocal", "-s", "127.0.0.1:8388", "-k", "p", "-m", "rc4-md5"])
            .is_err());
    }
}
