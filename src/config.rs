//! Configuration
//!
//! A configuration file is a JSON5 object, all keys are optional and could be overridden by command line options
//!
//! ```json
//! {
//!     // Shadowsocks server
//!     "server": "127.0.0.1",
//!     "server_port": 8388,
//!     "password": "password",
//!     "method": "aes-128-cfb",
//!     // Seconds for connecting to the server
//!     "timeout": 5,
//!
//!     // Local SOCKS5 listener
//!     "local_address": "0.0.0.0",
//!     "local_port": 9090,
//!
//!     "log": {
//!         "level": 1,
//!         "format": {
//!             "without_time": false
//!         },
//!         "config_path": "log4rs.yaml"
//!     }
//! }
//! ```

use std::{
    fmt::{self, Debug, Display, Formatter},
    fs::OpenOptions,
    io::Read,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::crypto::{bytes_to_key, CipherKind};

/// Default port of the local SOCKS5 listener
pub const DEFAULT_LOCAL_PORT: u16 = 9090;

/// Default timeout for connecting to the server
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize, Deserialize, Debug, Default)]
struct SSConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    local_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<SSLogConfig>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct SSLogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<SSLogFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_path: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct SSLogFormat {
    #[serde(skip_serializing_if = "Option::is_none")]
    without_time: Option<bool>,
}

/// Server address
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ServerAddr {
    /// IP Address
    SocketAddr(SocketAddr),
    /// Domain name address, eg. example.com:8080
    DomainName(String, u16),
}

/// Parse `ServerAddr` error
#[derive(Debug)]
pub struct ServerAddrError;

impl Display for ServerAddrError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("invalid ServerAddr")
    }
}

impl std::error::Error for ServerAddrError {}

impl FromStr for ServerAddr {
    type Err = ServerAddrError;

    fn from_str(s: &str) -> Result<ServerAddr, ServerAddrError> {
        match s.parse::<SocketAddr>() {
            Ok(addr) => Ok(ServerAddr::SocketAddr(addr)),
            Err(..) => match s.rsplit_once(':') {
                Some((dn, port)) if !dn.is_empty() && !dn.contains(':') => match port.parse::<u16>() {
                    Ok(port) => Ok(ServerAddr::DomainName(dn.to_owned(), port)),
                    Err(..) => Err(ServerAddrError),
                },
                _ => Err(ServerAddrError),
            },
        }
    }
}

impl Display for ServerAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            ServerAddr::SocketAddr(ref a) => write!(f, "{a}"),
            ServerAddr::DomainName(ref d, port) => write!(f, "{d}:{port}"),
        }
    }
}

impl From<SocketAddr> for ServerAddr {
    fn from(addr: SocketAddr) -> ServerAddr {
        ServerAddr::SocketAddr(addr)
    }
}

impl<I: Into<String>> From<(I, u16)> for ServerAddr {
    fn from((dname, port): (I, u16)) -> ServerAddr {
        ServerAddr::DomainName(dname.into(), port)
    }
}

/// Configuration for a server
#[derive(Clone)]
pub struct ServerConfig {
    /// Server address
    addr: ServerAddr,
    /// Encryption password
    password: String,
    /// Encryption type (method)
    method: CipherKind,
    /// Encryption key, derived from `password`
    enc_key: Box<[u8]>,
    /// Connect timeout
    timeout: Duration,
}

impl ServerConfig {
    /// Create a new `ServerConfig`
    pub fn new<A, P>(addr: A, password: P, method: CipherKind) -> ServerConfig
    where
        A: Into<ServerAddr>,
        P: Into<String>,
    {
        let password = password.into();

        let mut enc_key = vec![0u8; method.key_len()].into_boxed_slice();
        bytes_to_key(password.as_bytes(), &mut enc_key);

        ServerConfig {
            addr: addr.into(),
            password,
            method,
            enc_key,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Get server address
    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    /// Get encryption key
    pub fn key(&self) -> &[u8] {
        self.enc_key.as_ref()
    }

    /// Get password
    pub fn password(&self) -> &str {
        self.password.as_str()
    }

    /// Get method
    pub fn method(&self) -> CipherKind {
        self.method
    }

    /// Set connect timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Connect timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Debug for ServerConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("password", &"<redacted>")
            .field("method", &self.method)
            .field("enc_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Log format configuration
#[derive(Debug, Clone, Default)]
pub struct LogFormatConfig {
    pub without_time: bool,
}

/// Logger configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Default log level for all writers, [0, 3]
    pub level: u32,
    /// Default format configuration for all writers
    pub format: LogFormatConfig,
    /// Logging configuration file path
    pub config_path: Option<PathBuf>,
}

/// Configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Local SOCKS5 listening address
    pub local_addr: SocketAddr,
    /// Shadowsocks server
    pub server: Option<ServerConfig>,
    /// Logging
    pub log: LogConfig,
    /// Path of the configuration file, if loaded from one
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

impl Config {
    /// Creates an empty configuration, listening on `0.0.0.0:9090`
    pub fn new() -> Config {
        Config {
            local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_LOCAL_PORT),
            server: None,
            log: LogConfig::default(),
            config_path: None,
        }
    }

    fn load_from_ssconfig(config: SSConfig) -> Result<Config, Error> {
        let mut nconfig = Config::new();

        if config.local_address.is_some() || config.local_port.is_some() {
            let ip = match config.local_address {
                Some(ref addr) => match addr.parse::<IpAddr>() {
                    Ok(ip) => ip,
                    Err(..) => {
                        return Err(Error::new(
                            ErrorKind::Malformed,
                            "`local_address` should be an IP address",
                            Some(format!("`{addr}` is not an IP address")),
                        ));
                    }
                },
                None => nconfig.local_addr.ip(),
            };
            let port = config.local_port.unwrap_or(DEFAULT_LOCAL_PORT);
            nconfig.local_addr = SocketAddr::new(ip, port);
        }

        match (config.server, config.server_port) {
            (None, None) => {}
            (Some(address), Some(port)) => {
                let addr = match address.parse::<IpAddr>() {
                    Ok(ip) => ServerAddr::from(SocketAddr::new(ip, port)),
                    Err(..) => ServerAddr::from((address, port)),
                };

                let method = match config.method {
                    Some(ref m) => match m.parse::<CipherKind>() {
                        Ok(m) => m,
                        Err(..) => {
                            return Err(Error::new(
                                ErrorKind::Invalid,
                                "unsupported method",
                                Some(format!("`{m}` is not a supported method")),
                            ));
                        }
                    },
                    None => CipherKind::default(),
                };

                let password = match config.password {
                    Some(pwd) => pwd,
                    None => {
                        return Err(Error::new(
                            ErrorKind::MissingField,
                            "`password` is required",
                            Some(format!("missing `password` for server {addr}")),
                        ));
                    }
                };

                let mut svr_cfg = ServerConfig::new(addr, password, method);
                if let Some(timeout) = config.timeout {
                    svr_cfg.set_timeout(Duration::from_secs(timeout));
                }
                nconfig.server = Some(svr_cfg);
            }
            (None, Some(..)) | (Some(..), None) => {
                return Err(Error::new(
                    ErrorKind::Malformed,
                    "`server` and `server_port` should be provided together",
                    None,
                ));
            }
        }

        if let Some(log) = config.log {
            if let Some(level) = log.level {
                nconfig.log.level = level;
            }
            if let Some(without_time) = log.format.and_then(|f| f.without_time) {
                nconfig.log.format.without_time = without_time;
            }
            if let Some(config_path) = log.config_path {
                nconfig.log.config_path = Some(PathBuf::from(config_path));
            }
        }

        Ok(nconfig)
    }

    /// Load Config from a `str`
    pub fn load_from_str(s: &str) -> Result<Config, Error> {
        let c = json5::from_str::<SSConfig>(s)?;
        Config::load_from_ssconfig(c)
    }

    /// Load Config from a File
    pub fn load_from_file<P: AsRef<Path>>(filename: P) -> Result<Config, Error> {
        let filename = filename.as_ref();

        let mut reader = OpenOptions::new().read(true).open(filename)?;
        let mut content = String::new();
        reader.read_to_string(&mut content)?;

        let mut config = Config::load_from_str(&content[..])?;
        config.config_path = Some(filename.to_owned());

        Ok(config)
    }

    /// Check if all required fields are already set
    pub fn check_integrity(&self) -> Result<(), Error> {
        let server = match self.server {
            Some(ref s) => s,
            None => {
                return Err(Error::new(
                    ErrorKind::MissingField,
                    "missing `server`",
                    Some("a shadowsocks server is required to run a local proxy".to_owned()),
                ));
            }
        };

        if server.password().is_empty() {
            return Err(Error::new(
                ErrorKind::MissingField,
                "`password` should not be empty",
                Some(format!("missing `password` for server {}", server.addr())),
            ));
        }

        Ok(())
    }
}

/// Configuration parsing error kind
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing required fields in JSON configuration
    MissingField,
    /// Missing some keys that must be provided together
    Malformed,
    /// Invalid value of some configuration keys
    Invalid,
    /// Invalid JSON
    JsonParsingError,
    /// `std::io::Error`
    IoError,
}

/// Configuration parsing error
pub struct Error {
    pub kind: ErrorKind,
    pub desc: &'static str,
    pub detail: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, desc: &'static str, detail: Option<String>) -> Error {
        Error { kind, desc, detail }
    }
}

macro_rules! impl_from {
    ($error:ty, $kind:expr, $desc:expr) => {
        impl From<$error> for Error {
            fn from(err: $error) -> Self {
                Error::new($kind, $desc, Some(format!("{:?}", err)))
            }
        }
    };
}

impl_from!(::std::io::Error, ErrorKind::IoError, "error while reading file");
impl_from!(json5::Error, ErrorKind::JsonParsingError, "json parse error");

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.detail {
            None => write!(f, "{}", self.desc),
            Some(ref det) => write!(f, "{} {}", self.desc, det),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.detail {
            None => f.write_str(self.desc),
            Some(ref d) => write!(f, "{}, {}", self.desc, d),
        }
    }
}

impl std::error::Error for Error {}
