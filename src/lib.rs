//! ssocks is a SOCKS5 local proxy that tunnels every connection through a shadowsocks server.
//!
//! Each accepted SOCKS5 CONNECT request opens one TCP connection to the shadowsocks server. The target address is
//! sent as the first encrypted payload of that connection, then bytes are relayed in both directions with
//! `aes-128-cfb` stream encryption.
//!
//! ## Usage
//!
//! ```bash
//! sslocal -s 127.0.0.1:8388 -k password -b 127.0.0.1:1080
//! ```
//!
//! Or write the options into a configuration file, see [`config`] for the format
//!
//! ```bash
//! sslocal -c shadowsocks.json
//! ```
//!
//! Now you can use SOCKS5 protocol to proxy your requests, for example:
//!
//! ```bash
//! curl --socks5-hostname 127.0.0.1:1080 https://www.example.com
//! ```
//!
//! ## API Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ssocks::{config::ServerConfig, crypto::CipherKind, local::Socks5Local};
//!
//! # async fn run() -> std::io::Result<()> {
//! let svr_cfg = ServerConfig::new("127.0.0.1:8388".parse::<std::net::SocketAddr>().unwrap(), "password", CipherKind::Aes128Cfb);
//! let local = Socks5Local::bind("127.0.0.1:1080".parse().unwrap(), Arc::new(svr_cfg)).await?;
//! local.run().await
//! # }
//! ```

/// ssocks version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code when server exits unexpectedly
pub const EXIT_CODE_SERVER_EXIT_UNEXPECTEDLY: u8 = 70;
/// Exit code when server aborted
pub const EXIT_CODE_SERVER_ABORTED: u8 = 70;
/// Exit code when loading configuration from file fails
pub const EXIT_CODE_LOAD_CONFIG_FAILURE: u8 = 78;
/// Exit code when insufficient params are passed via CLI
pub const EXIT_CODE_INSUFFICIENT_PARAMS: u8 = 64;

pub mod config;
pub mod crypto;
pub mod local;
pub mod logging;
pub mod monitor;
pub mod relay;
pub mod service;
pub mod vparser;
