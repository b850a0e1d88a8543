//! Shadowsocks Local Server

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use log::{error, info};
use tokio::{net::TcpListener, time};

use crate::config::ServerConfig;

use self::socks5::Socks5TcpHandler;

pub mod socks5;
pub mod utils;

/// SOCKS5 local server
///
/// Every accepted connection is served in its own task through the shadowsocks server `svr_cfg`.
pub struct Socks5Local {
    listener: TcpListener,
    svr_cfg: Arc<ServerConfig>,
}

impl Socks5Local {
    /// Bind the listener on `local_addr`
    pub async fn bind(local_addr: SocketAddr, svr_cfg: Arc<ServerConfig>) -> io::Result<Socks5Local> {
        let listener = TcpListener::bind(local_addr).await?;
        Ok(Socks5Local { listener, svr_cfg })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients forever
    pub async fn run(self) -> io::Result<()> {
        info!("shadowsocks socks TCP listening on {}", self.listener.local_addr()?);

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(s) => s,
                Err(err) => {
                    error!("accept failed with error: {}", err);
                    time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let handler = Socks5TcpHandler::new(self.svr_cfg.clone());
            tokio::spawn(async move {
                if let Err(err) = handler.handle_socks5_client(stream, peer_addr).await {
                    error!("socks5 tcp client handler error: {}", err);
                }
            });
        }
    }
}
