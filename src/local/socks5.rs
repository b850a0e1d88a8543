//! SOCKS5 TCP Server

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::Arc,
};

use log::{debug, error, trace};
use tokio::net::TcpStream;

use crate::{
    config::ServerConfig,
    local::utils::establish_tcp_tunnel,
    relay::{
        socks5::{
            self,
            Error as Socks5Error,
            HandshakeRequest,
            HandshakeResponse,
            Reply,
            TcpRequestHeader,
            TcpResponseHeader,
        },
        tcprelay::ProxyClientStream,
    },
};

pub struct Socks5TcpHandler {
    svr_cfg: Arc<ServerConfig>,
}

impl Socks5TcpHandler {
    pub fn new(svr_cfg: Arc<ServerConfig>) -> Socks5TcpHandler {
        Socks5TcpHandler { svr_cfg }
    }

    async fn check_auth(&self, stream: &mut TcpStream, handshake_req: &HandshakeRequest) -> io::Result<()> {
        // Authentication is never negotiated, whatever the client offers
        if !handshake_req.methods.contains(&socks5::SOCKS5_AUTH_METHOD_NONE) {
            debug!("socks5 client offered methods {:?}, replying NONE anyway", handshake_req.methods);
        }

        let resp = HandshakeResponse::new(socks5::SOCKS5_AUTH_METHOD_NONE);
        trace!("reply handshake {:?}", resp);
        resp.write_to(stream).await
    }

    pub async fn handle_socks5_client(self, mut stream: TcpStream, peer_addr: SocketAddr) -> io::Result<()> {
        // 1. Handshake

        let handshake_req = match HandshakeRequest::read_from(&mut stream).await {
            Ok(r) => r,
            Err(Socks5Error::IoError(ref err)) if err.kind() == ErrorKind::UnexpectedEof => {
                trace!("socks5 handshake early eof. peer: {}", peer_addr);
                return Ok(());
            }
            Err(err) => {
                error!("socks5 handshake error: {}, peer: {}", err, peer_addr);
                return Err(err.into());
            }
        };

        trace!("socks5 {:?}", handshake_req);
        self.check_auth(&mut stream, &handshake_req).await?;

        // 2. Fetch headers

        let header = match TcpRequestHeader::read_from(&mut stream).await {
            Ok(h) => h,
            Err(Socks5Error::IoError(err)) => {
                error!("failed to get TcpRequestHeader: {}, peer: {}", err, peer_addr);
                return Err(err);
            }
            Err(err) => {
                error!("failed to get TcpRequestHeader: {}, peer: {}", err, peer_addr);
                let rh = TcpResponseHeader::unspecified(err.as_reply());
                let _ = rh.write_to(&mut stream).await;
                return Err(err.into());
            }
        };

        trace!("socks5 {:?} peer: {}", header, peer_addr);

        // 3. CONNECT, the only supported command

        self.handle_tcp_connect(stream, peer_addr, header).await
    }

    async fn handle_tcp_connect(
        self,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        header: TcpRequestHeader,
    ) -> io::Result<()> {
        // Reply before the server is reached, the bound address is never reported
        let rh = TcpResponseHeader::unspecified(Reply::Succeeded);
        rh.write_to(&mut stream).await?;

        trace!("sent header: {:?}", rh);

        let target_addr = &header.address;
        let remote = match ProxyClientStream::connect(&self.svr_cfg, header.raw_address()).await {
            Ok(remote) => remote,
            Err(err) => {
                error!(
                    "socks5 tcp connect {} <-> {} through server {} failed, error: {}",
                    peer_addr,
                    target_addr,
                    self.svr_cfg.addr(),
                    err
                );
                return Err(err);
            }
        };

        debug!(
            "socks5 tcp connected {} -> {} through server {}",
            peer_addr,
            target_addr,
            self.svr_cfg.addr()
        );

        establish_tcp_tunnel(&self.svr_cfg, stream, remote, peer_addr, target_addr).await
    }
}
