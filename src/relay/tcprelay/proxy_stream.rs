//! TCP stream for communicating with shadowsocks' proxy server

use std::{
    io::{self, ErrorKind},
    pin::Pin,
    task::{self, Poll},
};

use log::trace;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::TcpStream,
    time,
};

use crate::{
    config::{ServerAddr, ServerConfig},
    relay::tcprelay::crypto_io::{CryptoStream, CryptoStreamReadHalf, CryptoStreamWriteHalf},
};

/// A stream for sending / receiving data stream from remote server via shadowsocks' proxy server
pub struct ProxyClientStream<S> {
    stream: CryptoStream<S>,
}

impl ProxyClientStream<TcpStream> {
    /// Connect to the shadowsocks server configured by `svr_cfg`
    ///
    /// `raw_addr` is the target address in SOCKS5 encoding (`ATYP | ADDR | PORT`). It is sent as the first
    /// encrypted payload. Connecting and sending the address must finish in `svr_cfg.timeout()`.
    pub async fn connect(svr_cfg: &ServerConfig, raw_addr: &[u8]) -> io::Result<ProxyClientStream<TcpStream>> {
        let timeout = svr_cfg.timeout();

        let fut = async {
            let stream = connect_server(svr_cfg.addr()).await?;
            trace!(
                "connected tcp remote {} (outbound: {})",
                svr_cfg.addr(),
                stream.local_addr()?
            );

            let mut stream = ProxyClientStream::from_stream(stream, svr_cfg);
            stream.write_all(raw_addr).await?;
            Ok::<_, io::Error>(stream)
        };

        match time::timeout(timeout, fut).await {
            Ok(r) => r,
            Err(..) => Err(io::Error::new(
                ErrorKind::TimedOut,
                format!("connect to {} timeout after {:?}", svr_cfg.addr(), timeout),
            )),
        }
    }
}

async fn connect_server(addr: &ServerAddr) -> io::Result<TcpStream> {
    match *addr {
        ServerAddr::SocketAddr(ref sa) => TcpStream::connect(sa).await,
        ServerAddr::DomainName(ref dname, port) => TcpStream::connect((dname.as_str(), port)).await,
    }
}

impl<S> ProxyClientStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a `ProxyClientStream` with a connected `stream` to a shadowsocks' server
    pub fn from_stream(stream: S, svr_cfg: &ServerConfig) -> ProxyClientStream<S> {
        ProxyClientStream {
            stream: CryptoStream::from_stream(stream, svr_cfg.method(), svr_cfg.key()),
        }
    }

    /// Split into independently owned read and write halves
    pub fn into_split(self) -> (CryptoStreamReadHalf<S>, CryptoStreamWriteHalf<S>) {
        self.stream.into_split()
    }
}

impl<S> AsyncRead for ProxyClientStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[inline]
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for ProxyClientStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[inline]
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    #[inline]
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    #[inline]
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod test {
    use std::{net::SocketAddr, time::Duration};

    use tokio::{
        io::AsyncReadExt,
        net::TcpListener,
    };

    use super::*;
    use crate::{
        crypto::{CipherKind, CipherSession},
        relay::socks5::{Address, TcpRequestHeader},
    };

    #[tokio::test]
    async fn connect_sends_iv_and_address() {
        let _ = env_logger::try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();

        let svr_cfg = ServerConfig::new(server_addr, "p$p", CipherKind::Aes128Cfb);
        let header = TcpRequestHeader::new(Address::SocketAddress("93.184.216.34:80".parse::<SocketAddr>().unwrap()));

        let key = svr_cfg.key().to_owned();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 + 7];
            stream.read_exact(&mut buf).await.unwrap();

            let mut session = CipherSession::new(CipherKind::Aes128Cfb, &key);
            session.init_decrypt(&buf[..16]);
            let mut addr = vec![0u8; 7];
            session.decrypt(&mut addr, &buf[16..]);
            addr
        });

        let _stream = ProxyClientStream::connect(&svr_cfg, header.raw_address()).await.unwrap();
        let addr = server.await.unwrap();
        assert_eq!(&addr[..], header.raw_address());
    }

    #[tokio::test]
    async fn connect_refused() {
        // Reserve a port, then close it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        drop(listener);

        let mut svr_cfg = ServerConfig::new(server_addr, "p$p", CipherKind::Aes128Cfb);
        svr_cfg.set_timeout(Duration::from_secs(1));

        let raw_addr = [0x01, 127, 0, 0, 1, 0x00, 0x50];
        assert!(ProxyClientStream::connect(&svr_cfg, &raw_addr).await.is_err());
    }
}
