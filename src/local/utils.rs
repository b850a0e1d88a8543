//! Local Utilities

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use futures::future::{self, Either};
use log::{debug, error, trace};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    time,
};

use crate::{
    config::ServerConfig,
    relay::{
        socks5::Address,
        tcprelay::{utils::forward, CryptoStreamReadHalf, ProtocolError, ProxyClientStream},
    },
};

/// Close signal shared by both directions of one tunnel
///
/// Closing is idempotent, every clone observes the first `close()`.
#[derive(Clone, Debug)]
pub struct SessionCloser {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for SessionCloser {
    fn default() -> SessionCloser {
        SessionCloser::new()
    }
}

impl SessionCloser {
    pub fn new() -> SessionCloser {
        let (tx, _) = watch::channel(false);
        SessionCloser { tx: Arc::new(tx) }
    }

    /// Fire the close signal
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `close()` has been called, immediately if it already was
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // Sender is kept alive by `self`, so this never fails
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Runs `forward` until it finishes or `closer` is fired, then fires `closer`
///
/// Returns `None` if it was stopped by the other direction.
async fn forward_until_closed<R, W>(
    name: &'static str,
    mut reader: R,
    mut writer: W,
    closer: SessionCloser,
) -> Option<io::Result<u64>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = {
        let copy = forward(name, &mut reader, &mut writer);
        let closed = closer.closed();

        tokio::pin!(copy);
        tokio::pin!(closed);

        match future::select(copy, closed).await {
            Either::Left((r, ..)) => Some(r),
            Either::Right(..) => None,
        }
    };

    closer.close();
    result
}

/// Waits for the server's IV for at most `timeout`, then runs `forward_until_closed`
async fn forward_from_server<S, W>(
    timeout: Duration,
    mut reader: CryptoStreamReadHalf<S>,
    writer: W,
    closer: SessionCloser,
) -> Option<io::Result<u64>>
where
    S: AsyncRead,
    W: AsyncWrite + Unpin,
{
    let handshake = {
        let read_iv = time::timeout(timeout, reader.read_iv());
        let closed = closer.closed();

        tokio::pin!(read_iv);
        tokio::pin!(closed);

        match future::select(read_iv, closed).await {
            Either::Left((r, ..)) => r,
            Either::Right(..) => return None,
        }
    };

    let err = match handshake {
        Ok(Ok(..)) => return forward_until_closed("s2c", reader, writer, closer).await,
        Ok(Err(err)) => err,
        Err(..) => io::Error::from(ProtocolError::ReadIv(io::Error::new(
            ErrorKind::TimedOut,
            format!("no response from server in {:?}", timeout),
        ))),
    };

    closer.close();
    Some(Err(err))
}

/// Relay data between the SOCKS5 client `plain` and the shadowsocks server `shadow`
///
/// The server has `svr_cfg.timeout()` to start its response stream, otherwise the tunnel is closed.
///
/// Returns after both directions have stopped. Both connections are closed when this returns.
pub async fn establish_tcp_tunnel<P, S>(
    svr_cfg: &ServerConfig,
    plain: P,
    shadow: ProxyClientStream<S>,
    peer_addr: SocketAddr,
    target_addr: &Address,
) -> io::Result<()>
where
    P: AsyncRead + AsyncWrite + Send + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!(
        "established tcp tunnel {} <-> {} through server {}",
        peer_addr,
        target_addr,
        svr_cfg.addr()
    );

    let (plain_reader, plain_writer) = tokio::io::split(plain);
    let (shadow_reader, shadow_writer) = shadow.into_split();

    let closer = SessionCloser::new();

    let c2s = tokio::spawn(forward_until_closed("c2s", plain_reader, shadow_writer, closer.clone()));
    let s2c = tokio::spawn(forward_from_server(svr_cfg.timeout(), shadow_reader, plain_writer, closer));

    let (c2s, s2c) = tokio::join!(c2s, s2c);

    match c2s {
        Ok(Some(Ok(n))) => trace!("tcp tunnel {} -> {} closed, {} bytes", peer_addr, target_addr, n),
        Ok(Some(Err(err))) => trace!("tcp tunnel {} -> {} closed with error: {}", peer_addr, target_addr, err),
        Ok(None) => trace!("tcp tunnel {} -> {} closed by the other direction", peer_addr, target_addr),
        Err(err) => error!("tcp tunnel {} -> {} task failed: {}", peer_addr, target_addr, err),
    }

    match s2c {
        Ok(Some(Ok(n))) => trace!("tcp tunnel {} <- {} closed, {} bytes", peer_addr, target_addr, n),
        Ok(Some(Err(ref err))) if ProtocolError::is_read_iv(err) => {
            error!(
                "tcp tunnel {} <- {} failed to read IV from server {}: {}",
                peer_addr,
                target_addr,
                svr_cfg.addr(),
                err
            );
        }
        Ok(Some(Err(err))) => trace!("tcp tunnel {} <- {} closed with error: {}", peer_addr, target_addr, err),
        Ok(None) => trace!("tcp tunnel {} <- {} closed by the other direction", peer_addr, target_addr),
        Err(err) => error!("tcp tunnel {} <- {} task failed: {}", peer_addr, target_addr, err),
    }

    Ok(())
}
