use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{copy_bidirectional, AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{self, Duration},
};

use ssocks::{
    config::ServerConfig,
    crypto::CipherKind,
    local::Socks5Local,
    relay::{socks5::Address, tcprelay::CryptoStream},
};

const PASSWORD: &str = "test-password";
const METHOD: CipherKind = CipherKind::Aes128Cfb;

/// Echo target, fake shadowsocks server and local SOCKS5 server, all on loopback
pub struct Socks5TestServer {
    local_addr: SocketAddr,
    target_addr: SocketAddr,
    relayed_addrs: mpsc::UnboundedReceiver<Address>,
}

impl Socks5TestServer {
    pub async fn start() -> Socks5TestServer {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        tokio::spawn(run_echo_server(target));

        let relay = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        let (tx, relayed_addrs) = mpsc::unbounded_channel();
        tokio::spawn(run_fake_relay(relay, target_addr, tx));

        let svr_cfg = ServerConfig::new(relay_addr, PASSWORD, METHOD);
        let local = Socks5Local::bind("127.0.0.1:0".parse().unwrap(), Arc::new(svr_cfg))
            .await
            .unwrap();
        let local_addr = local.local_addr().unwrap();
        tokio::spawn(local.run());

        Socks5TestServer {
            local_addr,
            target_addr,
            relayed_addrs,
        }
    }

    pub fn client_addr(&self) -> &SocketAddr {
        &self.local_addr
    }
}

async fn run_echo_server(listener: TcpListener) {
    loop {
        let (mut stream, _) = listener.accept().await.unwrap();
        tokio::spawn(async move {
            let (mut r, mut w) = stream.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });
    }
}

/// Minimal shadowsocks server, every tunnel is connected to `target_addr`
async fn run_fake_relay(listener: TcpListener, target_addr: SocketAddr, tx: mpsc::UnboundedSender<Address>) {
    let svr_cfg = ServerConfig::new(listener.local_addr().unwrap(), PASSWORD, METHOD);
    let key = svr_cfg.key().to_owned();

    loop {
        let (stream, _) = listener.accept().await.unwrap();
        let key = key.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let mut stream = CryptoStream::from_stream(stream, METHOD, &key);
            let addr = Address::read_from(&mut stream).await.unwrap();
            tx.send(addr).unwrap();

            let mut target = TcpStream::connect(target_addr).await.unwrap();
            let _ = copy_bidirectional(&mut stream, &mut target).await;
        });
    }
}

async fn socks5_handshake(stream: &mut TcpStream) {
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut resp = [0u8; 2];
    stream.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [0x05, 0x00]);
}

fn connect_request(addr: &Address) -> Vec<u8> {
    let mut buf = vec![0x05, 0x01, 0x00];
    let mut raw = Vec::new();
    addr.write_to_buf(&mut raw);
    buf.extend_from_slice(&raw);
    buf
}

const SUCCEEDED_REPLY: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

#[tokio::test]
async fn socks5_relay_stream() {
    let _ = env_logger::try_init();

    let mut svr = Socks5TestServer::start().await;

    let mut c = TcpStream::connect(svr.client_addr()).await.unwrap();
    socks5_handshake(&mut c).await;

    let target = Address::SocketAddress(svr.target_addr);
    c.write_all(&connect_request(&target)).await.unwrap();

    let mut reply = [0u8; 10];
    c.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, SUCCEEDED_REPLY);

    let payload = b"GET / HTTP/1.0\r\nHost: www.example.com\r\n\r\n";
    c.write_all(payload).await.unwrap();

    let mut echo = vec![0u8; payload.len()];
    c.read_exact(&mut echo).await.unwrap();
    assert_eq!(&echo[..], &payload[..]);

    let relayed = svr.relayed_addrs.recv().await.unwrap();
    assert_eq!(relayed, target);
}

#[tokio::test]
async fn socks5_relay_domain_name() {
    let _ = env_logger::try_init();

    let mut svr = Socks5TestServer::start().await;

    let mut c = TcpStream::connect(svr.client_addr()).await.unwrap();
    socks5_handshake(&mut c).await;

    let target = Address::DomainNameAddress("www.example.com".to_owned(), 80);
    c.write_all(&connect_request(&target)).await.unwrap();

    let mut reply = [0u8; 10];
    c.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, SUCCEEDED_REPLY);

    // Larger than one copy chunk and the stream buffer
    let payload: Vec<u8> = (0..10000u32).map(|i| (i % 253) as u8).collect();

    let (mut r, mut w) = c.into_split();
    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        w.write_all(&payload).await.unwrap();
        w
    });

    let mut echo = vec![0u8; expected.len()];
    r.read_exact(&mut echo).await.unwrap();
    assert_eq!(echo, expected);
    let _w = writer.await.unwrap();

    let relayed = svr.relayed_addrs.recv().await.unwrap();
    assert_eq!(relayed, target);
}

#[tokio::test]
async fn socks5_command_not_supported() {
    let _ = env_logger::try_init();

    let svr = Socks5TestServer::start().await;

    let mut c = TcpStream::connect(svr.client_addr()).await.unwrap();
    socks5_handshake(&mut c).await;

    // BIND, rejected before the address is read
    c.write_all(&[0x05, 0x02, 0x00, 0x01]).await.unwrap();

    let mut reply = [0u8; 10];
    c.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x07);

    let mut buf = [0u8; 1];
    let n = time::timeout(Duration::from_secs(5), c.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn socks5_auth_method_not_offered() {
    let _ = env_logger::try_init();

    let mut svr = Socks5TestServer::start().await;

    // Username/Password only, still answered with "no authentication"
    let mut c = TcpStream::connect(svr.client_addr()).await.unwrap();
    c.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    let mut resp = [0u8; 2];
    c.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [0x05, 0x00]);

    let target = Address::SocketAddress(svr.target_addr);
    c.write_all(&connect_request(&target)).await.unwrap();

    let mut reply = [0u8; 10];
    c.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, SUCCEEDED_REPLY);

    c.write_all(b"ping").await.unwrap();
    let mut echo = [0u8; 4];
    c.read_exact(&mut echo).await.unwrap();
    assert_eq!(&echo, b"ping");

    assert_eq!(svr.relayed_addrs.recv().await.unwrap(), target);
}

#[tokio::test]
async fn socks5_no_auth_methods() {
    let _ = env_logger::try_init();

    let svr = Socks5TestServer::start().await;

    let mut c = TcpStream::connect(svr.client_addr()).await.unwrap();
    c.write_all(&[0x05, 0x00]).await.unwrap();
    let mut resp = [0u8; 2];
    c.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [0x05, 0x00]);
}

#[tokio::test]
async fn socks5_non_utf8_domain_name() {
    let _ = env_logger::try_init();

    let mut svr = Socks5TestServer::start().await;

    let mut c = TcpStream::connect(svr.client_addr()).await.unwrap();
    socks5_handshake(&mut c).await;

    c.write_all(&[0x05, 0x01, 0x00, 0x03, 0x02, 0xc3, 0x28, 0x00, 0x50]).await.unwrap();

    let mut reply = [0u8; 10];
    c.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, SUCCEEDED_REPLY);

    c.write_all(b"ping").await.unwrap();
    let mut echo = [0u8; 4];
    c.read_exact(&mut echo).await.unwrap();
    assert_eq!(&echo, b"ping");

    let relayed = svr.relayed_addrs.recv().await.unwrap();
    assert_eq!(relayed.port(), 80);
}

#[tokio::test]
async fn socks5_server_unreachable() {
    let _ = env_logger::try_init();

    // Reserve a port, then close it
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = unused.local_addr().unwrap();
    drop(unused);

    let svr_cfg = ServerConfig::new(relay_addr, PASSWORD, METHOD);
    let local = Socks5Local::bind("127.0.0.1:0".parse().unwrap(), Arc::new(svr_cfg))
        .await
        .unwrap();
    let local_addr = local.local_addr().unwrap();
    tokio::spawn(local.run());

    let mut c = TcpStream::connect(local_addr).await.unwrap();
    socks5_handshake(&mut c).await;
    c.write_all(&connect_request(&Address::DomainNameAddress("www.example.com".to_owned(), 443)))
        .await
        .unwrap();

    // Success is reported before the server is reached
    let mut reply = [0u8; 10];
    c.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, SUCCEEDED_REPLY);

    let mut buf = [0u8; 1];
    let n = time::timeout(Duration::from_secs(10), c.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn socks5_server_never_responds() {
    let _ = env_logger::try_init();

    // Accepts tunnels, reads everything and never writes back
    let relay = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = relay.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = relay.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    let mut svr_cfg = ServerConfig::new(relay_addr, PASSWORD, METHOD);
    svr_cfg.set_timeout(Duration::from_secs(1));
    let local = Socks5Local::bind("127.0.0.1:0".parse().unwrap(), Arc::new(svr_cfg))
        .await
        .unwrap();
    let local_addr = local.local_addr().unwrap();
    tokio::spawn(local.run());

    let mut c = TcpStream::connect(local_addr).await.unwrap();
    socks5_handshake(&mut c).await;
    c.write_all(&connect_request(&Address::DomainNameAddress("www.example.com".to_owned(), 80)))
        .await
        .unwrap();

    let mut reply = [0u8; 10];
    c.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, SUCCEEDED_REPLY);

    c.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();

    let mut buf = [0u8; 1];
    let n = time::timeout(Duration::from_secs(4), c.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}
