//! IO facilities for TCP relay

use std::{
    io,
    marker::Unpin,
    pin::Pin,
    task::{self, Poll},
};

use byte_string::ByteStr;
use futures::future;
use log::trace;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};

use crate::crypto::{CipherKind, CipherSession};

use super::stream::{DecryptedReader, EncryptedWriter};

/// A bidirectional stream for read/write encrypted data in shadowsocks' tunnel
pub struct CryptoStream<S> {
    stream: S,
    dec: DecryptedReader,
    enc: EncryptedWriter,
    method: CipherKind,
}

impl<S> CryptoStream<S> {
    /// Create a new CryptoStream with the underlying stream connection
    ///
    /// A random IV is generated for the sending direction.
    pub fn from_stream(stream: S, method: CipherKind, key: &[u8]) -> CryptoStream<S> {
        let session = CipherSession::new(method, key);
        trace!("generated stream cipher IV {:?}", ByteStr::new(session.encrypt_iv()));
        CryptoStream::from_session(stream, session)
    }

    /// Create a new CryptoStream driven by `session`
    pub fn from_session(stream: S, session: CipherSession) -> CryptoStream<S> {
        let method = session.kind();
        let (enc, dec) = session.into_split();

        CryptoStream {
            stream,
            dec: DecryptedReader::new(dec),
            enc: EncryptedWriter::new(enc),
            method,
        }
    }

    /// Get encryption method
    pub fn method(&self) -> CipherKind {
        self.method
    }

    /// Get received IV, `None` until the peer's IV has been read
    pub fn received_iv(&self) -> Option<&[u8]> {
        self.dec.iv()
    }

    /// Get sent IV
    pub fn sent_iv(&self) -> &[u8] {
        self.enc.iv()
    }
}

impl<S> AsyncRead for CryptoStream<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let CryptoStream {
            ref mut dec,
            ref mut stream,
            ..
        } = *self;
        dec.poll_read_decrypted(cx, stream, buf).map_err(Into::into)
    }
}

impl<S> AsyncWrite for CryptoStream<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let CryptoStream {
            ref mut enc,
            ref mut stream,
            ..
        } = *self;
        enc.poll_write_encrypted(cx, stream, buf).map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl<S> CryptoStream<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Split into a decrypting read half and an encrypting write half
    pub fn into_split(self) -> (CryptoStreamReadHalf<S>, CryptoStreamWriteHalf<S>) {
        let (reader, writer) = tokio::io::split(self.stream);

        (
            CryptoStreamReadHalf { reader, dec: self.dec },
            CryptoStreamWriteHalf { writer, enc: self.enc },
        )
    }
}

pub struct CryptoStreamReadHalf<S> {
    reader: ReadHalf<S>,
    dec: DecryptedReader,
}

impl<S> CryptoStreamReadHalf<S> {
    /// Get received IV
    pub fn received_iv(&self) -> Option<&[u8]> {
        self.dec.iv()
    }
}

impl<S> CryptoStreamReadHalf<S>
where
    S: AsyncRead,
{
    /// Wait until the peer's IV has been received
    ///
    /// Returns `false` if the peer closed the connection without sending anything.
    pub async fn read_iv(&mut self) -> io::Result<bool> {
        future::poll_fn(|cx| {
            let CryptoStreamReadHalf {
                ref mut dec,
                ref mut reader,
            } = *self;
            dec.poll_read_iv(cx, reader).map_err(Into::into)
        })
        .await
    }
}

impl<S> AsyncRead for CryptoStreamReadHalf<S>
where
    S: AsyncRead,
{
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let CryptoStreamReadHalf {
            ref mut dec,
            ref mut reader,
        } = *self;
        dec.poll_read_decrypted(cx, reader, buf).map_err(Into::into)
    }
}

pub struct CryptoStreamWriteHalf<S> {
    writer: WriteHalf<S>,
    enc: EncryptedWriter,
}

impl<S> CryptoStreamWriteHalf<S> {
    /// Get sent IV
    pub fn sent_iv(&self) -> &[u8] {
        self.enc.iv()
    }
}

impl<S> AsyncWrite for CryptoStreamWriteHalf<S>
where
    S: AsyncWrite,
{
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let CryptoStreamWriteHalf {
            ref mut enc,
            ref mut writer,
        } = *self;
        enc.poll_write_encrypted(cx, writer, buf).map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
