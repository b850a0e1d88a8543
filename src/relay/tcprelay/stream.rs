//! Stream protocol implementation
//!
//! ```plain
//! +--------+----------------------------+
//! |   IV   |   keystream XOR payload    |
//! +--------+----------------------------+
//! | Fixed  |          Variable          |
//! +--------+----------------------------+
//! ```
//!
//! Each direction starts with the sender's IV in clear text. There is no framing after that.

use std::{
    io::{self, ErrorKind},
    marker::Unpin,
    pin::Pin,
    task::{self, Poll},
};

use byte_string::ByteStr;
use bytes::{BufMut, BytesMut};
use futures::ready;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::crypto::{Decryptor, Encryptor};

/// Default capacity of the staging buffer of `EncryptedWriter`
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Stream protocol error
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    IoError(#[from] io::Error),
    #[error("failed to read stream IV, {0}")]
    ReadIv(#[source] io::Error),
}

/// Stream protocol result
pub type ProtocolResult<T> = Result<T, ProtocolError>;

impl From<ProtocolError> for io::Error {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::IoError(err) => err,
            ProtocolError::ReadIv(err) => {
                let kind = err.kind();
                io::Error::new(kind, ProtocolError::ReadIv(err))
            }
        }
    }
}

impl ProtocolError {
    /// Check if `err` is raised while reading the peer's IV
    pub fn is_read_iv(err: &io::Error) -> bool {
        matches!(
            err.get_ref().and_then(|e| e.downcast_ref::<ProtocolError>()),
            Some(ProtocolError::ReadIv(..))
        )
    }
}

/// Reader wrapper that will decrypt data automatically
pub struct DecryptedReader {
    decryptor: Decryptor,
    iv: Vec<u8>,
    iv_pos: usize,
}

impl DecryptedReader {
    pub fn new(decryptor: Decryptor) -> DecryptedReader {
        let iv_len = decryptor.kind().iv_len();
        DecryptedReader {
            decryptor,
            iv: vec![0u8; iv_len],
            iv_pos: 0,
        }
    }

    /// IV received from the peer
    pub fn iv(&self) -> Option<&[u8]> {
        self.decryptor.iv()
    }

    /// Attempt to read decrypted data from `stream`
    pub fn poll_read_decrypted<S>(
        &mut self,
        cx: &mut task::Context<'_>,
        stream: &mut S,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<ProtocolResult<()>>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        if !self.decryptor.is_ready() && !ready!(self.poll_read_iv(cx, stream))? {
            // EOF before the peer sent anything
            return Ok(()).into();
        }

        let before_n = buf.filled().len();
        ready!(Pin::new(stream).poll_read(cx, buf))?;

        let m = &mut buf.filled_mut()[before_n..];
        if !m.is_empty() {
            self.decryptor.decrypt_in_place(m);
        }

        Ok(()).into()
    }

    /// Reads the peer's IV, returns `false` on EOF before the first byte
    pub fn poll_read_iv<S>(&mut self, cx: &mut task::Context<'_>, stream: &mut S) -> Poll<ProtocolResult<bool>>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        if self.decryptor.is_ready() {
            return Ok(true).into();
        }

        while self.iv_pos < self.iv.len() {
            let mut read_buf = ReadBuf::new(&mut self.iv[self.iv_pos..]);
            if let Err(err) = ready!(Pin::new(&mut *stream).poll_read(cx, &mut read_buf)) {
                return Err(ProtocolError::ReadIv(err)).into();
            }

            let n = read_buf.filled().len();
            if n == 0 {
                if self.iv_pos == 0 {
                    return Ok(false).into();
                }
                return Err(ProtocolError::ReadIv(ErrorKind::UnexpectedEof.into())).into();
            }
            self.iv_pos += n;
        }

        trace!("got stream iv {:?}", ByteStr::new(&self.iv));
        self.decryptor.init(&self.iv);

        Ok(true).into()
    }
}

enum EncryptWriteState {
    AssemblePacket,
    Writing { pos: usize },
}

/// Writer wrapper that will encrypt data automatically
pub struct EncryptedWriter {
    encryptor: Encryptor,
    buffer: BytesMut,
    state: EncryptWriteState,
}

impl EncryptedWriter {
    pub fn new(encryptor: Encryptor) -> EncryptedWriter {
        // IV should be sent with the first packet
        let mut buffer = BytesMut::with_capacity(DEFAULT_BUFFER_SIZE);
        buffer.put_slice(encryptor.iv());

        EncryptedWriter {
            encryptor,
            buffer,
            state: EncryptWriteState::AssemblePacket,
        }
    }

    /// IV sent to the peer
    pub fn iv(&self) -> &[u8] {
        self.encryptor.iv()
    }

    /// Attempt to write encrypted data into the writer
    ///
    /// After `Poll::Pending`, the caller must retry with the same `buf`.
    pub fn poll_write_encrypted<S>(
        &mut self,
        cx: &mut task::Context<'_>,
        stream: &mut S,
        buf: &[u8],
    ) -> Poll<ProtocolResult<usize>>
    where
        S: AsyncWrite + Unpin + ?Sized,
    {
        loop {
            match self.state {
                EncryptWriteState::AssemblePacket => {
                    let n = self.buffer.len();
                    if n + buf.len() > DEFAULT_BUFFER_SIZE {
                        debug!(
                            "writing {} bytes exceeds the {} bytes stream buffer, using a one-off buffer",
                            buf.len(),
                            DEFAULT_BUFFER_SIZE
                        );
                    }
                    self.buffer.put_slice(buf);
                    self.encryptor.encrypt_in_place(&mut self.buffer[n..]);
                    self.state = EncryptWriteState::Writing { pos: 0 };
                }
                EncryptWriteState::Writing { ref mut pos } => {
                    while *pos < self.buffer.len() {
                        let n = ready!(Pin::new(&mut *stream).poll_write(cx, &self.buffer[*pos..]))?;
                        if n == 0 {
                            return Err(io::Error::from(ErrorKind::WriteZero).into()).into();
                        }
                        *pos += n;
                    }

                    // Reset state
                    self.state = EncryptWriteState::AssemblePacket;
                    if self.buffer.capacity() > DEFAULT_BUFFER_SIZE {
                        self.buffer = BytesMut::with_capacity(DEFAULT_BUFFER_SIZE);
                    } else {
                        self.buffer.clear();
                    }

                    return Ok(buf.len()).into();
                }
            }
        }
    }
}
