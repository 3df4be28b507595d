//! One direction of a relayed connection.
//!
//! A relay reads from one socket, transforms, and writes to the other until the input reaches
//! EOF. It then shuts down the write side of its output so the far end observes the same
//! half-close, and reports a clean close. Any failure ends the relay with an error and leaves
//! the output as is; the owning connection tears down both sockets.

use crate::{
    packet::{Frame, KeySet},
    Error, FRAME_SIZE, MAX_DATA_SIZE,
};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use zeroize::Zeroizing;

/// Transformation applied by a relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Read plaintext in chunks of up to [MAX_DATA_SIZE] bytes and write frames.
    Encrypt,
    /// Read whole frames and write the plaintext they carry.
    Decrypt,
}

impl Mode {
    /// The mode of the opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Self::Encrypt => Self::Decrypt,
            Self::Decrypt => Self::Encrypt,
        }
    }
}

/// Relay `input` to `output` until `input` closes.
pub async fn relay<I, O>(mode: Mode, keys: KeySet, input: I, output: O) -> Result<(), Error>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    match mode {
        Mode::Encrypt => encrypt(keys, input, output).await,
        Mode::Decrypt => decrypt(keys, input, output).await,
    }
}

async fn encrypt<I, O>(mut keys: KeySet, mut input: I, mut output: O) -> Result<(), Error>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut buf = Zeroizing::new([0u8; MAX_DATA_SIZE]);
    loop {
        let n = input.read(&mut buf[..]).await.map_err(Error::RecvFailed)?;
        if n == 0 {
            break;
        }
        let frame = keys.encrypt(&buf[..n])?;
        write(&mut output, &frame).await?;
    }
    output.shutdown().await.map_err(Error::SendFailed)
}

async fn decrypt<I, O>(mut keys: KeySet, mut input: I, mut output: O) -> Result<(), Error>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut frame = Zeroizing::new([0u8; FRAME_SIZE]);
    while read_frame(&mut input, &mut frame).await? {
        let data = keys.decrypt(&mut frame)?;
        write(&mut output, data).await?;
    }
    output.shutdown().await.map_err(Error::SendFailed)
}

/// Fill `frame` from `input`. Returns false on EOF at a frame boundary.
async fn read_frame<I: AsyncRead + Unpin>(input: &mut I, frame: &mut Frame) -> Result<bool, Error> {
    let mut filled = 0;
    while filled < FRAME_SIZE {
        let n = input
            .read(&mut frame[filled..])
            .await
            .map_err(Error::RecvFailed)?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Error::TruncatedFrame(filled));
        }
        filled += n;
    }
    Ok(true)
}

async fn write<O: AsyncWrite + Unpin>(output: &mut O, data: &[u8]) -> Result<(), Error> {
    output.write_all(data).await.map_err(Error::SendFailed)?;
    output.flush().await.map_err(Error::SendFailed)
}
