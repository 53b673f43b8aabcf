//! Length-prefixed frame channel over a pair of byte streams
//!
//! Used on both ends of a sandbox's stdio: the driver writes requests to the
//! child's stdin and reads responses from its stdout, the guest runner does
//! the opposite.

use crate::{Result, SkiffError, protocol};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame either side accepts (16MB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Bidirectional frame channel
#[derive(Debug)]
pub struct FramedPipe<R, W> {
    rx: R,
    tx: W,
}

impl<R, W> FramedPipe<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub const fn new(rx: R, tx: W) -> Self {
        Self { rx, tx }
    }

    /// Send one message
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        let bytes = protocol::encode(msg)
            .map_err(|e| SkiffError::Protocol(format!("failed to encode message: {e}")))?;
        self.send_frame(&bytes).await
    }

    /// Receive one message, or `None` if the peer closed the stream between frames
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let Some(bytes) = self.recv_frame().await? else {
            return Ok(None);
        };
        let msg = protocol::decode(&bytes)
            .map_err(|e| SkiffError::Protocol(format!("failed to decode message: {e}")))?;
        Ok(Some(msg))
    }

    async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(SkiffError::Protocol(format!(
                "frame too large: {} bytes",
                payload.len()
            )));
        }

        // Length prefix (4 bytes, big-endian)
        #[allow(clippy::cast_possible_truncation)]
        let len_bytes = (payload.len() as u32).to_be_bytes();
        self.tx.write_all(&len_bytes).await?;
        self.tx.write_all(payload).await?;
        self.tx.flush().await?;

        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_bytes = [0u8; 4];
        match self.rx.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            tracing::warn!(len, max = MAX_FRAME_LEN, "peer sent oversized frame");
            return Err(SkiffError::Protocol(format!("frame too large: {len} bytes")));
        }

        let mut frame = vec![0u8; len];
        self.rx.read_exact(&mut frame).await?;

        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    #[tokio::test]
    async fn messages_cross_a_duplex_stream() {
        let (driver_end, guest_end) = tokio::io::duplex(1024);
        let (driver_rx, driver_tx) = tokio::io::split(driver_end);
        let (guest_rx, guest_tx) = tokio::io::split(guest_end);
        let mut driver = FramedPipe::new(driver_rx, driver_tx);
        let mut guest = FramedPipe::new(guest_rx, guest_tx);

        driver
            .send(&Request::Init {
                main: "main".into(),
                code: "print(1)".into(),
            })
            .await
            .unwrap();

        match guest.recv::<Request>().await.unwrap() {
            Some(Request::Init { main, code }) => {
                assert_eq!(main, "main");
                assert_eq!(code, "print(1)");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (driver_end, guest_end) = tokio::io::duplex(64);
        drop(driver_end);
        let (rx, tx) = tokio::io::split(guest_end);
        let mut guest = FramedPipe::new(rx, tx);
        assert!(guest.recv::<Request>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut raw, guest_end) = tokio::io::duplex(64);
        raw.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let (rx, tx) = tokio::io::split(guest_end);
        let mut guest = FramedPipe::new(rx, tx);
        assert!(matches!(
            guest.recv::<Request>().await,
            Err(SkiffError::Protocol(_))
        ));
    }
}
