//! Bidirectional relay for established SOCKS5 sessions
//!
//! Once the success reply went out, both streams are split and each
//! direction runs its own loop moving chunks of at most [`RELAY_CHUNK_SIZE`].
//! Every chunk read from one side is written completely to the other before
//! that direction reads again; a failed or short write ends the relay. EOF on
//! either side ends it too, half-open sessions are not kept around.

use super::consts::RELAY_CHUNK_SIZE;
use crate::server::EventSink;
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Bytes relayed during one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to target
    pub sent: u64,
    /// Target to client
    pub received: u64,
}

/// Per-session relay state
///
/// Counters start at zero and only grow. Each chunk is reported to the sink
/// as it is moved.
#[derive(Debug)]
pub struct Relay<'a> {
    sink: &'a dyn EventSink,
    stats: RelayStats,
}

impl<'a> Relay<'a> {
    /// Create a relay that reports to `sink`
    pub fn new(sink: &'a dyn EventSink) -> Self {
        Relay {
            sink,
            stats: RelayStats::default(),
        }
    }

    /// Bytes moved so far
    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Copy in both directions until either side closes or fails.
    ///
    /// Client bytes that arrived before the relay phase are in `pending`;
    /// they go out ahead of anything read from `inbound`.
    pub async fn run<A, B>(
        &mut self,
        inbound: &mut A,
        outbound: &mut B,
        pending: &mut BytesMut,
    ) -> io::Result<()>
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut client_read, mut client_write) = tokio::io::split(inbound);
        let (mut target_read, mut target_write) = tokio::io::split(outbound);

        let sink = self.sink;
        let mut sent = 0u64;
        let mut received = 0u64;

        let client_to_target = async {
            while !pending.is_empty() {
                let n = pending.len().min(RELAY_CHUNK_SIZE);
                let chunk = pending.split_to(n);
                target_write.write_all(&chunk).await?;
                sent += n as u64;
                sink.on_bytes_transferred(n as u64, 0);
            }
            target_write.flush().await?;

            loop {
                let n = pump(&mut client_read, &mut target_write).await? as u64;
                if n == 0 {
                    return Ok::<_, io::Error>(());
                }
                sent += n;
                sink.on_bytes_transferred(n, 0);
            }
        };

        let target_to_client = async {
            loop {
                let n = pump(&mut target_read, &mut client_write).await? as u64;
                if n == 0 {
                    return Ok::<_, io::Error>(());
                }
                received += n;
                sink.on_bytes_transferred(0, n);
            }
        };

        let result = tokio::select! {
            result = client_to_target => {
                debug!("Client to target relay finished: {:?}", result);
                result
            }
            result = target_to_client => {
                debug!("Target to client relay finished: {:?}", result);
                result
            }
        };

        self.stats.sent += sent;
        self.stats.received += received;
        result
    }
}

/// Move a single chunk from `src` to `dst`.
///
/// Returns the number of bytes moved, zero on EOF. The chunk is written in
/// full and flushed or the call fails.
pub async fn pump<R, W>(src: &mut R, dst: &mut W) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_CHUNK_SIZE];
    let n = src.read(&mut buf).await?;
    if n > 0 {
        dst.write_all(&buf[..n]).await?;
        dst.flush().await?;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ChannelSink, NoopSink, ProxyEvent};
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_pump_copies_in_order() {
        let mut src: &[u8] = b"abc";
        let mut dst = Vec::new();

        assert_eq!(pump(&mut src, &mut dst).await.unwrap(), 3);
        assert_eq!(dst, b"abc");
    }

    #[tokio::test]
    async fn test_pump_empty_source() {
        let mut src: &[u8] = b"";
        let mut dst = Vec::new();

        assert_eq!(pump(&mut src, &mut dst).await.unwrap(), 0);
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn test_pump_caps_chunk_size() {
        let data = vec![0x5A; RELAY_CHUNK_SIZE * 2 + 10];
        let mut src: &[u8] = &data;
        let mut dst = Vec::new();

        assert_eq!(pump(&mut src, &mut dst).await.unwrap(), RELAY_CHUNK_SIZE);
        assert_eq!(src.len(), RELAY_CHUNK_SIZE + 10);
    }

    #[tokio::test]
    async fn test_pump_write_failure() {
        let mut src: &[u8] = b"payload";
        let (mut dst, peer) = duplex(64);
        drop(peer);

        assert!(pump(&mut src, &mut dst).await.is_err());
    }

    #[tokio::test]
    async fn test_relay_bidirectional() {
        let (mut client, mut inbound) = duplex(1024);
        let (mut outbound, mut target) = duplex(1024);

        let relay_task = tokio::spawn(async move {
            let sink = NoopSink;
            let mut relay = Relay::new(&sink);
            relay.run(&mut inbound, &mut outbound, &mut BytesMut::new()).await.unwrap();
            relay.stats()
        });

        client.write_all(b"message A->B").await.unwrap();
        let mut buf = [0u8; 12];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"message A->B");

        target.write_all(b"reply B->A").await.unwrap();
        let mut buf = [0u8; 10];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"reply B->A");

        drop(client);

        let stats = tokio::time::timeout(Duration::from_secs(1), relay_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, RelayStats { sent: 12, received: 10 });
    }

    #[tokio::test]
    async fn test_relay_large_transfer() {
        let (mut client, mut inbound) = duplex(65536);
        let (mut outbound, mut target) = duplex(65536);

        let relay_task = tokio::spawn(async move {
            let sink = NoopSink;
            let mut relay = Relay::new(&sink);
            let _ = relay.run(&mut inbound, &mut outbound, &mut BytesMut::new()).await;
            relay.stats()
        });

        let data = vec![0xAB; 50000];
        client.write_all(&data).await.unwrap();

        let mut received = vec![0u8; 50000];
        target.read_exact(&mut received).await.unwrap();
        assert_eq!(received, data);

        drop(target);

        let stats = tokio::time::timeout(Duration::from_secs(1), relay_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.sent, 50000);
    }

    #[tokio::test]
    async fn test_relay_forwards_pending_first() {
        let (mut client, mut inbound) = duplex(1024);
        let (mut outbound, mut target) = duplex(1024);
        let (sink, mut events) = ChannelSink::new();

        let relay_task = tokio::spawn(async move {
            let mut pending = BytesMut::from(&b"first "[..]);
            let mut relay = Relay::new(&sink);
            let result = relay.run(&mut inbound, &mut outbound, &mut pending).await;
            assert!(pending.is_empty());
            result.map(|_| relay.stats())
        });

        client.write_all(b"second").await.unwrap();
        let mut buf = [0u8; 12];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first second");

        drop(target);
        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(stats, RelayStats { sent: 12, received: 0 });
        assert_eq!(
            events.next().await,
            Some(ProxyEvent::BytesTransferred {
                sent: 6,
                received: 0
            })
        );
        assert_eq!(
            events.next().await,
            Some(ProxyEvent::BytesTransferred {
                sent: 6,
                received: 0
            })
        );
    }

    #[tokio::test]
    async fn test_relay_full_duplex_echo_does_not_stall() {
        const TOTAL: usize = 1024 * 1024;

        let (client, mut inbound) = duplex(65536);
        let (mut outbound, mut target) = duplex(512);

        // Echo target: reads a chunk, then writes all of it back before
        // reading again
        let echo = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                let n = target.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                if target.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        });

        let relay_task = tokio::spawn(async move {
            let sink = NoopSink;
            let mut relay = Relay::new(&sink);
            let _ = relay
                .run(&mut inbound, &mut outbound, &mut BytesMut::new())
                .await;
            relay.stats()
        });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let writer = async {
            let data: Vec<u8> = (0..TOTAL).map(|i| (i % 251) as u8).collect();
            client_write.write_all(&data).await.unwrap();
        };
        let reader = async {
            let mut echoed = vec![0u8; TOTAL];
            client_read.read_exact(&mut echoed).await.unwrap();
            echoed
        };

        let (_, echoed) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(writer, reader)
        })
        .await
        .expect("relay stalled under full-duplex load");
        assert!(echoed.iter().enumerate().all(|(i, b)| *b == (i % 251) as u8));

        drop(client_read);
        drop(client_write);
        let stats = tokio::time::timeout(Duration::from_secs(1), relay_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.sent, TOTAL as u64);
        assert_eq!(stats.received, TOTAL as u64);
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_ends_when_target_closes() {
        let (_client, mut inbound) = duplex(1024);
        let (mut outbound, target) = duplex(1024);
        drop(target);

        let sink = NoopSink;
        let mut relay = Relay::new(&sink);
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            relay.run(&mut inbound, &mut outbound, &mut BytesMut::new()),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
        assert_eq!(relay.stats(), RelayStats::default());
    }
}
