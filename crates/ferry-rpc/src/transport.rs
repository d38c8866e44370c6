// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Newline-delimited JSON framing over a byte stream.
//!
//! Reads split on `\n` regardless of how the underlying stream chunks the
//! bytes; writes funnel through a single task so no two frames can interleave
//! on the output.  The writer queue is bounded — when the host stops reading,
//! senders suspend, which propagates backpressure all the way to backend
//! event consumption.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on one buffered input line.  A legitimate JSON-RPC frame fits
/// far under this; anything larger is a runaway or hostile peer.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Writer queue high-water mark.
pub const WRITE_QUEUE_CAPACITY: usize = 10_000;

/// Handle for enqueueing outbound frames.  Cloneable; all clones share the
/// single writer task.
#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<Value>,
}

impl FrameWriter {
    /// Enqueue one frame.  Suspends when the queue is at capacity; fails only
    /// when the writer task has shut down.
    pub async fn send(&self, frame: Value) -> Result<(), ClosedError> {
        self.tx.send(frame).await.map_err(|_| ClosedError)
    }

    /// Non-suspending variant for contexts that must not block (e.g. the
    /// final error response during shutdown).  Drops the frame when the queue
    /// is full.
    pub fn try_send(&self, frame: Value) -> Result<(), ClosedError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound frame dropped: write queue full");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClosedError),
        }
    }
}

/// The transport's write side has shut down.
#[derive(Debug, thiserror::Error)]
#[error("transport closed")]
pub struct ClosedError;

/// Line-framed transport over arbitrary read/write halves.
///
/// Production wires this to stdin/stdout; tests use `tokio::io::duplex`.
pub struct LineTransport {
    writer: FrameWriter,
    writer_task: JoinHandle<()>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    frames_rx: mpsc::Receiver<Value>,
    reader_task: JoinHandle<()>,
}

impl LineTransport {
    pub fn new<R, W>(read: R, write: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (write_tx, write_rx) = mpsc::channel::<Value>(WRITE_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let writer_task = tokio::spawn(write_loop(write, write_rx, shutdown_rx));

        let (frames_tx, frames_rx) = mpsc::channel::<Value>(256);
        let reader_task = tokio::spawn(read_loop(read, frames_tx));

        Self {
            writer: FrameWriter { tx: write_tx },
            writer_task,
            shutdown_tx,
            frames_rx,
            reader_task,
        }
    }

    pub fn writer(&self) -> FrameWriter {
        self.writer.clone()
    }

    /// Receive the next decoded inbound frame.  `None` means EOF on the input
    /// stream: the peer has disconnected and the bridge should shut down.
    pub async fn recv(&mut self) -> Option<Value> {
        self.frames_rx.recv().await
    }

    /// Flush frames already queued and stop the writer task.  Writer handles
    /// held elsewhere (the endpoint) fail on subsequent sends.
    pub async fn shutdown(self) {
        self.reader_task.abort();
        let _ = self.shutdown_tx.send(());
        let _ = self.writer_task.await;
    }
}

async fn read_loop<R>(mut read: R, frames_tx: mpsc::Sender<Value>)
where
    R: AsyncRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    // When a line exceeds MAX_LINE_BYTES the remainder up to the next newline
    // is discarded rather than decoded.
    let mut discarding = false;
    let mut chunk = [0u8; 8192];

    loop {
        let n = match read.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "transport read failed");
                break;
            }
        };

        let mut rest = &chunk[..n];
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (line_tail, after) = rest.split_at(pos);
            rest = &after[1..];

            if discarding {
                discarding = false;
                pending.clear();
                continue;
            }
            pending.extend_from_slice(line_tail);
            let line = std::mem::take(&mut pending);
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            match serde_json::from_slice::<Value>(&line) {
                Ok(value) => {
                    if frames_tx.send(value).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "undecodable frame");
                    // Deliver a marker so the endpoint can answer with a
                    // parse-error response (id null).  Null never appears as
                    // a legitimate top-level frame.
                    if frames_tx.send(Value::Null).await.is_err() {
                        return;
                    }
                }
            }
        }

        if !discarding {
            pending.extend_from_slice(rest);
            if pending.len() > MAX_LINE_BYTES {
                warn!(
                    buffered = pending.len(),
                    "input line exceeds 1 MiB; discarding partial frame"
                );
                pending.clear();
                discarding = true;
            }
        }
    }
    debug!("transport input closed");
}

async fn write_loop<W>(
    mut write: W,
    mut write_rx: mpsc::Receiver<Value>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    let mut broken = false;
    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut shutdown_rx => {
                // Flush what is already queued, then stop accepting writes.
                while let Ok(frame) = write_rx.try_recv() {
                    write_one(&mut write, &frame, &mut broken).await;
                }
                break;
            }
            frame = write_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        write_one(&mut write, &frame, &mut broken).await;
    }
    write_rx.close();
    let _ = write.shutdown().await;
}

async fn write_one<W>(write: &mut W, frame: &Value, broken: &mut bool)
where
    W: AsyncWrite + Unpin,
{
    if *broken {
        // Keep draining so senders are never wedged on a dead pipe.
        return;
    }
    let mut line = match serde_json::to_vec(frame) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "unserializable outbound frame dropped");
            return;
        }
    };
    line.push(b'\n');
    if let Err(e) = write.write_all(&line).await {
        warn!(error = %e, "transport write failed; draining remaining frames");
        *broken = true;
        return;
    }
    if let Err(e) = write.flush().await {
        warn!(error = %e, "transport flush failed");
        *broken = true;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, AsyncWriteExt};

    async fn collect_written(mut rx: tokio::io::DuplexStream, expected_lines: usize) -> Vec<Value> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let lines = buf.iter().filter(|&&b| b == b'\n').count();
            if lines >= expected_lines {
                break;
            }
            let n = tokio::io::AsyncReadExt::read(&mut rx, &mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(buf)
            .unwrap()
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    // ── Read framing ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn frames_are_decoded_in_order() {
        let (mut host, bridge) = duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let mut transport = LineTransport::new(bridge_read, bridge_write);

        host.write_all(b"{\"a\":1}\n{\"b\":2}\n").await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), json!({"a": 1}));
        assert_eq!(transport.recv().await.unwrap(), json!({"b": 2}));
    }

    #[tokio::test]
    async fn frames_survive_arbitrary_chunk_boundaries() {
        let (mut host, bridge) = duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let mut transport = LineTransport::new(bridge_read, bridge_write);

        // One frame split across three writes, a second complete in the tail.
        host.write_all(b"{\"meth").await.unwrap();
        host.write_all(b"od\":\"x\"").await.unwrap();
        host.write_all(b"}\n{\"y\":true}\n").await.unwrap();

        assert_eq!(transport.recv().await.unwrap(), json!({"method": "x"}));
        assert_eq!(transport.recv().await.unwrap(), json!({"y": true}));
    }

    #[tokio::test]
    async fn bytes_after_last_newline_are_retained() {
        let (mut host, bridge) = duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let mut transport = LineTransport::new(bridge_read, bridge_write);

        host.write_all(b"{\"a\":1}\n{\"partial\":").await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), json!({"a": 1}));
        host.write_all(b"2}\n").await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), json!({"partial": 2}));
    }

    #[tokio::test]
    async fn empty_lines_are_skipped() {
        let (mut host, bridge) = duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let mut transport = LineTransport::new(bridge_read, bridge_write);

        host.write_all(b"\n\n{\"a\":1}\n  \n{\"b\":2}\n").await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), json!({"a": 1}));
        assert_eq!(transport.recv().await.unwrap(), json!({"b": 2}));
    }

    #[tokio::test]
    async fn undecodable_line_yields_null_marker() {
        let (mut host, bridge) = duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let mut transport = LineTransport::new(bridge_read, bridge_write);

        host.write_all(b"this is not json\n{\"ok\":1}\n").await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), Value::Null);
        assert_eq!(transport.recv().await.unwrap(), json!({"ok": 1}));
    }

    #[tokio::test]
    async fn eof_ends_the_stream() {
        let (host, bridge) = duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let mut transport = LineTransport::new(bridge_read, bridge_write);
        drop(host);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn oversized_line_is_discarded_and_following_frame_survives() {
        let (mut host, bridge) = duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let mut transport = LineTransport::new(bridge_read, bridge_write);

        let writer = tokio::spawn(async move {
            // 1 MiB + change of garbage without a newline, then a good frame.
            let garbage = vec![b'x'; MAX_LINE_BYTES + 4096];
            host.write_all(&garbage).await.unwrap();
            host.write_all(b"\n{\"after\":true}\n").await.unwrap();
            host
        });

        assert_eq!(transport.recv().await.unwrap(), json!({"after": true}));
        drop(writer.await.unwrap());
    }

    // ── Write serialization ───────────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_writers_never_interleave_frames() {
        let (host, bridge) = duplex(1024 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let transport = LineTransport::new(bridge_read, bridge_write);

        let mut tasks = Vec::new();
        for writer_id in 0..8 {
            let w = transport.writer();
            tasks.push(tokio::spawn(async move {
                for seq in 0..50 {
                    w.send(json!({"writer": writer_id, "seq": seq})).await.unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let frames = collect_written(host, 8 * 50).await;
        assert_eq!(frames.len(), 8 * 50);
        // Per-writer sequence numbers must be strictly increasing — frame
        // bodies may not mix.
        for writer_id in 0..8 {
            let seqs: Vec<i64> = frames
                .iter()
                .filter(|f| f["writer"] == writer_id)
                .map(|f| f["seq"].as_i64().unwrap())
                .collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn single_writer_preserves_send_order() {
        let (host, bridge) = duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let transport = LineTransport::new(bridge_read, bridge_write);

        let w = transport.writer();
        for i in 0..20 {
            w.send(json!({"i": i})).await.unwrap();
        }
        let frames = collect_written(host, 20).await;
        let got: Vec<i64> = frames.iter().map(|f| f["i"].as_i64().unwrap()).collect();
        assert_eq!(got, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn shutdown_flushes_queued_frames() {
        let (host, bridge) = duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge);
        let transport = LineTransport::new(bridge_read, bridge_write);

        let w = transport.writer();
        for i in 0..5 {
            w.send(json!({"i": i})).await.unwrap();
        }
        drop(w);
        transport.shutdown().await;

        let frames = collect_written(host, 5).await;
        assert_eq!(frames.len(), 5);
    }
}
