// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Terminal output streaming for jobs.
//!
//! [`JobUi`] converts component output into ordered, timestamped
//! terminal line batches on the job stream. Two producers feed it:
//! [`JobUi::output`] renders and flushes immediately, while the
//! [`AsyncWrite`] handle from [`JobUi::writer`] feeds complete lines
//! into a channel drained by one background task that batches them
//! (flushing at capacity or after a one-second tick).

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::events;
use crate::transport::JobStream;
use stevedore_protocol::runner_proto::TerminalLine;

/// Buffered lines that trigger a flush without waiting for the timer.
pub const BATCH_CAPACITY: usize = 64;

/// Longest time buffered lines wait before being flushed.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the writer-to-batcher line channel.
const LINE_CHANNEL_CAPACITY: usize = 256;

struct Shared {
    stream: Arc<dyn JobStream>,
    /// Guards the closed flag and the underlying stream send,
    /// serializing all writers. True once closed.
    send_lock: Mutex<bool>,
    line_counter: AtomicU64,
}

impl Shared {
    fn next_line(&self) -> u64 {
        self.line_counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_batch(&self, lines: Vec<TerminalLine>) -> Result<(), StreamError> {
        if lines.is_empty() {
            return Ok(());
        }
        let closed = self.send_lock.lock().await;
        if *closed {
            warn!(dropped = lines.len(), "terminal output dropped after close");
            return Ok(());
        }
        self.stream.send(events::build_terminal(lines)).await
    }
}

/// Streams job terminal output to the server.
pub struct JobUi {
    shared: Arc<Shared>,
    line_tx: mpsc::Sender<TerminalLine>,
    cancel: CancellationToken,
    done: Mutex<Option<oneshot::Receiver<()>>>,
}

impl JobUi {
    /// Create a UI over the given job stream and spawn its batching
    /// task.
    pub fn new(stream: Arc<dyn JobStream>) -> Self {
        let shared = Arc::new(Shared {
            stream,
            send_lock: Mutex::new(false),
            line_counter: AtomicU64::new(1),
        });

        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(run_batcher(
            shared.clone(),
            line_rx,
            cancel.clone(),
            done_tx,
        ));

        Self {
            shared,
            line_tx,
            cancel,
            done: Mutex::new(Some(done_rx)),
        }
    }

    /// Render a status message and flush it immediately.
    ///
    /// Multi-line messages become one batch preserving line order.
    pub async fn output(&self, msg: impl AsRef<str>) -> Result<(), StreamError> {
        let msg = msg.as_ref();
        let mut lines = Vec::new();
        if msg.is_empty() {
            lines.push(events::build_line("", self.shared.next_line()));
        } else {
            for raw in msg.lines() {
                lines.push(events::build_line(raw, self.shared.next_line()));
            }
        }
        self.shared.send_batch(lines).await
    }

    /// An [`AsyncWrite`] handle for raw component output (stdout and
    /// stderr of build tools, etc). Complete lines are batched by the
    /// background task; a trailing partial line is emitted on
    /// shutdown.
    pub fn writer(&self) -> UiWriter {
        UiWriter {
            sender: PollSender::new(self.line_tx.clone()),
            shared: self.shared.clone(),
            buf: Vec::new(),
            pending: None,
        }
    }

    /// Close the UI: mark the stream closed for writers, stop the
    /// batching task, and wait for it to exit.
    ///
    /// This ordering (closed flag first, then cancel, then wait)
    /// guarantees no send races the job stream after close; anything
    /// still buffered is dropped with a warning.
    pub async fn close(&self) {
        {
            let mut closed = self.shared.send_lock.lock().await;
            if *closed {
                return;
            }
            *closed = true;
        }
        self.cancel.cancel();
        if let Some(done) = self.done.lock().await.take() {
            let _ = done.await;
        }
        debug!("job ui closed");
    }
}

async fn run_batcher(
    shared: Arc<Shared>,
    mut line_rx: mpsc::Receiver<TerminalLine>,
    cancel: CancellationToken,
    done_tx: oneshot::Sender<()>,
) {
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut buffer: Vec<TerminalLine> = Vec::with_capacity(BATCH_CAPACITY);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = line_rx.recv() => match line {
                Some(line) => {
                    buffer.push(line);
                    if buffer.len() >= BATCH_CAPACITY {
                        flush(&shared, &mut buffer).await;
                    }
                }
                // All writers dropped; nothing more will arrive.
                None => break,
            },
            _ = interval.tick() => {
                if !buffer.is_empty() {
                    flush(&shared, &mut buffer).await;
                }
            }
        }
    }

    flush(&shared, &mut buffer).await;
    let _ = done_tx.send(());
}

async fn flush(shared: &Shared, buffer: &mut Vec<TerminalLine>) {
    let lines = std::mem::take(buffer);
    if let Err(e) = shared.send_batch(lines).await {
        warn!(error = %e, "failed to send terminal output batch");
    }
}

/// Line-splitting [`AsyncWrite`] handle produced by [`JobUi::writer`].
pub struct UiWriter {
    sender: PollSender<TerminalLine>,
    shared: Arc<Shared>,
    buf: Vec<u8>,
    pending: Option<TerminalLine>,
}

impl UiWriter {
    /// Push `self.pending` into the channel when capacity allows.
    /// Returns Ready(true) once no line is pending; a closed channel
    /// discards the line (the UI was closed underneath the writer).
    fn poll_drain_pending(&mut self, cx: &mut Context<'_>) -> Poll<bool> {
        if self.pending.is_none() {
            return Poll::Ready(true);
        }
        match self.sender.poll_reserve(cx) {
            Poll::Ready(Ok(())) => {
                if let Some(line) = self.pending.take() {
                    let _ = self.sender.send_item(line);
                }
                Poll::Ready(true)
            }
            Poll::Ready(Err(_)) => {
                self.pending = None;
                Poll::Ready(true)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn take_line(&mut self) -> TerminalLine {
        let raw = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        events::build_line(raw, self.shared.next_line())
    }
}

impl AsyncWrite for UiWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let mut consumed = 0;

        loop {
            match this.poll_drain_pending(cx) {
                Poll::Ready(_) => {}
                Poll::Pending => {
                    // Report what was consumed so far; zero consumed
                    // means the caller must wait for channel capacity.
                    return if consumed > 0 {
                        Poll::Ready(Ok(consumed))
                    } else {
                        Poll::Pending
                    };
                }
            }

            if consumed == data.len() {
                return Poll::Ready(Ok(consumed));
            }

            match data[consumed..].iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    this.buf.extend_from_slice(&data[consumed..consumed + idx]);
                    consumed += idx + 1;
                    this.pending = Some(this.take_line());
                }
                None => {
                    this.buf.extend_from_slice(&data[consumed..]);
                    return Poll::Ready(Ok(data.len()));
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_drain_pending(cx) {
            Poll::Ready(_) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // Emit any trailing partial line before closing.
        loop {
            match this.poll_drain_pending(cx) {
                Poll::Ready(_) => {}
                Poll::Pending => return Poll::Pending,
            }
            if this.buf.is_empty() {
                this.sender.close();
                return Poll::Ready(Ok(()));
            }
            this.pending = Some(this.take_line());
        }
    }
}
