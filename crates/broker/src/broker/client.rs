// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One local client connection: line framing in, reply lines out.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::broker::router::{ClientId, Op};

/// Longest accepted request line; anything longer is dropped and the
/// stream resynchronizes at the next LF.
pub const MAX_LINE_BYTES: usize = 2 * 1024;

/// A stalled client gets this long to drain a write before it is
/// dropped.
const WRITE_DEADLINE: Duration = Duration::from_millis(500);

/// Serve one accepted connection until EOF, write failure, or
/// shutdown. All routing decisions live in the router task; this task
/// only frames lines in and writes reply/event lines out.
pub async fn serve(
    stream: UnixStream,
    id: ClientId,
    ops: mpsc::UnboundedSender<Op>,
    cancel: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    if ops.send(Op::Connect { id, tx }).is_err() {
        return;
    }
    tracing::debug!(client = id, "client connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            out = rx.recv() => {
                let Some(mut line) = out else { break };
                line.push('\n');
                match tokio::time::timeout(WRITE_DEADLINE, write_half.write_all(line.as_bytes())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(client = id, err = %e, "client write failed");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(client = id, "client write stalled");
                        break;
                    }
                }
            }

            line = lines.next() => {
                match line {
                    Some(Ok(line)) => {
                        if ops.send(Op::Line { id, line }).is_err() {
                            break;
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        // Partial line dropped; the codec resumes at the next LF.
                        tracing::debug!(client = id, "oversized request line dropped");
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        tracing::debug!(client = id, err = %e, "client read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    let _ = ops.send(Op::Disconnect { id });
    tracing::debug!(client = id, "client disconnected");
}
