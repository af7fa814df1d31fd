use std::time::Duration;

use tokio::io::{
    AsyncBufRead,
    AsyncBufReadExt,
    AsyncReadExt,
};
use tokio_util::sync::CancellationToken;

use crate::{
    aprs::{
        Packet,
        Position,
        Report,
        ReportKind,
    },
    filter::{
        FilterDecision,
        FilterPolicy,
    },
    observer::Observer,
};

/// APRS-IS lines are at most 512 bytes, including the line ending. Longer
/// lines are discarded.
const MAX_LINE_LENGTH: usize = 512;

/// Why [`read_frames`] returned.
#[derive(Debug)]
pub enum StreamEnd {
    /// No line was received within the idle timeout.
    IdleTimeout,
    /// Shutdown was requested.
    Cancelled,
    /// The server closed the connection.
    Closed,
    Failed(std::io::Error),
}

/// What happened to a single line.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatch {
    /// Empty line, or a server comment.
    Skipped,
    DecodeFailed,
    /// A packet type we don't process.
    Ignored,
    /// A packet type we don't process, but which was logged.
    Logged(ReportKind),
    /// A position was passed through the filter.
    Filtered(FilterDecision),
}

/// Routes decoded lines to the filter, and accepted positions to the observer.
///
/// This keeps no state between lines.
#[derive(Debug)]
pub struct Dispatcher<O> {
    policy: FilterPolicy,
    observer: O,
}

impl<O> Dispatcher<O> {
    pub fn new(policy: FilterPolicy, observer: O) -> Self {
        Self { policy, observer }
    }
}

impl<O: Observer> Dispatcher<O> {
    pub fn dispatch_line(&mut self, line: &str) -> Dispatch {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() || line.starts_with('#') {
            return Dispatch::Skipped;
        }

        // malformed packets are common on APRS-IS, so this is not worth more than a trace
        let packet = match line.parse::<Packet>() {
            Ok(packet) => packet,
            Err(error) => {
                tracing::trace!(?error, line, "failed to decode packet");
                return Dispatch::DecodeFailed;
            }
        };

        match packet.report {
            Report::Position(position) => self.process_position(&packet.sender, &position),
            Report::Status {
                position: Some(position),
                ..
            } => self.process_position(&packet.sender, &position),
            Report::Status { position: None, .. }
            | Report::Message { .. }
            | Report::Unsupported(_) => Dispatch::Ignored,
            Report::Other(kind) => {
                tracing::info!(%kind, sender = %packet.sender, "ignoring packet");
                Dispatch::Logged(kind)
            }
        }
    }

    fn process_position(&mut self, sender: &str, position: &Position) -> Dispatch {
        let decision = self.policy.evaluate(sender, position);

        match &decision {
            FilterDecision::Accept(sighting) => self.observer.observe(sighting),
            FilterDecision::Reject(rejection) => {
                tracing::trace!(sender, ?rejection, "position rejected");
            }
        }

        Dispatch::Filtered(decision)
    }
}

/// Reads lines until the connection is idle for `idle_timeout`, closed, fails,
/// or shutdown is requested.
pub async fn read_frames<R, O>(
    reader: &mut R,
    shutdown: &CancellationToken,
    idle_timeout: Duration,
    dispatcher: &mut Dispatcher<O>,
) -> StreamEnd
where
    R: AsyncBufRead + Unpin,
    O: Observer,
{
    let mut buffer = Vec::with_capacity(MAX_LINE_LENGTH);
    let mut discarding = false;

    loop {
        buffer.clear();

        let read_line = async {
            let mut limited = (&mut *reader).take(MAX_LINE_LENGTH as u64);
            limited.read_until(b'\n', &mut buffer).await
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                return StreamEnd::Cancelled;
            }
            result = tokio::time::timeout(idle_timeout, read_line) => result,
        };

        match result {
            Err(_) => {
                tracing::info!(idle_timeout = %humantime::format_duration(idle_timeout), "read timeout");
                return StreamEnd::IdleTimeout;
            }
            Ok(Err(error)) => return StreamEnd::Failed(error),
            Ok(Ok(0)) => return StreamEnd::Closed,
            Ok(Ok(length)) if length == MAX_LINE_LENGTH && !buffer.ends_with(b"\n") => {
                if !discarding {
                    tracing::debug!(max_length = MAX_LINE_LENGTH, "discarding over-long line");
                    discarding = true;
                }
            }
            Ok(Ok(_)) if discarding => {
                // rest of an over-long line
                discarding = false;
            }
            Ok(Ok(_)) => {
                // some stations send latin-1 comments, which shouldn't kill the connection
                let line = String::from_utf8_lossy(&buffer);
                dispatcher.dispatch_line(&line);
            }
        }
    }
}
