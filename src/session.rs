//! Server-side connection session.
//!
//! Drives one client through `Init -> Ack -> N x (HashRequest -> HashResponse)`:
//!
//! ```text
//! AwaitInit --Init(n)--> SendAck --Ack(n*40)--> AwaitRequest(0..n) --> Closed
//! ```
//!
//! Any I/O or protocol failure ends the session with an error. The caller
//! owns the stream and closes it by dropping it.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::engine::{ChecksumEngine, SessionEngine};
use crate::error::{Error, Result};
use crate::protocol::{read_message, write_message, Message, MessageTag};

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the client's Init.
    AwaitInit,
    /// Init received, Ack not yet sent.
    SendAck { request_count: u32 },
    /// Serving HashRequests.
    AwaitRequest {
        request_count: u32,
        responses_sent: u32,
    },
    /// All requests answered.
    Closed,
}

/// Outcome of a session that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub request_count: u32,
    pub responses_sent: u32,
}

/// One accepted connection and the engine serving it.
pub struct Session<S, E: ChecksumEngine> {
    stream: S,
    engine: SessionEngine<E>,
    state: SessionState,
}

impl<S, E> Session<S, E>
where
    S: AsyncRead + AsyncWrite + Unpin,
    E: ChecksumEngine,
{
    pub fn new(stream: S, engine: SessionEngine<E>) -> Self {
        Self {
            stream,
            engine,
            state: SessionState::AwaitInit,
        }
    }

    /// Run the session until every announced request has been answered.
    pub async fn run(mut self) -> Result<SessionSummary> {
        let mut summary = SessionSummary {
            request_count: 0,
            responses_sent: 0,
        };

        loop {
            let state = self.state;
            self.state = match state {
                SessionState::AwaitInit => self.await_init().await?,
                SessionState::SendAck { request_count } => {
                    summary.request_count = request_count;
                    self.send_ack(request_count).await?
                }
                SessionState::AwaitRequest {
                    request_count,
                    responses_sent,
                } => {
                    let next = self.serve_request(request_count, responses_sent).await?;
                    summary.responses_sent = responses_sent + 1;
                    next
                }
                SessionState::Closed => {
                    trace!(request_count = summary.request_count, "Session complete");
                    return Ok(summary);
                }
            };
        }
    }

    async fn await_init(&mut self) -> Result<SessionState> {
        match read_message(&mut self.stream).await? {
            Message::Init { request_count } => {
                trace!(request_count, "Received Init");
                Ok(SessionState::SendAck { request_count })
            }
            other => Err(unexpected(MessageTag::Init, &other)),
        }
    }

    async fn send_ack(&mut self, request_count: u32) -> Result<SessionState> {
        write_message(&mut self.stream, &Message::ack_for(request_count)).await?;
        Ok(next_request_state(request_count, 0))
    }

    async fn serve_request(
        &mut self,
        request_count: u32,
        responses_sent: u32,
    ) -> Result<SessionState> {
        let payload = match read_message(&mut self.stream).await? {
            Message::HashRequest { payload } => payload,
            other => return Err(unexpected(MessageTag::HashRequest, &other)),
        };

        let len = payload.len();
        let digest = self.engine.digest_async(payload).await?;
        trace!(index = responses_sent, len, "Computed digest");

        let response = Message::HashResponse {
            index: responses_sent,
            digest,
        };
        write_message(&mut self.stream, &response).await?;

        Ok(next_request_state(request_count, responses_sent + 1))
    }
}

fn next_request_state(request_count: u32, responses_sent: u32) -> SessionState {
    if responses_sent >= request_count {
        SessionState::Closed
    } else {
        SessionState::AwaitRequest {
            request_count,
            responses_sent,
        }
    }
}

fn unexpected(expected: MessageTag, actual: &Message) -> Error {
    Error::UnexpectedMessage {
        expected: expected.name(),
        actual: actual.tag().name(),
    }
}
