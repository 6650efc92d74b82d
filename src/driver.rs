//! Client-side request driver.
//!
//! Sends an Init, waits for the Ack, sends the whole batch of HashRequests
//! with randomly sized payloads read from the input file, then drains and
//! prints one line per HashResponse:
//!
//! ```text
//! Init --> AwaitAck --> SendBatch --> CollectResponses --> Done
//! ```
//!
//! The batch is always fully written before the first response is read.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::engine::Digest;
use crate::error::{Error, Result};
use crate::protocol::{read_message, write_message, Message, MessageTag};

/// Inclusive bounds on the size of each payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRange {
    min: u32,
    max: u32,
}

impl PayloadRange {
    /// Fails with [`Error::InvalidPayloadRange`] when `min > max`.
    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidPayloadRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Draw a size uniformly from `[min, max]`.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> u32 {
        rng.gen_range(self.min..=self.max)
    }
}

/// Current state of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    AwaitAck,
    SendBatch,
    CollectResponses,
    Done,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSummary {
    /// Advisory value from the server's Ack. Not acted upon.
    pub adjusted_count: u32,
    pub responses_received: u32,
}

/// Everything one client run needs.
pub struct RequestContext<F> {
    request_count: u32,
    range: PayloadRange,
    file: F,
    rng: StdRng,
    responses_received: u32,
}

impl<F> RequestContext<F>
where
    F: AsyncRead + Unpin,
{
    /// `seed` makes payload sizes reproducible; `None` seeds from the OS.
    pub fn new(request_count: u32, range: PayloadRange, file: F, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            request_count,
            range,
            file,
            rng,
            responses_received: 0,
        }
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn responses_received(&self) -> u32 {
        self.responses_received
    }

    /// Run the whole exchange over `stream`, writing one line per digest to `out`.
    pub async fn run<S, W>(&mut self, stream: &mut S, out: &mut W) -> Result<DriverSummary>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut state = DriverState::Init;
        let mut adjusted_count = 0;

        loop {
            trace!(?state, "Driver step");
            state = match state {
                DriverState::Init => {
                    let init = Message::Init {
                        request_count: self.request_count,
                    };
                    write_message(stream, &init).await?;
                    DriverState::AwaitAck
                }
                DriverState::AwaitAck => {
                    adjusted_count = await_ack(stream).await?;
                    debug!(adjusted_count, "Received Ack");
                    DriverState::SendBatch
                }
                DriverState::SendBatch => {
                    self.send_batch(stream).await?;
                    DriverState::CollectResponses
                }
                DriverState::CollectResponses => {
                    self.collect_responses(stream, out).await?;
                    DriverState::Done
                }
                DriverState::Done => {
                    out.flush().await?;
                    return Ok(DriverSummary {
                        adjusted_count,
                        responses_received: self.responses_received,
                    });
                }
            };
        }
    }

    async fn send_batch<S>(&mut self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        for i in 0..self.request_count {
            let size = self.range.sample(&mut self.rng);
            let payload = self.read_payload(size as usize).await?;
            trace!(request = i, len = size, "Sending HashRequest");
            write_message(stream, &Message::HashRequest { payload }).await?;
        }
        debug!(count = self.request_count, "Batch sent");
        Ok(())
    }

    /// Read exactly `size` bytes of the input file.
    async fn read_payload(&mut self, size: usize) -> Result<Bytes> {
        let mut payload = vec![0u8; size];
        let mut filled = 0;

        while filled < size {
            let n = self.file.read(&mut payload[filled..]).await?;
            if n == 0 {
                return Err(Error::ShortFileRead {
                    expected: size,
                    actual: filled,
                });
            }
            filled += n;
        }

        Ok(Bytes::from(payload))
    }

    async fn collect_responses<S, W>(&mut self, stream: &mut S, out: &mut W) -> Result<()>
    where
        S: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while self.responses_received < self.request_count {
            match read_message(stream).await? {
                Message::HashResponse { index, digest } => {
                    if index != self.responses_received {
                        warn!(
                            index,
                            expected = self.responses_received,
                            "HashResponse out of sequence"
                        );
                    }
                    let mut line = render_response(index, &digest);
                    line.push('\n');
                    out.write_all(line.as_bytes()).await?;
                    self.responses_received += 1;
                }
                other => {
                    return Err(Error::UnexpectedMessage {
                        expected: MessageTag::HashResponse.name(),
                        actual: other.tag().name(),
                    })
                }
            }
        }
        Ok(())
    }
}

async fn await_ack<S>(stream: &mut S) -> Result<u32>
where
    S: AsyncRead + Unpin,
{
    match read_message(stream).await? {
        Message::Ack { adjusted_count } => Ok(adjusted_count),
        other => Err(Error::UnexpectedMessage {
            expected: MessageTag::Ack.name(),
            actual: other.tag().name(),
        }),
    }
}

/// Format one response line: `<index+1>: 0x<hex digest>`.
pub fn render_response(index: u32, digest: &Digest) -> String {
    format!("{}: 0x{}", u64::from(index) + 1, hex::encode(digest))
}
