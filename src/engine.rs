//! Checksum engine.
//!
//! An engine is a stateful digest computer, optionally salted at creation.
//! `finish` absorbs its input and returns the digest of everything absorbed
//! since the last `reset`, so independent inputs need a `reset` in between.
//! Dropping an engine destroys it.
//!
//! Sessions never touch an engine directly; they go through an
//! [`EngineSource`], which either hands each session a private engine or
//! serializes every finish/reset pair on one shared instance.

use bytes::Bytes;
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Length of every digest in bytes (256 bits).
pub const DIGEST_LEN: usize = 32;

/// A fixed-size digest.
pub type Digest = [u8; DIGEST_LEN];

/// Interface the server consumes for computing digests.
pub trait ChecksumEngine: Send + 'static {
    /// Build an engine mixing `salt` into every digest. An empty salt
    /// means no salt.
    fn create(salt: &[u8]) -> Self
    where
        Self: Sized;

    /// Absorb `data` and return the digest of all input since the last reset.
    /// The digest is also retained until the next reset.
    fn finish(&mut self, data: &[u8]) -> Digest;

    /// Clear accumulated state so the engine can digest an unrelated input.
    fn reset(&mut self);
}

/// SHA-256 engine. The salt is absorbed ahead of the data.
pub struct Sha256Engine {
    salt: Arc<[u8]>,
    hasher: Sha256,
    last_digest: Option<Digest>,
}

impl Sha256Engine {
    fn seeded(salt: &[u8]) -> Sha256 {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher
    }

    /// Digest produced by the most recent `finish`, if not yet reset.
    pub fn last_digest(&self) -> Option<&Digest> {
        self.last_digest.as_ref()
    }
}

impl ChecksumEngine for Sha256Engine {
    fn create(salt: &[u8]) -> Self {
        Self {
            salt: Arc::from(salt),
            hasher: Self::seeded(salt),
            last_digest: None,
        }
    }

    fn finish(&mut self, data: &[u8]) -> Digest {
        self.hasher.update(data);
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&self.hasher.clone().finalize());
        self.last_digest = Some(digest);
        digest
    }

    fn reset(&mut self) {
        self.hasher = Self::seeded(&self.salt);
        self.last_digest = None;
    }
}

impl Drop for Sha256Engine {
    fn drop(&mut self) {
        debug!(salted = !self.salt.is_empty(), "Checksum engine destroyed");
    }
}

/// How sessions obtain their engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineMode {
    /// Every session builds its own engine from the server's salt.
    #[default]
    PerSession,
    /// All sessions share one engine behind a lock.
    Shared,
}

impl FromStr for EngineMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "per-session" | "per_session" => Ok(EngineMode::PerSession),
            "shared" => Ok(EngineMode::Shared),
            other => Err(format!(
                "unknown engine mode '{other}' (expected per-session or shared)"
            )),
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::PerSession => f.write_str("per-session"),
            EngineMode::Shared => f.write_str("shared"),
        }
    }
}

/// Server-wide provider of engines, created once at startup.
pub enum EngineSource<E: ChecksumEngine> {
    PerSession { salt: Arc<[u8]> },
    Shared(Arc<Mutex<E>>),
}

impl<E: ChecksumEngine> EngineSource<E> {
    pub fn new(mode: EngineMode, salt: &[u8]) -> Self {
        debug!(mode = %mode, salted = !salt.is_empty(), "Creating checksum engine source");
        match mode {
            EngineMode::PerSession => EngineSource::PerSession {
                salt: Arc::from(salt),
            },
            EngineMode::Shared => EngineSource::Shared(Arc::new(Mutex::new(E::create(salt)))),
        }
    }

    pub fn mode(&self) -> EngineMode {
        match self {
            EngineSource::PerSession { .. } => EngineMode::PerSession,
            EngineSource::Shared(_) => EngineMode::Shared,
        }
    }

    /// Handle for one session.
    pub fn session_engine(&self) -> SessionEngine<E> {
        match self {
            EngineSource::PerSession { salt } => SessionEngine::Owned(E::create(salt)),
            EngineSource::Shared(engine) => SessionEngine::Shared(Arc::clone(engine)),
        }
    }
}

/// The engine as seen by one session.
pub enum SessionEngine<E: ChecksumEngine> {
    Owned(E),
    Shared(Arc<Mutex<E>>),
}

impl<E: ChecksumEngine> SessionEngine<E> {
    /// Digest `data` as an independent input: finish followed by reset.
    ///
    /// For a shared engine both calls happen under a single lock
    /// acquisition, so concurrent sessions cannot interleave them.
    pub fn digest(&mut self, data: &[u8]) -> Result<Digest> {
        match self {
            SessionEngine::Owned(engine) => Ok(finish_and_reset(engine, data)),
            SessionEngine::Shared(engine) => {
                let mut engine = engine.lock().map_err(|_| Error::EngineUnavailable)?;
                Ok(finish_and_reset(&mut *engine, data))
            }
        }
    }

    /// Async form of [`digest`](Self::digest) for use inside a session.
    ///
    /// A shared engine is locked on the blocking pool, so sessions waiting
    /// for it never park a runtime worker.
    pub async fn digest_async(&mut self, data: Bytes) -> Result<Digest> {
        match self {
            SessionEngine::Owned(engine) => Ok(finish_and_reset(engine, &data)),
            SessionEngine::Shared(engine) => {
                let engine = Arc::clone(engine);
                tokio::task::spawn_blocking(move || -> Result<Digest> {
                    let mut engine = engine.lock().map_err(|_| Error::EngineUnavailable)?;
                    Ok(finish_and_reset(&mut *engine, &data))
                })
                .await
                .map_err(|_| Error::EngineUnavailable)?
            }
        }
    }
}

fn finish_and_reset<E: ChecksumEngine>(engine: &mut E, data: &[u8]) -> Digest {
    let digest = engine.finish(data);
    engine.reset();
    digest
}
