use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use anyhow::{anyhow, bail, Context};
use bytes::Bytes;
use mqpool::{HandlerFuture, Message, MessageHandler};
use tokio::sync::Semaphore;

/// Accepts every message and remembers its payload.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<Bytes>>>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<Bytes> {
        self.seen.lock().expect("recording mutex").clone()
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, message: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            self.seen
                .lock()
                .expect("recording mutex")
                .push(message.into_bytes());
            Ok(())
        })
    }
}

/// Fails the first `failures` attempts of every distinct payload, then succeeds.
#[derive(Clone)]
pub struct FlakyHandler {
    failures: usize,
    attempts: Arc<Mutex<HashMap<Bytes, Vec<Instant>>>>,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn attempts(&self, payload: &'static [u8]) -> Vec<Instant> {
        self.attempts
            .lock()
            .expect("attempts mutex")
            .get(&Bytes::from_static(payload))
            .cloned()
            .unwrap_or_default()
    }
}

impl MessageHandler for FlakyHandler {
    fn handle(&self, message: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let attempt = {
                let mut attempts = self.attempts.lock().expect("attempts mutex");
                let entry = attempts.entry(message.into_bytes()).or_default();
                entry.push(Instant::now());
                entry.len()
            };
            if attempt <= self.failures {
                bail!("attempt {attempt} failed");
            }
            Ok(())
        })
    }
}

/// Holds each call until the test releases a permit, counting overlap.
#[derive(Clone)]
pub struct GatedHandler {
    gate: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
}

impl Default for GatedHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GatedHandler {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl MessageHandler for GatedHandler {
    fn handle(&self, _message: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let permit = self.gate.acquire().await.context("gate closed");
            self.active.fetch_sub(1, Ordering::SeqCst);
            permit?.forget();
            Ok::<(), anyhow::Error>(())
        })
    }
}

/// Always fails; panics instead when the payload is `panic`.
#[derive(Clone, Copy, Default)]
pub struct FailingHandler;

impl MessageHandler for FailingHandler {
    fn handle(&self, message: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if &message[..] == b"panic" {
                panic!("handler blew up");
            }
            Err::<(), _>(anyhow!("cannot process {} bytes", message.len()))
        })
    }
}
