//! Request-id generation.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, SystemClock};

/// Abstract source of request ids.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Default generator: 8 bytes from the OS entropy source, hex encoded
/// (16 chars). If the entropy source fails, falls back to a
/// timestamp-derived id so request correlation keeps working.
pub struct RandomIdGenerator {
    clock: Arc<dyn Clock>,
}

impl RandomIdGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; 8];
        if OsRng.try_fill_bytes(&mut bytes).is_err() {
            return format!("{}-fallback", self.clock.now().format("%Y%m%d%H%M%S"));
        }
        bytes.iter().fold(String::with_capacity(16), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
    }
}

/// Test generator that replays a scripted list of ids.
pub struct SequenceIdGenerator {
    state: Mutex<(Vec<String>, usize)>,
}

impl SequenceIdGenerator {
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            state: Mutex::new((ids.into_iter().map(Into::into).collect(), 0)),
        }
    }

    pub fn reset(&self) {
        self.state.lock().unwrap().1 = 0;
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn generate(&self) -> String {
        let mut state = self.state.lock().unwrap();
        let (ids, idx) = (&state.0, state.1);
        if idx >= ids.len() {
            return "seq-id-overflow".to_string();
        }
        let id = ids[idx].clone();
        state.1 += 1;
        id
    }
}
