// src/correlation.rs

/// Per-session request id source. Ids look like `<prefix>-3-1700000000000`: a
/// counter that never repeats within the session plus the epoch millis at
/// issue time for log correlation.
#[derive(Debug, Clone)]
pub struct RequestIds {
    prefix: String,
    counter: u64,
}

impl RequestIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), counter: 0 }
    }

    pub fn next_id(&mut self, now_ms: i64) -> String {
        self.counter += 1;
        format!("{}-{}-{}", self.prefix, self.counter, now_ms)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new("probe")
    }
}
