use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Throughput statistics for a run, with *all-time* counters and a
/// *sliding 1 s window* rate.
#[derive(Debug)]
pub struct Counter {
    /// All-time raw bytes moved off the card
    pub total_bytes: usize,
    /// All-time number of completed buffers
    pub n_buffers: usize,
    /// All-time number of converted records
    pub n_records: usize,
    /// Time when this counter was created or last reset
    pub t_begin: Instant,

    window: Duration,
    events: VecDeque<(Instant, usize)>,
    bytes_in_window: usize,
}

impl Default for Counter {
    fn default() -> Self {
        Counter {
            total_bytes: 0,
            n_buffers: 0,
            n_records: 0,
            t_begin: Instant::now(),
            window: Duration::from_secs(1),
            events: VecDeque::new(),
            bytes_in_window: 0,
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Long-term average rate since t_begin, in MB/s
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_bytes as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Sliding-window rate over the last second, in MB/s
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        (self.bytes_in_window as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Record one completed buffer of `bytes` raw bytes and `records`
    /// converted records.
    pub fn increment(&mut self, bytes: usize, records: usize) {
        let now = Instant::now();

        self.total_bytes += bytes;
        self.n_buffers += 1;
        self.n_records += records;

        self.events.push_back((now, bytes));
        self.bytes_in_window += bytes;

        while let Some(&(ts, sz)) = self.events.front() {
            if now.duration_since(ts) > self.window {
                self.events.pop_front();
                self.bytes_in_window -= sz;
            } else {
                break;
            }
        }
    }

    pub fn reset(&mut self) {
        self.total_bytes = 0;
        self.n_buffers = 0;
        self.n_records = 0;
        self.t_begin = Instant::now();

        self.events.clear();
        self.bytes_in_window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate() {
        let mut counter = Counter::new();
        counter.increment(1024, 8);
        counter.increment(2048, 8);
        assert_eq!(counter.total_bytes, 3072);
        assert_eq!(counter.n_buffers, 2);
        assert_eq!(counter.n_records, 16);
        assert!(counter.rate() > 0.0);

        counter.reset();
        assert_eq!(counter.total_bytes, 0);
        assert_eq!(counter.n_buffers, 0);
        assert_eq!(counter.rate(), 0.0);
    }
}
