//! Console traffic statistics
//!
//! [`TrafficLogger`] is an [`EventSink`] that keeps just enough state to
//! render a one-line status: live connections, the peers that connected in
//! the last second and a moving average of throughput in each direction.
//! [`spawn_ticker`] advances the window once per second and logs the line.

use crate::server::EventSink;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;

/// Width of the rendered status line
pub const STATUS_WIDTH: usize = 80;

/// Number of one-second buckets in the throughput average
pub const BOXCAR_SAMPLES: usize = 5;

/// How long a peer stays in the status line after connecting
const PEER_WINDOW: Duration = Duration::from_secs(1);

/// Render a byte count as `b`, `Kb`, `Mb` or `Gb`, rounding down
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b < KB => format!("{}b", b),
        b if b < MB => format!("{}Kb", b / KB),
        b if b < GB => format!("{}Mb", b / MB),
        b => format!("{}Gb", b / GB),
    }
}

/// Fixed-window moving average over per-tick totals
#[derive(Debug, Clone)]
pub struct BoxcarAverage {
    buckets: VecDeque<u64>,
    current: u64,
    size: usize,
}

impl BoxcarAverage {
    /// Average over `size` completed buckets
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        BoxcarAverage {
            buckets: VecDeque::from(vec![0; size]),
            current: 0,
            size,
        }
    }

    /// Add to the bucket that is currently filling
    pub fn add_sample(&mut self, value: u64) {
        self.current = self.current.saturating_add(value);
    }

    /// Close the current bucket and start a new one
    pub fn advance(&mut self) {
        self.buckets.pop_front();
        self.buckets.push_back(self.current);
        self.current = 0;
    }

    /// Mean of the completed buckets
    pub fn average(&self) -> u64 {
        self.buckets.iter().sum::<u64>() / self.size as u64
    }
}

impl Default for BoxcarAverage {
    fn default() -> Self {
        Self::new(BOXCAR_SAMPLES)
    }
}

#[derive(Debug, Default)]
struct TrafficState {
    connections: usize,
    peers: VecDeque<(String, Instant)>,
    up: BoxcarAverage,
    down: BoxcarAverage,
}

/// Aggregates proxy events into a status line
#[derive(Debug, Default)]
pub struct TrafficLogger {
    state: Mutex<TrafficState>,
}

impl TrafficLogger {
    /// Create an empty logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the throughput window and expire old peers
    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// [`tick`](Self::tick) with an explicit clock
    pub fn tick_at(&self, now: Instant) {
        let mut state = self.lock();
        state.up.advance();
        state.down.advance();
        state
            .peers
            .retain(|(_, when)| now.saturating_duration_since(*when) <= PEER_WINDOW);
    }

    /// Current live connection count
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Status line, padded or truncated to exactly [`STATUS_WIDTH`] characters
    pub fn status_line(&self) -> String {
        let state = self.lock();

        let mut peers: Vec<&str> = Vec::new();
        for (peer, _) in &state.peers {
            if !peers.contains(&peer.as_str()) {
                peers.push(peer);
            }
        }

        let line = format!(
            "Connections: {} [{}] Up: {}/s Down: {}/s",
            state.connections,
            peers.join(", "),
            format_bytes(state.up.average()),
            format_bytes(state.down.average()),
        );
        format!("{:<width$.width$}", line, width = STATUS_WIDTH)
    }

    fn lock(&self) -> MutexGuard<'_, TrafficState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for TrafficLogger {
    fn on_incoming_connection(&self, peer: &str) {
        self.lock()
            .peers
            .push_back((peer.to_string(), Instant::now()));
    }

    fn on_connections_changed(&self, live: usize) {
        self.lock().connections = live;
    }

    fn on_bytes_transferred(&self, sent: u64, received: u64) {
        let mut state = self.lock();
        state.up.add_sample(sent);
        state.down.add_sample(received);
    }
}

/// Tick `logger` every `period` and log its status line
pub fn spawn_ticker(logger: Arc<TrafficLogger>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            logger.tick();
            info!("{}", logger.status_line().trim_end());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0b");
        assert_eq!(format_bytes(1023), "1023b");
        assert_eq!(format_bytes(1024), "1Kb");
        assert_eq!(format_bytes(1536), "1Kb");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5Mb");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3Gb");
    }

    #[test]
    fn test_boxcar_average() {
        let mut avg = BoxcarAverage::new(5);
        avg.add_sample(500);
        assert_eq!(avg.average(), 0);

        avg.advance();
        assert_eq!(avg.average(), 100);

        for _ in 0..4 {
            avg.add_sample(1000);
            avg.advance();
        }
        assert_eq!(avg.average(), 900);

        // The first bucket falls out of the window
        avg.advance();
        assert_eq!(avg.average(), 800);
    }

    #[test]
    fn test_status_line_is_fixed_width() {
        let logger = TrafficLogger::new();
        let line = logger.status_line();
        assert_eq!(line.len(), STATUS_WIDTH);
        assert!(line.starts_with("Connections: 0 [] Up: 0b/s Down: 0b/s"));

        for i in 0..20 {
            logger.on_incoming_connection(&format!("10.0.0.{}", i));
        }
        assert_eq!(logger.status_line().len(), STATUS_WIDTH);
    }

    #[test]
    fn test_status_line_reports_events() {
        let logger = TrafficLogger::new();
        logger.on_incoming_connection("127.0.0.1");
        logger.on_incoming_connection("127.0.0.1");
        logger.on_incoming_connection("::1");
        logger.on_connections_changed(2);
        logger.on_bytes_transferred(5 * 2048, 0);
        logger.on_bytes_transferred(0, 5 * 100);
        logger.tick();

        assert_eq!(logger.connections(), 2);
        assert_eq!(
            logger.status_line().trim_end(),
            "Connections: 2 [127.0.0.1, ::1] Up: 2Kb/s Down: 100b/s"
        );
    }

    #[test]
    fn test_peers_expire_after_window() {
        let logger = TrafficLogger::new();
        logger.on_incoming_connection("192.0.2.1");

        logger.tick_at(Instant::now() + Duration::from_secs(2));
        assert!(logger.status_line().starts_with("Connections: 0 []"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_advances_window() {
        let logger = Arc::new(TrafficLogger::new());
        logger.on_bytes_transferred(5000, 0);

        let handle = spawn_ticker(logger.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.abort();

        assert!(logger.status_line().contains("Up: 1000b/s"));
    }
}
