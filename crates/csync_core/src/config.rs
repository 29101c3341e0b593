//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Switch file databases to write-ahead logging.
    pub wal_mode: bool,

    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,

    /// Open a dedicated read-only connection for snapshot reads.
    ///
    /// Ignored for in-memory databases, which share the writer.
    pub reader_connection: bool,

    /// Number of store events kept for polling.
    pub feed_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wal_mode: true,
            busy_timeout: Duration::from_secs(5),
            reader_connection: true,
            feed_history: 1024,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to use write-ahead logging.
    #[must_use]
    pub const fn wal_mode(mut self, value: bool) -> Self {
        self.wal_mode = value;
        self
    }

    /// Sets the busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether to open a separate reader connection.
    #[must_use]
    pub const fn reader_connection(mut self, value: bool) -> Self {
        self.reader_connection = value;
        self
    }

    /// Sets the event history size.
    #[must_use]
    pub const fn feed_history(mut self, events: usize) -> Self {
        self.feed_history = events;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.wal_mode);
        assert!(config.reader_connection);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .wal_mode(false)
            .reader_connection(false)
            .busy_timeout(Duration::from_millis(250))
            .feed_history(8);

        assert!(!config.wal_mode);
        assert!(!config.reader_connection);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.feed_history, 8);
    }
}
