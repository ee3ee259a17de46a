pub mod poll {
    /// First wait between two status checks.
    pub const INITIAL_POLL_INTERVAL_MS: u64 = 1000;
    /// The backoff stops doubling once it reaches this ceiling (60x the initial interval).
    pub const MAX_POLL_INTERVAL_MS: u64 = INITIAL_POLL_INTERVAL_MS * 60;
}

pub mod cli {
    /// Output base name meaning "write to standard output".
    pub const STDOUT_SENTINEL: &str = "-";
    /// Sequence argument meaning "read from standard input".
    pub const STDIN_SENTINEL: &str = "-";
    /// Title sent with a job when the user gives none.
    pub const DEFAULT_TITLE: &str = "My EBI job";

    // Progress events are dropped rather than blocking the poll loop once this many are queued.
    pub const EVENT_QUEUE_SIZE: usize = 100;

    pub const EXIT_USAGE: u8 = 1;
    pub const EXIT_RUNTIME: u8 = 2;
}

pub mod http {
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;

    pub fn user_agent() -> String {
        format!(
            "ebi-client/{} ({}; {})",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        )
    }
}
