//! Metric name and label definitions for every counter c2switch records.

/// OAuth login and token lifecycle metrics
pub mod oauth {
    /// Total number of authorization flows started
    pub const FLOWS_STARTED_TOTAL: &str = "c2switch_oauth_flows_started_total";
    /// Total number of authorization flows that produced a token set
    pub const FLOWS_COMPLETED_TOTAL: &str = "c2switch_oauth_flows_completed_total";
    /// Total number of authorization flows that failed or were cancelled
    pub const FLOWS_FAILED_TOTAL: &str = "c2switch_oauth_flows_failed_total";
    /// Requests seen by the loopback callback server
    pub const CALLBACK_REQUESTS_TOTAL: &str = "c2switch_oauth_callback_requests_total";
    /// Authorization code exchanges attempted
    pub const TOKEN_EXCHANGES_TOTAL: &str = "c2switch_oauth_token_exchanges_total";
    /// Refresh token grants attempted
    pub const TOKEN_REFRESHES_TOTAL: &str = "c2switch_oauth_token_refreshes_total";
    /// Refresh token grants that failed
    pub const TOKEN_REFRESH_ERRORS_TOTAL: &str = "c2switch_oauth_token_refresh_errors_total";
}

/// Common label keys
pub mod labels {
    /// Which completion channel won (`automatic` / `manual`)
    pub const CHANNEL: &str = "channel";
    /// Outcome of a request (`accepted`, `invalid_state`, ...)
    pub const OUTCOME: &str = "outcome";
    /// HTTP status code
    pub const STATUS: &str = "status";
}
