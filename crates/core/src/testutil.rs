//! Shared test utilities for the CAS core.
//!
//! Feature-gated behind `testutil`.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::logout::{LogoutHandler, LogoutRequest, LogoutRequestStatus};

/// Logout handler that records every request it receives and marks it
/// delivered.
#[derive(Debug, Default)]
pub struct RecordingLogoutHandler {
    requests: Mutex<Vec<(String, LogoutRequest)>>,
}

impl RecordingLogoutHandler {
    /// Requests received so far, paired with the ID of the session that
    /// ended.
    #[must_use]
    pub fn requests(&self) -> Vec<(String, LogoutRequest)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LogoutHandler for RecordingLogoutHandler {
    async fn handle(&self, session_id: &str, requests: &mut [LogoutRequest]) {
        let mut recorded = self.requests.lock();
        for request in requests.iter_mut() {
            request.set_status(LogoutRequestStatus::Success);
            recorded.push((session_id.to_owned(), request.clone()));
        }
    }
}
