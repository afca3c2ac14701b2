use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest username carried by a status message, in bytes.
///
/// Both wire formats reserve a NUL-terminated buffer, so one byte of the
/// smallest buffer (64) is lost to the terminator.
pub const MAX_USERNAME_LEN: usize = 63;

/// Recognition progress as reported by the recognizer process.
///
/// The numeric codes are part of both wire formats and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionStatus {
    Idle,
    Recognizing,
    FaceDetected,
    Success,
    Failed,
    Timeout,
    Error,
    ProcessEnded,
}

impl RecognitionStatus {
    pub const ALL: [RecognitionStatus; 8] = [
        RecognitionStatus::Idle,
        RecognitionStatus::Recognizing,
        RecognitionStatus::FaceDetected,
        RecognitionStatus::Success,
        RecognitionStatus::Failed,
        RecognitionStatus::Timeout,
        RecognitionStatus::Error,
        RecognitionStatus::ProcessEnded,
    ];

    /// Wire code of this status.
    pub fn code(self) -> i32 {
        match self {
            RecognitionStatus::Idle => 0,
            RecognitionStatus::Recognizing => 1,
            RecognitionStatus::Success => 2,
            RecognitionStatus::Failed => 3,
            RecognitionStatus::Timeout => 4,
            RecognitionStatus::Error => 5,
            RecognitionStatus::FaceDetected => 6,
            RecognitionStatus::ProcessEnded => 7,
        }
    }

    /// Decode a wire code. Unknown codes yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Whether an attempt is over once this status is observed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecognitionStatus::Success
                | RecognitionStatus::Failed
                | RecognitionStatus::Timeout
                | RecognitionStatus::Error
                | RecognitionStatus::ProcessEnded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecognitionStatus::Idle => "idle",
            RecognitionStatus::Recognizing => "recognizing",
            RecognitionStatus::FaceDetected => "face_detected",
            RecognitionStatus::Success => "success",
            RecognitionStatus::Failed => "failed",
            RecognitionStatus::Timeout => "timeout",
            RecognitionStatus::Error => "error",
            RecognitionStatus::ProcessEnded => "process_ended",
        }
    }
}

impl fmt::Display for RecognitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status update travelling from the recognizer to the logon side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: RecognitionStatus,
    username: Option<String>,
    /// Milliseconds since the Unix epoch, stamped by the sender.
    pub timestamp_ms: u64,
}

impl StatusMessage {
    /// A message stamped with the current wall-clock time.
    pub fn new(status: RecognitionStatus) -> Self {
        Self {
            status,
            username: None,
            timestamp_ms: now_millis(),
        }
    }

    /// A message with an explicit timestamp, as decoded from the wire.
    pub fn at(status: RecognitionStatus, username: Option<&str>, timestamp_ms: u64) -> Self {
        Self {
            status,
            username: None,
            timestamp_ms,
        }
        .with_username(username.unwrap_or_default())
    }

    /// Attach a username, truncated to [`MAX_USERNAME_LEN`] bytes.
    /// An empty name clears it.
    pub fn with_username(mut self, username: &str) -> Self {
        let bounded = bound_username(username);
        self.username = if bounded.is_empty() {
            None
        } else {
            Some(bounded.to_string())
        };
        self
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Cut a username at the first NUL and at [`MAX_USERNAME_LEN`] bytes,
/// never splitting a UTF-8 sequence.
pub fn bound_username(username: &str) -> &str {
    let name = username.split('\0').next().unwrap_or_default();
    if name.len() <= MAX_USERNAME_LEN {
        return name;
    }
    let mut end = MAX_USERNAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
