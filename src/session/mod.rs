// ABOUTME: Sender-side transfer sessions keyed by one-time connection codes
// ABOUTME: Defines session, receiver, and code types; the registry lives in registry.rs

pub mod registry;

pub use registry::{SessionOwner, SessionRegistry};

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Code alphabet: uppercase letters and digits without `0`, `O`, `1`, `I`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const CODE_LENGTH: usize = 8;

/// Generate a connection code from the OS CSPRNG.
pub fn generate_code() -> String {
    let mut rng = OsRng;
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Cheap shape check done before any registry lookup.
pub fn is_well_formed_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Receive => f.write_str("receive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no receiver attached yet
    Pending,
    /// At least one receiver has attached
    Connected,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Connected => "connected",
            SessionStatus::Closed => "closed",
        }
    }
}

/// What a receiver declares about itself when connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverIdentity {
    pub name: String,
    pub email: String,
    pub project: String,
    pub site_url: String,
}

/// An attached receiver, as recorded for display and audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverInfo {
    pub id: String,
    #[serde(flatten)]
    pub identity: ReceiverIdentity,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub attached_at: DateTime<Utc>,
}

impl ReceiverInfo {
    pub fn new(identity: ReceiverIdentity, ip: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            identity,
            ip,
            user_agent,
            attached_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub code: String,
    pub direction: Direction,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub receivers: Vec<ReceiverInfo>,
}

impl Session {
    fn new(code: String, direction: Direction) -> Self {
        Self {
            code,
            direction,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            receivers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_shape() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(is_well_formed_code(&code), "{code}");
            assert!(!code.contains(['0', 'O', '1', 'I']));
        }
    }

    #[test]
    fn test_well_formed_code_is_case_sensitive() {
        assert!(is_well_formed_code("ABCD2345"));
        assert!(!is_well_formed_code("abcd2345"));
        assert!(!is_well_formed_code("ABCD234"));
        assert!(!is_well_formed_code("ABCD0345"));
    }

    #[test]
    fn test_receiver_info_serializes_flat() {
        let info = ReceiverInfo::new(
            ReceiverIdentity {
                name: "Dev".to_string(),
                email: "dev@example.com".to_string(),
                project: "mirror".to_string(),
                site_url: "http://localhost:4000".to_string(),
            },
            Some("127.0.0.1".to_string()),
            None,
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["email"], "dev@example.com");
        assert_eq!(json["ip"], "127.0.0.1");
        assert!(json["user_agent"].is_null());
    }
}
