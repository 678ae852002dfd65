use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

pub const DISPLAY_NAME_MIN_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

/// A user's identity record. Created at sign-up, mutated only through
/// presence transitions, never deleted by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub presence: Presence,
    pub last_active: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: Uuid, display_name: &str) -> Result<Self> {
        validate_display_name(display_name)?;
        Ok(Self {
            id,
            display_name: display_name.to_string(),
            avatar_url: None,
            presence: Presence::Offline,
            last_active: Utc::now(),
        })
    }

    pub fn is_online(&self) -> bool {
        self.presence == Presence::Online
    }
}

pub fn validate_display_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.len() < DISPLAY_NAME_MIN_LEN {
        return Err(AppError::Validation(format!(
            "Display name must be at least {} characters",
            DISPLAY_NAME_MIN_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_display_names() {
        assert!(Profile::new(Uuid::new_v4(), "al").is_err());
        assert!(Profile::new(Uuid::new_v4(), "  a  ").is_err());
        assert!(Profile::new(Uuid::new_v4(), "").is_err());
    }

    #[test]
    fn accepts_minimum_length_name() {
        let profile = Profile::new(Uuid::new_v4(), "ali").unwrap();
        assert_eq!(profile.display_name, "ali");
        assert_eq!(profile.presence, Presence::Offline);
        assert!(profile.avatar_url.is_none());
    }
}
