use std::sync::Arc;

use uuid::Uuid;

use crate::backend::ChatBackend;
use crate::error::Result;
use crate::events::{ProfileEvent, Subscription};
use crate::profile::profile_models::Profile;

/// Everyone except the current user, ordered by display name with an
/// optional case-insensitive substring filter.
pub fn filter_roster(me: Uuid, mut profiles: Vec<Profile>, query: Option<&str>) -> Vec<Profile> {
    profiles.retain(|p| p.id != me);
    if let Some(query) = query {
        let needle = query.to_lowercase();
        profiles.retain(|p| p.display_name.to_lowercase().contains(&needle));
    }
    profiles.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
    });
    profiles
}

#[derive(Clone)]
pub struct RosterService {
    backend: Arc<dyn ChatBackend>,
}

impl RosterService {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub async fn roster(&self, me: Uuid, query: Option<&str>) -> Result<Vec<Profile>> {
        let profiles = self.backend.list_profiles().await?;
        Ok(filter_roster(me, profiles, query))
    }

    /// Profile change feed; any event warrants a roster refresh.
    pub fn subscribe_changes(&self) -> Subscription<ProfileEvent> {
        self.backend.subscribe_profiles()
    }
}
