//! The user on whose behalf an operation runs.

use serde::{Deserialize, Serialize};

use armada_core::{
    types::{Campaign, CampaignSpec, OrgId},
    CampaignError, Namespace, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    #[serde(default)]
    pub site_admin: bool,
    /// Organizations the user is a member of.
    #[serde(default)]
    pub orgs: Vec<OrgId>,
}

impl Actor {
    pub fn user(id: i64) -> Self {
        Self {
            user_id: UserId(id),
            site_admin: false,
            orgs: Vec::new(),
        }
    }

    pub fn admin(id: i64) -> Self {
        Self {
            site_admin: true,
            ..Self::user(id)
        }
    }

    pub fn can_write_namespace(&self, namespace: Namespace) -> bool {
        self.site_admin
            || match namespace {
                Namespace::User(id) => id == self.user_id,
                Namespace::Org(id) => self.orgs.contains(&id),
            }
    }

    /// Site admins and the spec's creator may apply it.
    pub fn check_spec(&self, spec: &CampaignSpec) -> Result<(), CampaignError> {
        if self.site_admin || spec.user_id == self.user_id {
            return Ok(());
        }
        Err(CampaignError::Unauthorized(format!(
            "user {} did not create campaign spec {}",
            self.user_id, spec.id
        )))
    }

    /// Site admins, namespace owners and anyone who applied the campaign.
    pub fn check_campaign(&self, campaign: &Campaign) -> Result<(), CampaignError> {
        if self.can_write_namespace(campaign.namespace)
            || campaign.initial_applier_id == self.user_id
            || campaign.last_applier_id == self.user_id
        {
            return Ok(());
        }
        Err(CampaignError::Unauthorized(format!(
            "user {} may not administer campaign {}",
            self.user_id, campaign.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_rules() {
        let mut actor = Actor::user(1);
        assert!(actor.can_write_namespace(Namespace::User(UserId(1))));
        assert!(!actor.can_write_namespace(Namespace::User(UserId(2))));
        assert!(!actor.can_write_namespace(Namespace::Org(OrgId(9))));
        actor.orgs.push(OrgId(9));
        assert!(actor.can_write_namespace(Namespace::Org(OrgId(9))));
        assert!(Actor::admin(5).can_write_namespace(Namespace::User(UserId(2))));
    }
}
