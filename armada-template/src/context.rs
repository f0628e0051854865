//! Template context: the values a changeset template may reference.

use serde::{Deserialize, Serialize};

use armada_core::types::{CampaignSpecFields, Repo};

use crate::error::TemplateError;

/// Rendering payload, exposed to templates as `repository.*` and `campaign.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    pub repository: RepositoryCtx,
    pub campaign: CampaignCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryCtx {
    /// Full name, e.g. `github.com/acme/api`.
    pub name: String,
    /// Last path segment, e.g. `api`.
    pub short_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignCtx {
    pub name: String,
    pub description: String,
}

impl TemplateContext {
    pub fn new(repo: &Repo, campaign: &CampaignSpecFields) -> Self {
        let short_name = repo
            .name
            .rsplit('/')
            .next()
            .unwrap_or(repo.name.as_str())
            .to_string();
        Self {
            repository: RepositoryCtx {
                name: repo.name.clone(),
                short_name,
            },
            campaign: CampaignCtx {
                name: campaign.name.clone(),
                description: campaign.description.clone(),
            },
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, TemplateError> {
        Ok(tera::Context::from_value(serde_json::to_value(self)?)?)
    }
}
