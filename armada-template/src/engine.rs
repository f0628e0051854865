//! Tera rendering of changeset templates and published changeset bodies.

use tera::Tera;

use armada_core::types::{
    BranchDescription, ChangesetTemplate, CommitAuthor, GitCommitDescription, PublishIntent,
};
use armada_core::{CampaignId, OpaqueId};

use crate::context::TemplateContext;
use crate::error::TemplateError;
use crate::publish;

// ---------------------------------------------------------------------------
// Embedded templates
// ---------------------------------------------------------------------------

const BODY_FOOTER: &str = "body_footer.md";

const TPLS: &[(&str, &str)] = &[(BODY_FOOTER, include_str!("templates/body_footer.md.tera"))];

fn build_tera() -> Result<Tera, TemplateError> {
    let mut tera = Tera::default();
    tera.add_raw_templates(TPLS.iter().map(|(name, body)| (*name, *body)))?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// A changeset template expanded for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChangeset {
    pub title: String,
    pub body: String,
    /// Fully qualified head ref, e.g. `refs/heads/bump-deps`.
    pub head_ref: String,
    pub commit_message: String,
    pub author: Option<CommitAuthor>,
    pub published: PublishIntent,
}

impl RenderedChangeset {
    /// Combine with a repository checkout and its diff into a branch description.
    pub fn into_branch_description(
        self,
        base_ref: &str,
        base_rev: &str,
        diff: String,
        fallback_author: &CommitAuthor,
    ) -> BranchDescription {
        let author = self.author.unwrap_or_else(|| fallback_author.clone());
        BranchDescription {
            base_ref: qualify_ref(base_ref),
            base_rev: base_rev.to_string(),
            head_ref: self.head_ref,
            title: self.title,
            body: self.body,
            commits: vec![GitCommitDescription {
                message: self.commit_message,
                diff,
                author_name: author.name,
                author_email: author.email,
            }],
            published: self.published,
        }
    }
}

/// Tera-based renderer. Create once with [`Renderer::new`] and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, TemplateError> {
        Ok(Renderer { tera: build_tera()? })
    }

    /// Render a single template string against `ctx`.
    pub fn render_str(&self, input: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        Ok(Tera::one_off(input, &ctx.to_tera_context()?, false)?)
    }

    pub fn render_changeset(
        &self,
        template: &ChangesetTemplate,
        ctx: &TemplateContext,
    ) -> Result<RenderedChangeset, TemplateError> {
        let title = self.render_str(&template.title, ctx)?;
        if title.trim().is_empty() {
            return Err(TemplateError::Empty("title"));
        }
        let branch = self.render_str(&template.branch, ctx)?;
        if branch.trim().is_empty() {
            return Err(TemplateError::Empty("branch"));
        }
        let commit_message = self.render_str(&template.commit.message, ctx)?;
        if commit_message.trim().is_empty() {
            return Err(TemplateError::Empty("commit.message"));
        }

        Ok(RenderedChangeset {
            title: title.trim().to_string(),
            body: self.render_str(&template.body, ctx)?,
            head_ref: qualify_ref(branch.trim()),
            commit_message,
            author: template.commit.author.clone(),
            published: publish::resolve(&template.published, &ctx.repository.name),
        })
    }

    /// Body sent to the code host: the spec body plus a backlink to the campaign.
    pub fn decorate_body(
        &self,
        body: &str,
        campaign_name: &str,
        campaign_url: &str,
    ) -> Result<String, TemplateError> {
        let mut ctx = tera::Context::new();
        ctx.insert("body", body.trim_end());
        ctx.insert("campaign", &serde_json::json!({ "name": campaign_name }));
        ctx.insert("campaign_url", campaign_url);
        Ok(self.tera.render(BODY_FOOTER, &ctx)?)
    }
}

/// Link to a campaign's page, addressed by its opaque ID.
pub fn campaign_url(base_url: &str, id: CampaignId) -> String {
    format!("{}/campaigns/{}", base_url.trim_end_matches('/'), id.to_opaque())
}

/// `main` -> `refs/heads/main`; already-qualified refs pass through.
pub fn qualify_ref(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{name}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use armada_core::types::{CampaignSpecFields, CommitTemplate, PublishedRule, Repo, RepoId};

    fn ctx() -> TemplateContext {
        let repo = Repo {
            id: RepoId(1),
            name: "github.com/acme/api".into(),
            external_service_type: "github".into(),
            archived: false,
        };
        let campaign = CampaignSpecFields {
            name: "bump-deps".into(),
            description: "Keep deps fresh".into(),
            changeset_template: None,
        };
        TemplateContext::new(&repo, &campaign)
    }

    fn template() -> ChangesetTemplate {
        ChangesetTemplate {
            title: "Bump deps in {{ repository.short_name }}".into(),
            body: "{{ campaign.description }}".into(),
            branch: "campaigns/{{ campaign.name }}".into(),
            commit: CommitTemplate {
                message: "chore: bump deps".into(),
                author: None,
            },
            published: PublishedRule::PerRepository(vec![[(
                "github.com/acme/*".to_string(),
                PublishIntent::Draft,
            )]
            .into_iter()
            .collect()]),
        }
    }

    #[test]
    fn renders_per_repository_fields() {
        let renderer = Renderer::new().expect("renderer");
        let rendered = renderer
            .render_changeset(&template(), &ctx())
            .expect("render");
        assert_eq!(rendered.title, "Bump deps in api");
        assert_eq!(rendered.body, "Keep deps fresh");
        assert_eq!(rendered.head_ref, "refs/heads/campaigns/bump-deps");
        assert_eq!(rendered.published, PublishIntent::Draft);
    }

    #[test]
    fn empty_branch_is_rejected() {
        let renderer = Renderer::new().expect("renderer");
        let mut tpl = template();
        tpl.branch = "{{ '' }}".into();
        let err = renderer.render_changeset(&tpl, &ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::Empty("branch")), "got: {err}");
    }

    #[test]
    fn invalid_template_syntax_is_an_error() {
        let renderer = Renderer::new().expect("renderer");
        let mut tpl = template();
        tpl.title = "{{ unclosed".into();
        assert!(matches!(
            renderer.render_changeset(&tpl, &ctx()),
            Err(TemplateError::Tera(_))
        ));
    }

    #[test]
    fn branch_description_uses_fallback_author() {
        let renderer = Renderer::new().expect("renderer");
        let rendered = renderer
            .render_changeset(&template(), &ctx())
            .expect("render");
        let fallback = CommitAuthor {
            name: "armada".into(),
            email: "armada@example.com".into(),
        };
        let desc = rendered.into_branch_description("main", "abc123", "diff".into(), &fallback);
        assert_eq!(desc.base_ref, "refs/heads/main");
        assert_eq!(desc.commits.len(), 1);
        assert_eq!(desc.commits[0].author_email, "armada@example.com");
    }

    #[test]
    fn decorated_body_links_back_to_campaign() {
        let renderer = Renderer::new().expect("renderer");
        let body = renderer
            .decorate_body("Fixes things.\n", "bump-deps", "https://armada.example/c/Q2FtcGFpZ246MQ")
            .expect("decorate");
        assert!(body.starts_with("Fixes things.\n\n---\n\n"));
        assert!(body.contains("[bump-deps](https://armada.example/c/Q2FtcGFpZ246MQ)"));

        let bare = renderer
            .decorate_body("", "bump-deps", "u")
            .expect("decorate");
        assert!(bare.starts_with("This pull request was created by"));
    }

    #[test]
    fn campaign_url_uses_opaque_id() {
        let url = campaign_url("https://armada.example/", CampaignId(1));
        assert_eq!(
            url,
            format!("https://armada.example/campaigns/{}", CampaignId(1).to_opaque())
        );
        assert!(!url.ends_with("/1"));
    }
}
