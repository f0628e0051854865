//! Changeset template rendering for armada.
//!
//! A campaign spec carries one [`ChangesetTemplate`](armada_core::types::ChangesetTemplate);
//! [`Renderer`] expands it per repository into a branch description, and
//! [`publish::resolve`] picks the publication intent for that repository.

pub mod context;
pub mod engine;
pub mod error;
pub mod publish;

pub use context::TemplateContext;
pub use engine::{campaign_url, qualify_ref, RenderedChangeset, Renderer};
pub use error::TemplateError;
