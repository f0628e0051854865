//! Opaque external identifiers.
//!
//! An opaque ID is `base64url("<Kind>:<raw>")`. The kind tag makes IDs of
//! different entities non-interchangeable even when the raw values match;
//! decoding an ID as the wrong kind is an error, never a silent zero.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;

use crate::types::{
    CampaignId, CampaignSpecId, ChangesetId, ChangesetSpecId, OrgId, RepoId, UserId,
};

/// Entity kinds that can be addressed externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Campaign,
    CampaignSpec,
    Changeset,
    ChangesetSpec,
    Repository,
    User,
    Org,
}

impl IdKind {
    pub const ALL: [IdKind; 7] = [
        IdKind::Campaign,
        IdKind::CampaignSpec,
        IdKind::Changeset,
        IdKind::ChangesetSpec,
        IdKind::Repository,
        IdKind::User,
        IdKind::Org,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IdKind::Campaign => "Campaign",
            IdKind::CampaignSpec => "CampaignSpec",
            IdKind::Changeset => "Changeset",
            IdKind::ChangesetSpec => "ChangesetSpec",
            IdKind::Repository => "Repository",
            IdKind::User => "User",
            IdKind::Org => "Org",
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdKind {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IdKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| IdError::UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid ID encoding")]
    Encoding,

    #[error("invalid ID: missing kind separator")]
    MissingKind,

    #[error("unknown ID kind '{0}'")]
    UnknownKind(String),

    #[error("expected a {expected} ID, got a {actual} ID")]
    WrongKind { expected: IdKind, actual: IdKind },

    #[error("invalid {kind} ID value '{raw}'")]
    InvalidValue { kind: IdKind, raw: String },
}

/// Encode a raw identifier under `kind`.
pub fn encode(kind: IdKind, raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}:{raw}", kind.as_str()))
}

/// Decode an opaque identifier into its kind and raw value.
pub fn decode(opaque: &str) -> Result<(IdKind, String), IdError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(opaque.trim())
        .map_err(|_| IdError::Encoding)?;
    let text = String::from_utf8(bytes).map_err(|_| IdError::Encoding)?;
    let (kind, raw) = text.split_once(':').ok_or(IdError::MissingKind)?;
    let kind: IdKind = kind.parse()?;
    if raw.is_empty() {
        return Err(IdError::InvalidValue {
            kind,
            raw: String::new(),
        });
    }
    Ok((kind, raw.to_string()))
}

/// A typed identifier with a fixed external kind.
pub trait OpaqueId: Sized {
    const KIND: IdKind;

    fn raw(&self) -> String;
    fn from_raw(raw: &str) -> Option<Self>;

    fn to_opaque(&self) -> String {
        encode(Self::KIND, &self.raw())
    }

    fn from_opaque(opaque: &str) -> Result<Self, IdError> {
        let (kind, raw) = decode(opaque)?;
        if kind != Self::KIND {
            return Err(IdError::WrongKind {
                expected: Self::KIND,
                actual: kind,
            });
        }
        Self::from_raw(&raw).ok_or(IdError::InvalidValue { kind, raw })
    }
}

macro_rules! numeric_opaque {
    ($ty:ty, $kind:expr) => {
        impl OpaqueId for $ty {
            const KIND: IdKind = $kind;

            fn raw(&self) -> String {
                self.0.to_string()
            }

            fn from_raw(raw: &str) -> Option<Self> {
                raw.parse::<i64>().ok().filter(|v| *v > 0).map(Self)
            }
        }
    };
}

macro_rules! random_opaque {
    ($ty:ty, $kind:expr) => {
        impl OpaqueId for $ty {
            const KIND: IdKind = $kind;

            fn raw(&self) -> String {
                self.0.clone()
            }

            fn from_raw(raw: &str) -> Option<Self> {
                Some(Self(raw.to_string()))
            }
        }
    };
}

numeric_opaque!(CampaignId, IdKind::Campaign);
numeric_opaque!(ChangesetId, IdKind::Changeset);
numeric_opaque!(RepoId, IdKind::Repository);
numeric_opaque!(UserId, IdKind::User);
numeric_opaque!(OrgId, IdKind::Org);
random_opaque!(CampaignSpecId, IdKind::CampaignSpec);
random_opaque!(ChangesetSpecId, IdKind::ChangesetSpec);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_roundtrip() {
        let id = ChangesetId(42);
        let opaque = id.to_opaque();
        assert_eq!(ChangesetId::from_opaque(&opaque), Ok(id));

        let spec = CampaignSpecId::from("3f2a");
        assert_eq!(CampaignSpecId::from_opaque(&spec.to_opaque()), Ok(spec));
    }

    #[test]
    fn same_number_different_kinds_do_not_collide() {
        let a = CampaignId(7).to_opaque();
        let b = ChangesetId(7).to_opaque();
        assert_ne!(a, b);
        assert_eq!(
            CampaignId::from_opaque(&b),
            Err(IdError::WrongKind {
                expected: IdKind::Campaign,
                actual: IdKind::Changeset,
            })
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(decode("!!!"), Err(IdError::Encoding));
        assert_eq!(decode(&URL_SAFE_NO_PAD.encode("nocolon")), Err(IdError::MissingKind));
        assert!(matches!(
            decode(&URL_SAFE_NO_PAD.encode("Action:1")),
            Err(IdError::UnknownKind(k)) if k == "Action"
        ));
        assert!(matches!(
            ChangesetId::from_opaque(&encode(IdKind::Changeset, "-3")),
            Err(IdError::InvalidValue { .. })
        ));
        assert!(matches!(
            ChangesetId::from_opaque(&encode(IdKind::Changeset, "abc")),
            Err(IdError::InvalidValue { .. })
        ));
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("changeset".parse::<IdKind>(), Ok(IdKind::Changeset));
        assert!("widget".parse::<IdKind>().is_err());
    }
}
