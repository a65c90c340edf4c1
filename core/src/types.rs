//! Domain DTOs for the Valtro API.
//!
//! # Design
//! These types mirror the backend's JSON schema but are defined independently
//! of the mock-server crate; integration tests catch schema drift. Every
//! successful response wraps its payload in an `Envelope`, which the client
//! strips before handing values to callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NameRule, ValidationError};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Backend-assigned organization identifier. Immutable once issued.
    OrganizationId
);
id_type!(
    /// Backend-assigned project identifier. Stable across API key regeneration.
    ProjectId
);

/// The backend's `{ message, data }` wrapper around every JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub message: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub organization_id: OrganizationId,
    /// Opaque ingestion secret. Replaced on regeneration.
    pub api_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An organization together with its projects, as the dashboard reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationWithProjects {
    #[serde(flatten)]
    pub organization: Organization,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl OrganizationWithProjects {
    pub fn project(&self, id: &ProjectId) -> Option<&Project> {
        self.projects.iter().find(|p| &p.id == id)
    }

    pub fn first_project(&self) -> Option<&Project> {
        self.projects.first()
    }
}

/// Whether the signed-in user has finished onboarding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnboardingStatus {
    pub has_organization: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnboardingResult {
    pub organization: Organization,
    pub project: Project,
}

/// Request payload for completing onboarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteOnboarding {
    pub organization_name: String,
    pub project_name: String,
}

/// Request payload for creating or renaming an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationName {
    pub name: String,
}

/// Partial update for an organization. Omitted fields remain unchanged on the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Request payload for creating a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProject {
    pub organization_id: OrganizationId,
    pub name: String,
}

/// Request payload for renaming a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectName {
    pub name: String,
}

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 50;

/// Trim `raw` and check it against the organization/project naming rule:
/// 2 to 50 characters drawn from ASCII letters, digits, whitespace, `-`, `_` and `.`.
pub fn validate_name(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    let reject = |rule| Err(ValidationError { field, rule });

    let len = name.chars().count();
    if len == 0 {
        return reject(NameRule::Empty);
    }
    if len < NAME_MIN {
        return reject(NameRule::TooShort);
    }
    if len > NAME_MAX {
        return reject(NameRule::TooLong);
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '_' | '.');
    if !name.chars().all(allowed) {
        return reject(NameRule::InvalidCharacters);
    }
    Ok(name.to_string())
}
