use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub organization_id: Uuid,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `vk_` followed by 32 lowercase hex characters.
pub fn new_api_key() -> String {
    format!("vk_{}", Uuid::new_v4().simple())
}

/// In-memory records, kept in creation order.
#[derive(Debug, Default)]
pub struct Db {
    pub organizations: Vec<Organization>,
    pub projects: Vec<Project>,
}

impl Db {
    pub fn owned_organization(&self, owner: &str, id: Uuid) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.id == id && o.owner_id == owner)
    }

    pub fn first_owned_organization(&self, owner: &str) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.owner_id == owner)
    }

    pub fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.organizations
            .iter()
            .any(|o| Some(o.id) != except && o.name.eq_ignore_ascii_case(name))
    }

    pub fn projects_of(&self, organization_id: Uuid) -> Vec<Project> {
        self.projects
            .iter()
            .filter(|p| p.organization_id == organization_id)
            .cloned()
            .collect()
    }

    pub fn insert_organization(&mut self, owner: &str, name: &str) -> Organization {
        let now = Utc::now();
        let organization = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner_id: owner.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.organizations.push(organization.clone());
        organization
    }

    pub fn insert_project(&mut self, organization_id: Uuid, name: &str) -> Project {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            organization_id,
            api_key: new_api_key(),
            created_at: now,
            updated_at: now,
        };
        self.projects.push(project.clone());
        project
    }
}

#[derive(Debug, Default)]
struct Faults {
    status: u16,
    remaining: usize,
}

/// Shared state of one mock backend instance. Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct MockBackend {
    pub(crate) db: Arc<RwLock<Db>>,
    faults: Arc<RwLock<Faults>>,
    requests: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `times` API requests with `status` before any routing.
    pub async fn fail_next(&self, status: u16, times: usize) {
        let mut faults = self.faults.write().await;
        faults.status = status;
        faults.remaining = times;
    }

    /// Number of API requests received, injected failures included.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub async fn organization_count(&self) -> usize {
        self.db.read().await.organizations.len()
    }

    pub async fn project_count(&self) -> usize {
        self.db.read().await.projects.len()
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    /// Consume one pending fault, if any.
    pub(crate) async fn take_fault(&self) -> Option<u16> {
        let mut faults = self.faults.write().await;
        if faults.remaining == 0 {
            return None;
        }
        faults.remaining -= 1;
        Some(faults.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_format() {
        let key = new_api_key();
        assert!(key.starts_with("vk_"));
        assert_eq!(key.len(), 35);
        assert!(key[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn organization_serializes_with_string_ids() {
        let mut db = Db::default();
        let org = db.insert_organization("u1", "Acme");
        let json = serde_json::to_value(&org).unwrap();
        assert_eq!(json["id"], org.id.to_string());
        assert_eq!(json["owner_id"], "u1");
        assert!(json["created_at"].is_string());
    }

    #[test]
    fn name_conflicts_ignore_case_and_self() {
        let mut db = Db::default();
        let org = db.insert_organization("u1", "Acme");
        assert!(db.name_taken("ACME", None));
        assert!(!db.name_taken("acme", Some(org.id)));
        assert!(!db.name_taken("Globex", None));
    }

    #[test]
    fn ownership_is_checked() {
        let mut db = Db::default();
        let org = db.insert_organization("u1", "Acme");
        assert!(db.owned_organization("u1", org.id).is_some());
        assert!(db.owned_organization("u2", org.id).is_none());
    }

    #[tokio::test]
    async fn faults_are_consumed() {
        let backend = MockBackend::new();
        backend.fail_next(503, 2).await;
        assert_eq!(backend.take_fault().await, Some(503));
        assert_eq!(backend.take_fault().await, Some(503));
        assert_eq!(backend.take_fault().await, None);
    }
}
