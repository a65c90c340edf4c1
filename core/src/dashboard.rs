//! Composition root for dashboard data access.
//!
//! # Design
//! `Dashboard` pairs one `ApiClient` with one `QueryClient`. Reads go through
//! the cache under a fixed `QueryKey`; mutations call the API directly under
//! the mutation retry policy and, once they succeed, invalidate every cached
//! resource they could have changed. UI code talks to this type only.

use std::sync::Arc;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::query::{QueryClient, QueryKey, QueryOptions};
use crate::retry;
use crate::types::{
    validate_name, OnboardingResult, OnboardingStatus, Organization, OrganizationId, OrganizationPatch,
    OrganizationWithProjects, Project, ProjectId,
};

#[derive(Debug, Clone)]
pub struct Dashboard {
    api: Arc<ApiClient>,
    queries: QueryClient,
}

impl Dashboard {
    pub fn new(api: ApiClient, queries: QueryClient) -> Self {
        Self {
            api: Arc::new(api),
            queries,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    pub async fn onboarding_status(&self) -> Result<OnboardingStatus, ApiError> {
        let api = Arc::clone(&self.api);
        self.queries
            .fetch(
                QueryKey::OnboardingStatus,
                QueryOptions::new(retry::onboarding_query),
                move || {
                    let api = Arc::clone(&api);
                    async move { api.check_onboarding_status().await }
                },
            )
            .await
    }

    pub async fn organization_with_projects(&self) -> Result<OrganizationWithProjects, ApiError> {
        let api = Arc::clone(&self.api);
        self.queries
            .fetch(QueryKey::OrganizationWithProjects, QueryOptions::default(), move || {
                let api = Arc::clone(&api);
                async move { api.get_organization_with_projects().await }
            })
            .await
    }

    pub async fn organizations(&self) -> Result<Vec<Organization>, ApiError> {
        let api = Arc::clone(&self.api);
        self.queries
            .fetch(QueryKey::Organizations, QueryOptions::default(), move || {
                let api = Arc::clone(&api);
                async move { api.list_organizations().await }
            })
            .await
    }

    pub async fn organization(&self, id: &OrganizationId) -> Result<Organization, ApiError> {
        let api = Arc::clone(&self.api);
        let id = id.clone();
        self.queries
            .fetch(QueryKey::Organization(id.clone()), QueryOptions::default(), move || {
                let api = Arc::clone(&api);
                let id = id.clone();
                async move { api.get_organization(&id).await }
            })
            .await
    }

    pub async fn projects(&self, organization_id: &OrganizationId) -> Result<Vec<Project>, ApiError> {
        let api = Arc::clone(&self.api);
        let id = organization_id.clone();
        self.queries
            .fetch(QueryKey::Projects(id.clone()), QueryOptions::default(), move || {
                let api = Arc::clone(&api);
                let id = id.clone();
                async move { api.list_projects(&id).await }
            })
            .await
    }

    pub async fn complete_onboarding(
        &self,
        organization_name: &str,
        project_name: &str,
    ) -> Result<OnboardingResult, ApiError> {
        let organization_name = validate_name("organization_name", organization_name)?;
        let project_name = validate_name("project_name", project_name)?;
        let invalidates = [
            QueryKey::OnboardingStatus,
            QueryKey::OrganizationWithProjects,
            QueryKey::Organizations,
        ];
        self.queries
            .mutate(&invalidates, || self.api.complete_onboarding(&organization_name, &project_name))
            .await
    }

    pub async fn create_organization(&self, name: &str) -> Result<Organization, ApiError> {
        let name = validate_name("name", name)?;
        let invalidates = [
            QueryKey::OrganizationWithProjects,
            QueryKey::Organizations,
            QueryKey::OnboardingStatus,
        ];
        self.queries
            .mutate(&invalidates, || self.api.create_organization(&name))
            .await
    }

    pub async fn update_organization(&self, id: &OrganizationId, name: &str) -> Result<Organization, ApiError> {
        let name = validate_name("name", name)?;
        self.queries
            .mutate(&organization_keys(id), || self.api.update_organization(id, &name))
            .await
    }

    pub async fn patch_organization(
        &self,
        id: &OrganizationId,
        patch: &OrganizationPatch,
    ) -> Result<Organization, ApiError> {
        let patch = OrganizationPatch {
            name: patch.name.as_deref().map(|n| validate_name("name", n)).transpose()?,
        };
        self.queries
            .mutate(&organization_keys(id), || self.api.patch_organization(id, &patch))
            .await
    }

    pub async fn delete_organization(&self, id: &OrganizationId) -> Result<(), ApiError> {
        let mut invalidates = organization_keys(id).to_vec();
        invalidates.push(QueryKey::Projects(id.clone()));
        invalidates.push(QueryKey::OnboardingStatus);
        self.queries
            .mutate(&invalidates, || self.api.delete_organization(id))
            .await
    }

    pub async fn create_project(&self, organization_id: &OrganizationId, name: &str) -> Result<Project, ApiError> {
        let name = validate_name("name", name)?;
        self.queries
            .mutate(&project_keys(organization_id), || {
                self.api.create_project(organization_id, &name)
            })
            .await
    }

    pub async fn regenerate_api_key(
        &self,
        project_id: &ProjectId,
        organization_id: &OrganizationId,
    ) -> Result<Project, ApiError> {
        self.queries
            .mutate(&project_keys(organization_id), || {
                self.api.regenerate_api_key(project_id, organization_id)
            })
            .await
    }

    pub async fn update_project(
        &self,
        project_id: &ProjectId,
        organization_id: &OrganizationId,
        name: &str,
    ) -> Result<Project, ApiError> {
        let name = validate_name("name", name)?;
        self.queries
            .mutate(&project_keys(organization_id), || {
                self.api.update_project(project_id, organization_id, &name)
            })
            .await
    }

    pub async fn delete_project(
        &self,
        project_id: &ProjectId,
        organization_id: &OrganizationId,
    ) -> Result<(), ApiError> {
        self.queries
            .mutate(&project_keys(organization_id), || {
                self.api.delete_project(project_id, organization_id)
            })
            .await
    }
}

fn organization_keys(id: &OrganizationId) -> [QueryKey; 3] {
    [
        QueryKey::OrganizationWithProjects,
        QueryKey::Organizations,
        QueryKey::Organization(id.clone()),
    ]
}

fn project_keys(organization_id: &OrganizationId) -> [QueryKey; 2] {
    [
        QueryKey::OrganizationWithProjects,
        QueryKey::Projects(organization_id.clone()),
    ]
}
