//! Authenticated request builder, executor and envelope parser for the Valtro API.
//!
//! # Design
//! `ApiClient` holds only read-only state: its configuration, a token
//! provider and a transport. Each operation is split into a `build_*` method
//! that produces an `HttpRequest` for a given token and a `parse_*` method
//! that consumes an `HttpResponse`; both halves are pure. The async operation
//! methods stitch them together: acquire a token, build, execute under the
//! configured timeout, parse.
//!
//! Parsing is uniform across operations: a non-2xx status becomes
//! `ApiError::Http`, a 2xx without a JSON content type becomes
//! `ApiError::InvalidResponseFormat`, and otherwise the `{ message, data }`
//! envelope is stripped and `data` returned.

use std::sync::Arc;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::config::{ClientConfig, UserIdHeader};
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::transport::Transport;
use crate::types::{
    CompleteOnboarding, CreateProject, Envelope, OnboardingResult, OnboardingStatus, Organization,
    OrganizationId, OrganizationName, OrganizationPatch, OrganizationWithProjects, Project,
    ProjectId, ProjectName,
};

pub const ORGANIZATION_HEADER: &str = "X-Organization-ID";
pub const USER_ID_HEADER: &str = "X-User-ID";

/// Client for the Valtro backend.
#[derive(Clone)]
pub struct ApiClient {
    config: ClientConfig,
    tokens: Arc<dyn TokenProvider>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let config = ClientConfig {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ..config
        };
        Self {
            config,
            tokens,
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn check_onboarding_status(&self) -> Result<OnboardingStatus, ApiError> {
        let token = self.token().await?;
        let response = self.send(self.build_check_onboarding_status(&token)).await?;
        self.parse_check_onboarding_status(response)
    }

    pub async fn complete_onboarding(
        &self,
        organization_name: &str,
        project_name: &str,
    ) -> Result<OnboardingResult, ApiError> {
        let token = self.token().await?;
        let request = self.build_complete_onboarding(&token, organization_name, project_name)?;
        self.parse_complete_onboarding(self.send(request).await?)
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>, ApiError> {
        let token = self.token().await?;
        let response = self.send(self.build_list_organizations(&token)).await?;
        self.parse_list_organizations(response)
    }

    pub async fn get_organization_with_projects(&self) -> Result<OrganizationWithProjects, ApiError> {
        let token = self.token().await?;
        let response = self.send(self.build_get_organization_with_projects(&token)).await?;
        self.parse_get_organization_with_projects(response)
    }

    pub async fn create_organization(&self, name: &str) -> Result<Organization, ApiError> {
        let token = self.token().await?;
        let request = self.build_create_organization(&token, name)?;
        self.parse_organization(self.send(request).await?)
    }

    pub async fn get_organization(&self, id: &OrganizationId) -> Result<Organization, ApiError> {
        let token = self.token().await?;
        let response = self.send(self.build_get_organization(&token, id)).await?;
        self.parse_organization(response)
    }

    pub async fn update_organization(
        &self,
        id: &OrganizationId,
        name: &str,
    ) -> Result<Organization, ApiError> {
        let token = self.token().await?;
        let request = self.build_update_organization(&token, id, name)?;
        self.parse_organization(self.send(request).await?)
    }

    pub async fn patch_organization(
        &self,
        id: &OrganizationId,
        patch: &OrganizationPatch,
    ) -> Result<Organization, ApiError> {
        let token = self.token().await?;
        let request = self.build_patch_organization(&token, id, patch)?;
        self.parse_organization(self.send(request).await?)
    }

    pub async fn delete_organization(&self, id: &OrganizationId) -> Result<(), ApiError> {
        let token = self.token().await?;
        let response = self.send(self.build_delete_organization(&token, id)).await?;
        self.parse_empty(response)
    }

    pub async fn create_project(
        &self,
        organization_id: &OrganizationId,
        name: &str,
    ) -> Result<Project, ApiError> {
        let token = self.token().await?;
        let request = self.build_create_project(&token, organization_id, name)?;
        self.parse_project(self.send(request).await?)
    }

    pub async fn list_projects(&self, organization_id: &OrganizationId) -> Result<Vec<Project>, ApiError> {
        let token = self.token().await?;
        let response = self.send(self.build_list_projects(&token, organization_id)).await?;
        self.parse_list_projects(response)
    }

    /// Issue a new API key for a project. The old key stops working; the project id is unchanged.
    pub async fn regenerate_api_key(
        &self,
        project_id: &ProjectId,
        organization_id: &OrganizationId,
    ) -> Result<Project, ApiError> {
        let token = self.token().await?;
        let request = self.build_regenerate_api_key(&token, project_id, organization_id);
        self.parse_project(self.send(request).await?)
    }

    pub async fn update_project(
        &self,
        project_id: &ProjectId,
        organization_id: &OrganizationId,
        name: &str,
    ) -> Result<Project, ApiError> {
        let token = self.token().await?;
        let request = self.build_update_project(&token, project_id, organization_id, name)?;
        self.parse_project(self.send(request).await?)
    }

    pub async fn delete_project(
        &self,
        project_id: &ProjectId,
        organization_id: &OrganizationId,
    ) -> Result<(), ApiError> {
        let token = self.token().await?;
        let request = self.build_delete_project(&token, project_id, organization_id);
        self.parse_empty(self.send(request).await?)
    }

    async fn token(&self) -> Result<String, ApiError> {
        match self.tokens.token().await {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                debug!("no authentication token available");
                Err(ApiError::Unauthorized)
            }
        }
    }

    /// Execute `request`, dropping it if the configured timeout elapses first.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let method = request.method;
        let url = request.url.clone();
        debug!(%method, %url, "sending request");

        let result = match tokio::time::timeout(self.config.timeout, self.transport.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        };
        if let Err(err) = &result {
            warn!(%method, %url, error = %err, "request failed");
        }
        result
    }

    pub fn build_check_onboarding_status(&self, token: &str) -> HttpRequest {
        self.request(HttpMethod::Get, "/api/v1/organizations/check", token)
    }

    pub fn build_complete_onboarding(
        &self,
        token: &str,
        organization_name: &str,
        project_name: &str,
    ) -> Result<HttpRequest, ApiError> {
        let payload = CompleteOnboarding {
            organization_name: organization_name.to_string(),
            project_name: project_name.to_string(),
        };
        self.request_with_body(HttpMethod::Post, "/api/v1/onboarding", token, &payload)
    }

    pub fn build_list_organizations(&self, token: &str) -> HttpRequest {
        self.request(HttpMethod::Get, "/api/v1/organizations", token)
    }

    pub fn build_get_organization_with_projects(&self, token: &str) -> HttpRequest {
        self.request(HttpMethod::Get, "/api/v1/organizations/with-projects", token)
    }

    pub fn build_create_organization(&self, token: &str, name: &str) -> Result<HttpRequest, ApiError> {
        let payload = OrganizationName { name: name.to_string() };
        self.request_with_body(HttpMethod::Post, "/api/v1/organizations", token, &payload)
    }

    pub fn build_get_organization(&self, token: &str, id: &OrganizationId) -> HttpRequest {
        self.request(HttpMethod::Get, &format!("/api/v1/organizations/{id}"), token)
    }

    pub fn build_update_organization(
        &self,
        token: &str,
        id: &OrganizationId,
        name: &str,
    ) -> Result<HttpRequest, ApiError> {
        let payload = OrganizationName { name: name.to_string() };
        self.request_with_body(HttpMethod::Put, &format!("/api/v1/organizations/{id}"), token, &payload)
    }

    pub fn build_patch_organization(
        &self,
        token: &str,
        id: &OrganizationId,
        patch: &OrganizationPatch,
    ) -> Result<HttpRequest, ApiError> {
        self.request_with_body(HttpMethod::Patch, &format!("/api/v1/organizations/{id}"), token, patch)
    }

    pub fn build_delete_organization(&self, token: &str, id: &OrganizationId) -> HttpRequest {
        self.request(HttpMethod::Delete, &format!("/api/v1/organizations/{id}"), token)
    }

    pub fn build_create_project(
        &self,
        token: &str,
        organization_id: &OrganizationId,
        name: &str,
    ) -> Result<HttpRequest, ApiError> {
        let payload = CreateProject {
            organization_id: organization_id.clone(),
            name: name.to_string(),
        };
        self.request_with_body(HttpMethod::Post, "/api/v1/projects", token, &payload)
    }

    pub fn build_list_projects(&self, token: &str, organization_id: &OrganizationId) -> HttpRequest {
        self.request(
            HttpMethod::Get,
            &format!("/api/v1/projects/organization/{organization_id}"),
            token,
        )
    }

    pub fn build_regenerate_api_key(
        &self,
        token: &str,
        project_id: &ProjectId,
        organization_id: &OrganizationId,
    ) -> HttpRequest {
        let path = format!("/api/v1/projects/{project_id}/regenerate-api-key");
        with_organization(self.request(HttpMethod::Post, &path, token), organization_id)
    }

    pub fn build_update_project(
        &self,
        token: &str,
        project_id: &ProjectId,
        organization_id: &OrganizationId,
        name: &str,
    ) -> Result<HttpRequest, ApiError> {
        let payload = ProjectName { name: name.to_string() };
        let path = format!("/api/v1/projects/{project_id}");
        let request = self.request_with_body(HttpMethod::Put, &path, token, &payload)?;
        Ok(with_organization(request, organization_id))
    }

    pub fn build_delete_project(
        &self,
        token: &str,
        project_id: &ProjectId,
        organization_id: &OrganizationId,
    ) -> HttpRequest {
        let path = format!("/api/v1/projects/{project_id}");
        with_organization(self.request(HttpMethod::Delete, &path, token), organization_id)
    }

    fn request(&self, method: HttpMethod, path: &str, token: &str) -> HttpRequest {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {token}")),
        ];
        if self.config.user_id_header == UserIdHeader::ForwardToken {
            headers.push((USER_ID_HEADER.to_string(), token.to_string()));
        }
        HttpRequest {
            method,
            url: format!("{}{path}", self.config.base_url),
            headers,
            body: None,
        }
    }

    fn request_with_body<B: Serialize>(
        &self,
        method: HttpMethod,
        path: &str,
        token: &str,
        payload: &B,
    ) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_string(payload).map_err(|e| ApiError::Serialization(e.to_string()))?;
        let mut request = self.request(method, path, token);
        request.body = Some(body);
        Ok(request)
    }

    pub fn parse_check_onboarding_status(&self, response: HttpResponse) -> Result<OnboardingStatus, ApiError> {
        unwrap_envelope(response)
    }

    pub fn parse_complete_onboarding(&self, response: HttpResponse) -> Result<OnboardingResult, ApiError> {
        unwrap_envelope(response)
    }

    pub fn parse_list_organizations(&self, response: HttpResponse) -> Result<Vec<Organization>, ApiError> {
        unwrap_envelope(response)
    }

    pub fn parse_get_organization_with_projects(
        &self,
        response: HttpResponse,
    ) -> Result<OrganizationWithProjects, ApiError> {
        unwrap_envelope(response)
    }

    /// Parser shared by every operation that answers with a single organization.
    pub fn parse_organization(&self, response: HttpResponse) -> Result<Organization, ApiError> {
        unwrap_envelope(response)
    }

    /// Parser shared by every operation that answers with a single project.
    pub fn parse_project(&self, response: HttpResponse) -> Result<Project, ApiError> {
        unwrap_envelope(response)
    }

    pub fn parse_list_projects(&self, response: HttpResponse) -> Result<Vec<Project>, ApiError> {
        unwrap_envelope(response)
    }

    /// Parser for operations without a payload. `204 No Content` is accepted as is.
    pub fn parse_empty(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response)?;
        if response.status == 204 && response.body.trim().is_empty() {
            return Ok(());
        }
        unwrap_envelope::<IgnoredAny>(response).map(|_| ())
    }
}

fn with_organization(mut request: HttpRequest, organization_id: &OrganizationId) -> HttpRequest {
    request
        .headers
        .push((ORGANIZATION_HEADER.to_string(), organization_id.to_string()));
    request
}

/// Map non-2xx status codes to `ApiError::Http`, carrying the raw body.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if response.is_success() {
        return Ok(());
    }
    Err(ApiError::Http {
        status: response.status,
        status_text: response.status_text.clone(),
        body: response.body.clone(),
    })
}

fn unwrap_envelope<T: DeserializeOwned>(response: HttpResponse) -> Result<T, ApiError> {
    check_status(&response)?;
    if !response.is_json() {
        return Err(ApiError::InvalidResponseFormat {
            status: response.status,
            status_text: response.status_text,
        });
    }
    let envelope: Envelope<T> = serde_json::from_str(&response.body).map_err(|e| ApiError::Deserialization {
        status: response.status,
        message: e.to_string(),
    })?;
    Ok(envelope.data)
}
