use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::BackendError;
use crate::state::{new_api_key, Db, MockBackend, Organization, Project};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

type ApiResult = Result<Response, BackendError>;

#[derive(Serialize)]
struct Envelope<'a, T> {
    message: &'a str,
    data: T,
}

fn respond<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (status, Json(Envelope { message, data })).into_response()
}

#[derive(Deserialize)]
pub struct OnboardingInput {
    #[serde(default)]
    pub organization_name: String,
    #[serde(default)]
    pub project_name: String,
}

#[derive(Deserialize)]
pub struct NameInput {
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize)]
pub struct PatchOrganizationInput {
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateProjectInput {
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize)]
struct OrganizationWithProjects {
    #[serde(flatten)]
    organization: Organization,
    projects: Vec<Project>,
}

/// Counts every API request and answers with a pending injected fault, if any.
pub async fn inject_faults(State(backend): State<MockBackend>, request: Request, next: Next) -> Response {
    backend.record_request();
    if let Some(status) = backend.take_fault().await {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return BackendError::Injected(status).into_response();
    }
    next.run(request).await
}

/// Caller identity: `X-User-ID` when present, otherwise the bearer token.
fn caller(headers: &HeaderMap) -> Result<String, BackendError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(BackendError::Unauthorized)?;
    let user = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(token);
    Ok(user.to_string())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, BackendError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| BackendError::BadRequest(rejection.body_text()))
}

fn required(field: &str, raw: &str) -> Result<String, BackendError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(BackendError::BadRequest(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn parse_id(raw: &str, what: &'static str) -> Result<Uuid, BackendError> {
    Uuid::parse_str(raw).map_err(|_| BackendError::NotFound(what))
}

fn organization_index(db: &Db, caller: &str, raw_id: &str) -> Result<usize, BackendError> {
    let id = parse_id(raw_id, "organization")?;
    db.organizations
        .iter()
        .position(|o| o.id == id && o.owner_id == caller)
        .ok_or(BackendError::NotFound("organization"))
}

/// Project routes require `X-Organization-ID` naming the project's organization.
fn project_index(db: &Db, caller: &str, headers: &HeaderMap, raw_id: &str) -> Result<usize, BackendError> {
    let raw_org = headers
        .get(ORGANIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BackendError::BadRequest("X-Organization-ID header is required".to_string()))?;
    let organization_id = parse_id(raw_org, "project")?;
    let id = parse_id(raw_id, "project")?;
    db.owned_organization(caller, organization_id)
        .ok_or(BackendError::NotFound("project"))?;
    db.projects
        .iter()
        .position(|p| p.id == id && p.organization_id == organization_id)
        .ok_or(BackendError::NotFound("project"))
}

fn ensure_name_free(db: &Db, name: &str, except: Option<Uuid>) -> Result<(), BackendError> {
    if db.name_taken(name, except) {
        return Err(BackendError::Conflict(format!("organization named {name:?} already exists")));
    }
    Ok(())
}

pub async fn check_onboarding(State(backend): State<MockBackend>, headers: HeaderMap) -> ApiResult {
    let caller = caller(&headers)?;
    let db = backend.db.read().await;
    let has_organization = db.first_owned_organization(&caller).is_some();
    Ok(respond(StatusCode::OK, "ok", json!({ "has_organization": has_organization })))
}

pub async fn complete_onboarding(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    payload: Result<Json<OnboardingInput>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let input = body(payload)?;
    let organization_name = required("organization_name", &input.organization_name)?;
    let project_name = required("project_name", &input.project_name)?;

    let mut db = backend.db.write().await;
    if db.first_owned_organization(&caller).is_some() {
        return Err(BackendError::Conflict("onboarding already completed".to_string()));
    }
    ensure_name_free(&db, &organization_name, None)?;
    let organization = db.insert_organization(&caller, &organization_name);
    let project = db.insert_project(organization.id, &project_name);
    tracing::info!(organization_id = %organization.id, project_id = %project.id, "onboarding completed");
    Ok(respond(
        StatusCode::CREATED,
        "onboarding completed",
        json!({ "organization": organization, "project": project }),
    ))
}

pub async fn list_organizations(State(backend): State<MockBackend>, headers: HeaderMap) -> ApiResult {
    let caller = caller(&headers)?;
    let db = backend.db.read().await;
    let organizations: Vec<&Organization> = db.organizations.iter().filter(|o| o.owner_id == caller).collect();
    Ok(respond(StatusCode::OK, "ok", organizations))
}

pub async fn organization_with_projects(State(backend): State<MockBackend>, headers: HeaderMap) -> ApiResult {
    let caller = caller(&headers)?;
    let db = backend.db.read().await;
    let organization = db
        .first_owned_organization(&caller)
        .cloned()
        .ok_or(BackendError::NotFound("organization"))?;
    let projects = db.projects_of(organization.id);
    Ok(respond(
        StatusCode::OK,
        "ok",
        OrganizationWithProjects { organization, projects },
    ))
}

pub async fn create_organization(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    payload: Result<Json<NameInput>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let name = required("name", &body(payload)?.name)?;
    let mut db = backend.db.write().await;
    ensure_name_free(&db, &name, None)?;
    let organization = db.insert_organization(&caller, &name);
    tracing::info!(organization_id = %organization.id, "organization created");
    Ok(respond(StatusCode::CREATED, "organization created", organization))
}

pub async fn get_organization(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let db = backend.db.read().await;
    let index = organization_index(&db, &caller, &id)?;
    Ok(respond(StatusCode::OK, "ok", &db.organizations[index]))
}

pub async fn update_organization(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<NameInput>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let name = required("name", &body(payload)?.name)?;
    rename_organization(&backend, &caller, &id, Some(name)).await
}

pub async fn patch_organization(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<PatchOrganizationInput>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let name = body(payload)?.name.map(|n| required("name", &n)).transpose()?;
    rename_organization(&backend, &caller, &id, name).await
}

async fn rename_organization(backend: &MockBackend, caller: &str, id: &str, name: Option<String>) -> ApiResult {
    let mut db = backend.db.write().await;
    let index = organization_index(&db, caller, id)?;
    if let Some(name) = name {
        let organization_id = db.organizations[index].id;
        ensure_name_free(&db, &name, Some(organization_id))?;
        let organization = &mut db.organizations[index];
        organization.name = name;
        organization.updated_at = Utc::now();
    }
    Ok(respond(StatusCode::OK, "organization updated", &db.organizations[index]))
}

pub async fn delete_organization(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let mut db = backend.db.write().await;
    let index = organization_index(&db, &caller, &id)?;
    let organization = db.organizations.remove(index);
    db.projects.retain(|p| p.organization_id != organization.id);
    tracing::info!(organization_id = %organization.id, "organization deleted");
    Ok(respond(StatusCode::OK, "organization deleted", ()))
}

pub async fn create_project(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    payload: Result<Json<CreateProjectInput>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let input = body(payload)?;
    let name = required("name", &input.name)?;
    let mut db = backend.db.write().await;
    let index = organization_index(&db, &caller, &input.organization_id)?;
    let organization_id = db.organizations[index].id;
    let project = db.insert_project(organization_id, &name);
    tracing::info!(%organization_id, project_id = %project.id, "project created");
    Ok(respond(StatusCode::CREATED, "project created", project))
}

pub async fn list_projects(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let db = backend.db.read().await;
    let index = organization_index(&db, &caller, &organization_id)?;
    Ok(respond(StatusCode::OK, "ok", db.projects_of(db.organizations[index].id)))
}

pub async fn regenerate_api_key(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let mut db = backend.db.write().await;
    let index = project_index(&db, &caller, &headers, &id)?;
    let project = &mut db.projects[index];
    project.api_key = new_api_key();
    project.updated_at = Utc::now();
    tracing::info!(project_id = %project.id, "api key regenerated");
    Ok(respond(StatusCode::OK, "api key regenerated", &*project))
}

pub async fn update_project(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<NameInput>, JsonRejection>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let name = required("name", &body(payload)?.name)?;
    let mut db = backend.db.write().await;
    let index = project_index(&db, &caller, &headers, &id)?;
    let project = &mut db.projects[index];
    project.name = name;
    project.updated_at = Utc::now();
    Ok(respond(StatusCode::OK, "project updated", &*project))
}

pub async fn delete_project(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let caller = caller(&headers)?;
    let mut db = backend.db.write().await;
    let index = project_index(&db, &caller, &headers, &id)?;
    let project = db.projects.remove(index);
    tracing::info!(project_id = %project.id, "project deleted");
    Ok(respond(StatusCode::OK, "project deleted", ()))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn caller_requires_bearer_token() {
        assert_eq!(caller(&headers(&[])), Err(BackendError::Unauthorized));
        assert_eq!(caller(&headers(&[("authorization", "Bearer ")])), Err(BackendError::Unauthorized));
        assert_eq!(caller(&headers(&[("authorization", "Basic abc")])), Err(BackendError::Unauthorized));
    }

    #[test]
    fn caller_prefers_user_id_header() {
        assert_eq!(caller(&headers(&[("authorization", "Bearer tok")])).unwrap(), "tok");
        let both = headers(&[("authorization", "Bearer tok"), (USER_ID_HEADER, "u1")]);
        assert_eq!(caller(&both).unwrap(), "u1");
    }

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required("name", "  Acme ").unwrap(), "Acme");
        assert!(matches!(required("name", "   "), Err(BackendError::BadRequest(_))));
    }

    #[test]
    fn project_lookup_checks_organization_header() {
        let mut db = Db::default();
        let org = db.insert_organization("u1", "Acme");
        let project = db.insert_project(org.id, "web");
        let id = project.id.to_string();

        let missing = project_index(&db, "u1", &headers(&[]), &id);
        assert!(matches!(missing, Err(BackendError::BadRequest(_))));

        let foreign = headers(&[(ORGANIZATION_HEADER, &Uuid::new_v4().to_string())]);
        assert_eq!(project_index(&db, "u1", &foreign, &id), Err(BackendError::NotFound("project")));

        let own = headers(&[(ORGANIZATION_HEADER, &org.id.to_string())]);
        assert_eq!(project_index(&db, "u1", &own, &id), Ok(0));
        assert_eq!(project_index(&db, "u2", &own, &id), Err(BackendError::NotFound("project")));
    }
}
