//! Full lifecycle tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then exercises every operation
//! over real HTTP. The first tests drive the host-does-IO halves directly
//! with ureq; the rest go through `Dashboard` so caching, invalidation and
//! retries run against the actual server, once over a ureq-backed
//! `Transport` and once over `ReqwestTransport`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use mock_server::MockBackend;
use valtro_core::{
    ApiClient, ApiError, ClientConfig, Dashboard, HttpMethod, HttpRequest, HttpResponse, OrganizationId,
    OrganizationPatch, QueryClient, QueryConfig, QueryKey, ReqwestTransport, StaticToken, Transport,
};

/// Execute an `HttpRequest` using ureq and return an `HttpResponse`.
///
/// Disables ureq's automatic status-code-as-error behavior so 4xx/5xx
/// responses are returned as data rather than `Err`, letting the core
/// client handle status interpretation.
fn execute(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent();

    macro_rules! with_headers {
        ($builder:expr) => {{
            let mut builder = $builder;
            for (name, value) in &req.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder
        }};
    }

    let result = match (req.method, req.body.as_deref()) {
        (HttpMethod::Get, _) => with_headers!(agent.get(&req.url)).call(),
        (HttpMethod::Delete, _) => with_headers!(agent.delete(&req.url)).call(),
        (HttpMethod::Post, Some(body)) => with_headers!(agent.post(&req.url)).send(body.as_bytes()),
        (HttpMethod::Post, None) => with_headers!(agent.post(&req.url)).send_empty(),
        (HttpMethod::Put, Some(body)) => with_headers!(agent.put(&req.url)).send(body.as_bytes()),
        (HttpMethod::Put, None) => with_headers!(agent.put(&req.url)).send_empty(),
        (HttpMethod::Patch, Some(body)) => with_headers!(agent.patch(&req.url)).send(body.as_bytes()),
        (HttpMethod::Patch, None) => with_headers!(agent.patch(&req.url)).send_empty(),
    };
    let mut response = result.map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let body = response.body_mut().read_to_string().unwrap_or_default();

    Ok(HttpResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        body,
    })
}

/// Blocking ureq round-trips moved off the async runtime.
struct UreqTransport;

impl Transport for UreqTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, ApiError>> {
        async move {
            tokio::task::spawn_blocking(move || execute(request))
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?
        }
        .boxed()
    }
}

/// Start the mock server on a random port in its own runtime thread.
fn start_server(backend: MockBackend) -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with_state(listener, backend).await
        })
        .unwrap();
    });

    addr
}

fn fast_retries() -> QueryConfig {
    QueryConfig {
        retry_base_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_millis(50),
        ..QueryConfig::default()
    }
}

fn dashboard(addr: SocketAddr, token: &str, transport: Arc<dyn Transport>) -> Dashboard {
    let api = ApiClient::new(
        ClientConfig::new(&format!("http://{addr}")),
        Arc::new(StaticToken::new(token)),
        transport,
    );
    Dashboard::new(api, QueryClient::new(fast_retries()))
}

#[test]
fn host_driven_round_trips() {
    let addr = start_server(MockBackend::new());
    let client = ApiClient::new(
        ClientConfig::new(&format!("http://{addr}")),
        Arc::new(StaticToken::new("carol")),
        Arc::new(UreqTransport),
    );
    let token = "carol";

    // Step 1: nothing onboarded yet.
    let req = client.build_check_onboarding_status(token);
    let status = client.parse_check_onboarding_status(execute(req).unwrap()).unwrap();
    assert!(!status.has_organization);

    // Step 2: complete onboarding.
    let req = client.build_complete_onboarding(token, "Initech", "tps").unwrap();
    let onboarded = client.parse_complete_onboarding(execute(req).unwrap()).unwrap();
    assert_eq!(onboarded.organization.name, "Initech");
    assert_eq!(onboarded.organization.owner_id, "carol");
    assert_eq!(onboarded.project.organization_id, onboarded.organization.id);

    // Step 3: the composite view carries the project.
    let req = client.build_get_organization_with_projects(token);
    let composite = client.parse_get_organization_with_projects(execute(req).unwrap()).unwrap();
    assert_eq!(composite.organization, onboarded.organization);
    assert_eq!(composite.first_project(), Some(&onboarded.project));

    // Step 4: delete the project, then deleting again is a 404.
    let org = &onboarded.organization.id;
    let req = client.build_delete_project(token, &onboarded.project.id, org);
    client.parse_empty(execute(req).unwrap()).unwrap();
    let req = client.build_delete_project(token, &onboarded.project.id, org);
    let err = client.parse_empty(execute(req).unwrap()).unwrap_err();
    assert_eq!(err.status(), 404);
    assert_eq!(err.status_text(), "Not Found");

    // Step 5: a request without a token is rejected by the server.
    let mut req = client.build_list_organizations(token);
    req.headers.retain(|(name, _)| name != "Authorization");
    let err = client.parse_list_organizations(execute(req).unwrap()).unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test(flavor = "multi_thread")]
async fn dashboard_lifecycle() {
    let backend = MockBackend::new();
    let addr = start_server(backend.clone());
    let dash = dashboard(addr, "alice", Arc::new(UreqTransport));

    // Onboarding.
    assert!(!dash.onboarding_status().await.unwrap().has_organization);
    let onboarded = dash.complete_onboarding(" Acme ", "web").await.unwrap();
    assert_eq!(onboarded.organization.name, "Acme");
    assert!(dash.onboarding_status().await.unwrap().has_organization);
    let org = onboarded.organization.id.clone();

    // Cached reads are served without another request.
    let composite = dash.organization_with_projects().await.unwrap();
    assert_eq!(composite.projects.len(), 1);
    let served = backend.request_count();
    dash.organization_with_projects().await.unwrap();
    assert_eq!(backend.request_count(), served);

    // Projects.
    let api = dash.create_project(&org, "api").await.unwrap();
    assert_eq!(dash.projects(&org).await.unwrap().len(), 2);
    assert_eq!(dash.organization_with_projects().await.unwrap().projects.len(), 2);

    let rotated = dash.regenerate_api_key(&api.id, &org).await.unwrap();
    assert_eq!(rotated.id, api.id);
    assert_ne!(rotated.api_key, api.api_key);
    assert!(rotated.api_key.starts_with("vk_"));

    let renamed = dash.update_project(&api.id, &org, "gateway").await.unwrap();
    assert_eq!(renamed.name, "gateway");
    let composite = dash.organization_with_projects().await.unwrap();
    assert_eq!(composite.project(&api.id).unwrap().name, "gateway");

    // Organizations.
    dash.update_organization(&org, "Acme Labs").await.unwrap();
    assert_eq!(dash.organization(&org).await.unwrap().name, "Acme Labs");
    let patched = dash
        .patch_organization(&org, &OrganizationPatch { name: Some("Acme".into()) })
        .await
        .unwrap();
    assert_eq!(patched.name, "Acme");
    assert_eq!(dash.organizations().await.unwrap()[0].name, "Acme");

    // Name conflicts surface as 409 with the server's body.
    let err = dash.create_organization("ACME").await.unwrap_err();
    assert_eq!(err.status(), 409);
    assert!(err.body().unwrap().contains("already exists"));

    // Deletes.
    dash.delete_project(&api.id, &org).await.unwrap();
    assert_eq!(dash.projects(&org).await.unwrap().len(), 1);

    dash.delete_organization(&org).await.unwrap();
    assert!(!dash.onboarding_status().await.unwrap().has_organization);
    let err = dash.organization_with_projects().await.unwrap_err();
    assert_eq!(err.status(), 404);
    assert!(dash.organizations().await.unwrap().is_empty());
    assert_eq!(backend.organization_count().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn reqwest_transport_retries_against_injected_faults() {
    let backend = MockBackend::new();
    let addr = start_server(backend.clone());
    let dash = dashboard(addr, "dave", Arc::new(ReqwestTransport::new()));

    let onboarded = dash.complete_onboarding("Globex", "site").await.unwrap();
    let org = onboarded.organization.id.clone();
    let project = onboarded.project.id.clone();

    // One 503 on a mutation: retried once, then succeeds.
    backend.fail_next(503, 1).await;
    let before = backend.request_count();
    let rotated = dash.regenerate_api_key(&project, &org).await.unwrap();
    assert_eq!(rotated.id, project);
    assert_eq!(backend.request_count() - before, 2);

    // Two 503s on a mutation: gives up after the second attempt.
    backend.fail_next(503, 2).await;
    let before = backend.request_count();
    let err = dash.update_project(&project, &org, "storefront").await.unwrap_err();
    assert_eq!(err.status(), 503);
    assert_eq!(err.status_text(), "Service Unavailable");
    assert_eq!(backend.request_count() - before, 2);

    // Reads retry server errors up to three attempts.
    dash.queries().invalidate(&QueryKey::OrganizationWithProjects);
    backend.fail_next(500, 2).await;
    let before = backend.request_count();
    let composite = dash.organization_with_projects().await.unwrap();
    assert_eq!(composite.organization.id, org);
    assert_eq!(backend.request_count() - before, 3);

    // Client errors on reads are terminal.
    let before = backend.request_count();
    let err = dash.organization(&OrganizationId::from("missing")).await.unwrap_err();
    assert_eq!(err.status(), 404);
    assert_eq!(backend.request_count() - before, 1);

    // Onboarding status never retries a 401.
    dash.queries().invalidate(&QueryKey::OnboardingStatus);
    backend.fail_next(401, 3).await;
    let before = backend.request_count();
    let err = dash.onboarding_status().await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(backend.request_count() - before, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_token_never_reaches_the_server() {
    let backend = MockBackend::new();
    let addr = start_server(backend.clone());
    let api = ApiClient::new(
        ClientConfig::new(&format!("http://{addr}")),
        Arc::new(StaticToken::none()),
        Arc::new(ReqwestTransport::new()),
    );
    let dash = Dashboard::new(api, QueryClient::new(fast_retries()));

    let err = dash.organizations().await.unwrap_err();
    assert_eq!(err, ApiError::Unauthorized);
    assert_eq!(err.status(), 401);
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_backend_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dash = dashboard(addr, "erin", Arc::new(ReqwestTransport::new()));
    let err = dash.organizations().await.unwrap_err();
    assert_eq!(err.status(), 0);
    assert!(matches!(err, ApiError::Network(_)));
}
