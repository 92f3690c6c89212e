//! HTTP routes.
//!
//! | method | path | limit |
//! |---|---|---|
//! | GET | `/health` | none |
//! | POST | `/validate`, `/interpret`, `/compliance`, `/strategist` | workflow |
//! | GET | `/user-status` | status |
//! | GET, POST | `/custom-voices` | status |
//! | GET, PUT, DELETE | `/custom-voices/:id` | status |
//! | POST | `/webhooks/clerk` | none, signature verified |
//!
//! Every route except `/health` and the webhook requires a bearer token.

use std::{future::Future, net::SocketAddr};

use axum::{
    Json, Router, async_trait,
    body::Bytes,
    extract::{
        ConnectInfo, FromRequestParts, Path, Request, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use textval_gate::{
    GateError,
    auth::{Identity, parse_bearer, webhook::{ProvisioningEvent, WebhookHeaders}},
    gate::FeatureRequest,
    plan::Workflow,
    provisioning::ProvisioningOutcome,
    security::{
        KeyedRateLimiter,
        audit::{AuditEvent, AuditEventType},
    },
    service::{DEFAULT_VALIDATOR_PROFILE, UsageStatus, WorkflowOutcome},
    voice::{CustomVoiceProfile, VoiceProfileDraft, VoiceProfileId},
};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{error::ApiError, observability::HealthReport, state::AppState};

type ApiResult<T> = Result<T, ApiError>;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let workflows = Router::new()
        .route("/validate", post(validate))
        .route("/interpret", post(interpret))
        .route("/compliance", post(compliance))
        .route("/strategist", post(strategist))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_workflows));

    let account = Router::new()
        .route("/user-status", get(user_status))
        .route("/custom-voices", get(list_voices).post(create_voice))
        .route("/custom-voices/:id", get(get_voice).put(update_voice).delete(delete_voice))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_status));

    Router::new()
        .route("/health", get(health))
        .route("/webhooks/clerk", post(clerk_webhook))
        .merge(workflows)
        .merge(account)
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    axum::serve(listener, router(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}

/// Authenticated caller, extracted from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let result = match parse_bearer(header) {
            Ok(token) => state.authenticator.authenticate(token).await,
            Err(e) => Err(e),
        };
        result.map(Caller).map_err(|e| {
            if let GateError::AuthenticationFailed(reason) = &e {
                AuditEvent::new(AuditEventType::AuthenticationFailed, "anonymous", Uuid::new_v4())
                    .with_reason(reason)
                    .emit();
            }
            ApiError(e)
        })
    }
}

async fn limit_workflows(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    throttle(&state.workflow_limiter, addr).await?;
    Ok(next.run(request).await)
}

async fn limit_status(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    throttle(&state.status_limiter, addr).await?;
    Ok(next.run(request).await)
}

async fn throttle(limiter: &KeyedRateLimiter, addr: SocketAddr) -> ApiResult<()> {
    let client = addr.ip().to_string();
    limiter.acquire(&client).await.map_err(|e| {
        warn!(%client, "client rate limit exceeded");
        AuditEvent::new(AuditEventType::RateLimitExceeded, &client, Uuid::new_v4()).emit();
        ApiError(e)
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health())
}

/// Body of the workflow endpoints.
#[derive(Debug, Deserialize)]
struct WorkflowBody {
    text: String,
    #[serde(default)]
    profile_name: Option<String>,
    #[serde(default)]
    custom_voice_id: Option<VoiceProfileId>,
}

impl WorkflowBody {
    fn into_request(self, workflow: Workflow) -> FeatureRequest {
        let profile_name = self.profile_name.unwrap_or_else(|| match workflow {
            Workflow::Validator => DEFAULT_VALIDATOR_PROFILE.to_owned(),
            _ => String::new(),
        });
        FeatureRequest { workflow, profile_name, input_text: self.text, custom_voice_id: self.custom_voice_id }
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(body)| body).map_err(|e| ApiError(GateError::InvalidInput(e.body_text())))
}

fn voice_id(path: Result<Path<Uuid>, PathRejection>) -> ApiResult<VoiceProfileId> {
    path.map(|Path(id)| VoiceProfileId::from(id)).map_err(|_| ApiError(GateError::NotFoundOrForbidden))
}

async fn run_workflow(
    state: &AppState,
    Caller(identity): Caller,
    workflow: Workflow,
    payload: Result<Json<WorkflowBody>, JsonRejection>,
) -> ApiResult<Json<WorkflowOutcome>> {
    let request = json_body(payload)?.into_request(workflow);
    Ok(Json(state.service.run(&identity, request).await?))
}

async fn validate(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<WorkflowBody>, JsonRejection>,
) -> ApiResult<Json<WorkflowOutcome>> {
    run_workflow(&state, caller, Workflow::Validator, payload).await
}

async fn interpret(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<WorkflowBody>, JsonRejection>,
) -> ApiResult<Json<WorkflowOutcome>> {
    run_workflow(&state, caller, Workflow::Interpreter, payload).await
}

async fn compliance(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<WorkflowBody>, JsonRejection>,
) -> ApiResult<Json<WorkflowOutcome>> {
    run_workflow(&state, caller, Workflow::Compliance, payload).await
}

async fn strategist(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<WorkflowBody>, JsonRejection>,
) -> ApiResult<Json<WorkflowOutcome>> {
    run_workflow(&state, caller, Workflow::Strategist, payload).await
}

async fn user_status(State(state): State<AppState>, Caller(identity): Caller) -> ApiResult<Json<UsageStatus>> {
    Ok(Json(state.service.usage_status(&identity).await?))
}

async fn list_voices(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> ApiResult<Json<Vec<CustomVoiceProfile>>> {
    Ok(Json(state.service.list_voices(&identity).await?))
}

async fn create_voice(
    State(state): State<AppState>,
    Caller(identity): Caller,
    payload: Result<Json<VoiceProfileDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CustomVoiceProfile>)> {
    let draft = json_body(payload)?;
    let profile = state.service.create_voice(&identity, draft).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn get_voice(
    State(state): State<AppState>,
    Caller(identity): Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<CustomVoiceProfile>> {
    let id = voice_id(path)?;
    Ok(Json(state.service.get_voice(&identity, id).await?))
}

async fn update_voice(
    State(state): State<AppState>,
    Caller(identity): Caller,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<VoiceProfileDraft>, JsonRejection>,
) -> ApiResult<Json<CustomVoiceProfile>> {
    let id = voice_id(path)?;
    let draft = json_body(payload)?;
    Ok(Json(state.service.update_voice(&identity, id, draft).await?))
}

async fn delete_voice(
    State(state): State<AppState>,
    Caller(identity): Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<StatusCode> {
    let id = voice_id(path)?;
    state.service.delete_voice(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn svix_header<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(GateError::WebhookRejected(format!("missing {name} header"))))
}

#[instrument(skip_all, level = "debug")]
async fn clerk_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ProvisioningOutcome>> {
    let webhook_headers = WebhookHeaders {
        id: svix_header(&headers, "svix-id")?,
        timestamp: svix_header(&headers, "svix-timestamp")?,
        signature: svix_header(&headers, "svix-signature")?,
    };
    if let Err(e) = state.webhook.verify(webhook_headers, &body) {
        warn!(error = %e, "webhook verification failed");
        return Err(e.into());
    }

    let event = ProvisioningEvent::parse(&body)?;
    Ok(Json(state.provisioner.apply(event).await?))
}
