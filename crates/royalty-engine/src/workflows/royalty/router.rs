use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use super::access::Actor;
use super::batch::MonthKey;
use super::domain::{AuthorId, BatchId, Money, RoyaltyRecordId, RoyaltyStatus, RuleSetId};
use super::error::{ErrorKind, RoyaltyError};
use super::repository::{ArticleCatalog, PublishedArticle, RecordFilter, RoyaltyStore};
use super::rules::{RuleSetDraft, RuleSetValidationError};
use super::service::{RecordQuery, RoyaltyService};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_EMAIL_HEADER: &str = "x-actor-email";
pub const ACTOR_PERMISSIONS_HEADER: &str = "x-actor-permissions";

type SharedService<S, C> = Arc<RoyaltyService<S, C>>;

/// Router exposing the royalty console API under `/royalty`.
pub fn royalty_router<S, C>(service: SharedService<S, C>) -> Router
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    Router::new()
        .route(
            "/royalty/rulesets",
            get(list_rule_sets_handler::<S, C>).post(create_rule_set_handler::<S, C>),
        )
        .route(
            "/royalty/rulesets/resolve",
            get(resolve_rule_set_handler::<S, C>),
        )
        .route("/royalty/rulesets/:id", get(rule_set_handler::<S, C>))
        .route(
            "/royalty/rulesets/:id/activate",
            post(activate_rule_set_handler::<S, C>),
        )
        .route(
            "/royalty/rulesets/:id/deactivate",
            post(deactivate_rule_set_handler::<S, C>),
        )
        .route(
            "/royalty/articles/published",
            post(article_published_handler::<S, C>),
        )
        .route("/royalty/records", get(list_records_handler::<S, C>))
        .route(
            "/royalty/records/bulk-calculate",
            post(bulk_calculate_handler::<S, C>),
        )
        .route("/royalty/records/:id", get(record_handler::<S, C>))
        .route(
            "/royalty/records/:id/history",
            get(history_handler::<S, C>),
        )
        .route(
            "/royalty/records/:id/editor-confirm",
            post(editor_confirm_handler::<S, C>),
        )
        .route(
            "/royalty/records/:id/manager-approve",
            post(manager_approve_handler::<S, C>),
        )
        .route(
            "/royalty/records/:id/finance-approve",
            post(finance_approve_handler::<S, C>),
        )
        .route(
            "/royalty/records/:id/mark-paid",
            post(mark_paid_handler::<S, C>),
        )
        .route("/royalty/records/:id/reject", post(reject_handler::<S, C>))
        .route("/royalty/records/:id/void", post(void_handler::<S, C>))
        .route(
            "/royalty/records/:id/override",
            post(override_handler::<S, C>),
        )
        .route(
            "/royalty/batches",
            get(list_batches_handler::<S, C>).post(create_batch_handler::<S, C>),
        )
        .route("/royalty/batches/:id", get(batch_handler::<S, C>))
        .route(
            "/royalty/batches/:id/approve",
            post(approve_batch_handler::<S, C>),
        )
        .route(
            "/royalty/batches/:id/mark-paid",
            post(mark_batch_paid_handler::<S, C>),
        )
        .route(
            "/royalty/batches/:id/cancel",
            post(cancel_batch_handler::<S, C>),
        )
        .route(
            "/royalty/batches/:id/export.csv",
            get(export_batch_handler::<S, C>),
        )
        .with_state(service)
}

/// Caller identity forwarded by the gateway in `X-Actor-*` headers.
#[axum::async_trait]
impl<St> FromRequestParts<St> for Actor
where
    St: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).ok_or_else(unauthenticated)
    }
}

/// `:id` path segment parsed as a UUID; a malformed id is a 422 like any other bad input.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdPath(pub(crate) Uuid);

#[axum::async_trait]
impl<St> FromRequestParts<St> for IdPath
where
    St: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &St) -> Result<Self, Self::Rejection> {
        Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map(|Path(id)| IdPath(id))
            .map_err(|rejection: PathRejection| malformed(rejection.body_text()))
    }
}

pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let value_of = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let user_id = value_of(ACTOR_ID_HEADER)?;
    let email = value_of(ACTOR_EMAIL_HEADER).unwrap_or_default();
    let permissions = value_of(ACTOR_PERMISSIONS_HEADER)
        .map(|raw| raw.split(',').map(str::to_string).collect::<Vec<_>>())
        .unwrap_or_default();

    Some(Actor::new(user_id, email, permissions))
}

fn unauthenticated() -> Response {
    let payload = json!({
        "error": {
            "code": "UNAUTHENTICATED",
            "message": format!("{ACTOR_ID_HEADER} header is required"),
            "kind": "policy",
        }
    });
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

pub(crate) fn error_response(err: RoyaltyError) -> Response {
    let kind = err.kind();
    let status = match (&err, kind) {
        (RoyaltyError::PermissionDenied { .. }, _) => StatusCode::FORBIDDEN,
        (_, ErrorKind::Validation) | (_, ErrorKind::Policy) => StatusCode::UNPROCESSABLE_ENTITY,
        (_, ErrorKind::Conflict) => StatusCode::CONFLICT,
        (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        (_, ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if kind == ErrorKind::Internal {
        error!(code = err.code(), error = %err, "royalty request failed");
    }

    let mut payload = json!({
        "error": {
            "code": err.code(),
            "message": err.to_string(),
            "kind": kind,
        }
    });
    match &err {
        RoyaltyError::PermissionDenied { permission } => {
            payload["error"]["permission"] = json!(permission);
        }
        RoyaltyError::OverrideExceedsPolicy {
            role,
            max_percent,
            delta_percent,
        } => {
            payload["error"]["role"] = json!(role);
            payload["error"]["maxPercent"] = json!(max_percent);
            payload["error"]["deltaPercent"] = json!(delta_percent);
        }
        _ => {}
    }

    (status, Json(payload)).into_response()
}

fn malformed(message: String) -> Response {
    let payload = json!({
        "error": {
            "code": "MALFORMED_REQUEST",
            "message": message,
            "kind": ErrorKind::Validation,
        }
    });
    (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, RoyaltyError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordListParams {
    month: Option<String>,
    status: Option<RoyaltyStatus>,
    author_id: Option<String>,
    page: Option<usize>,
    size: Option<usize>,
}

impl RecordListParams {
    fn into_query(self) -> Result<RecordQuery, RoyaltyError> {
        let month = self
            .month
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| raw.parse::<MonthKey>())
            .transpose()?;
        Ok(RecordQuery {
            filter: RecordFilter {
                month,
                status: self.status,
                author_id: self
                    .author_id
                    .filter(|raw| !raw.trim().is_empty())
                    .map(|raw| AuthorId(raw.trim().to_string())),
            },
            page: self.page,
            size: self.size,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MonthParams {
    #[serde(default)]
    month: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolveParams {
    currency: String,
    at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MarkPaidRequest {
    #[serde(default)]
    payment_ref: String,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BatchPaymentRequest {
    #[serde(default)]
    payment_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReasonRequest {
    #[serde(default)]
    reason_note: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OverrideRequest {
    final_amount: Money,
    #[serde(default)]
    note: Option<String>,
}

pub(crate) async fn list_rule_sets_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    _actor: Actor,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(StatusCode::OK, service.list_rule_sets())
}

pub(crate) async fn create_rule_set_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    let Json(raw) = match body {
        Ok(body) => body,
        Err(rejection) => return malformed(rejection.body_text()),
    };
    let draft = match serde_json::from_value::<RuleSetDraft>(raw) {
        Ok(draft) => draft,
        Err(err) => {
            return error_response(RoyaltyError::InvalidRuleSet(
                RuleSetValidationError::Malformed(err.to_string()),
            ))
        }
    };
    respond(StatusCode::CREATED, service.create_rule_set(&actor, draft))
}

pub(crate) async fn resolve_rule_set_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    _actor: Actor,
    params: Result<Query<ResolveParams>, QueryRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    match params {
        Ok(Query(params)) => respond(
            StatusCode::OK,
            service.resolve_rule_set(&params.currency, params.at),
        ),
        Err(rejection) => malformed(rejection.body_text()),
    }
}

pub(crate) async fn rule_set_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    _actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(StatusCode::OK, service.rule_set(RuleSetId(id)))
}

pub(crate) async fn activate_rule_set_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(
        StatusCode::OK,
        service.activate_rule_set(&actor, RuleSetId(id)),
    )
}

pub(crate) async fn deactivate_rule_set_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(
        StatusCode::OK,
        service.deactivate_rule_set(&actor, RuleSetId(id)),
    )
}

pub(crate) async fn article_published_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    body: Result<Json<PublishedArticle>, JsonRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    match body {
        Ok(Json(published)) => respond(
            StatusCode::CREATED,
            service.record_published(&actor, published),
        ),
        Err(rejection) => malformed(rejection.body_text()),
    }
}

pub(crate) async fn bulk_calculate_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    match service.bulk_calculate(&actor) {
        Ok(summary) => {
            let payload = json!({
                "message": summary.message(),
                "count": summary.created.len(),
                "skipped": summary.skipped,
                "failed": summary.failures.len(),
                "failures": summary.failures,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn list_records_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    _actor: Actor,
    params: Result<Query<RecordListParams>, QueryRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return malformed(rejection.body_text()),
    };
    let result = params
        .into_query()
        .and_then(|query| service.list_records(query));
    respond(StatusCode::OK, result)
}

pub(crate) async fn record_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    _actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(StatusCode::OK, service.record(RoyaltyRecordId(id)))
}

pub(crate) async fn history_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    _actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(StatusCode::OK, service.history(RoyaltyRecordId(id)))
}

pub(crate) async fn editor_confirm_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(
        StatusCode::OK,
        service.editor_confirm(&actor, RoyaltyRecordId(id)),
    )
}

pub(crate) async fn manager_approve_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(
        StatusCode::OK,
        service.manager_approve(&actor, RoyaltyRecordId(id)),
    )
}

pub(crate) async fn finance_approve_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(
        StatusCode::OK,
        service.finance_approve(&actor, RoyaltyRecordId(id)),
    )
}

pub(crate) async fn mark_paid_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
    body: Result<Json<MarkPaidRequest>, JsonRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    match body {
        Ok(Json(MarkPaidRequest {
            payment_ref,
            paid_at: Some(paid_at),
        })) => respond(
            StatusCode::OK,
            service.mark_paid(&actor, RoyaltyRecordId(id), &payment_ref, paid_at),
        ),
        Ok(Json(MarkPaidRequest { paid_at: None, .. })) => {
            error_response(RoyaltyError::MissingPaidAt)
        }
        Err(rejection) => malformed(rejection.body_text()),
    }
}

pub(crate) async fn reject_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    match body {
        Ok(Json(request)) => respond(
            StatusCode::OK,
            service.reject(&actor, RoyaltyRecordId(id), &request.reason_note),
        ),
        Err(rejection) => malformed(rejection.body_text()),
    }
}

pub(crate) async fn void_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    match body {
        Ok(Json(request)) => respond(
            StatusCode::OK,
            service.void(&actor, RoyaltyRecordId(id), &request.reason_note),
        ),
        Err(rejection) => malformed(rejection.body_text()),
    }
}

pub(crate) async fn override_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
    body: Result<Json<OverrideRequest>, JsonRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    match body {
        Ok(Json(request)) => respond(
            StatusCode::OK,
            service.apply_override(
                &actor,
                RoyaltyRecordId(id),
                request.final_amount,
                request.note.as_deref(),
            ),
        ),
        Err(rejection) => malformed(rejection.body_text()),
    }
}

pub(crate) async fn list_batches_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    _actor: Actor,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(StatusCode::OK, service.list_batches())
}

pub(crate) async fn create_batch_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    params: Result<Query<MonthParams>, QueryRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return malformed(rejection.body_text()),
    };
    let result = params
        .month
        .parse::<MonthKey>()
        .and_then(|month_key| service.create_batch(&actor, month_key));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn batch_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    _actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(StatusCode::OK, service.batch(BatchId(id)))
}

pub(crate) async fn approve_batch_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(StatusCode::OK, service.approve_batch(&actor, BatchId(id)))
}

pub(crate) async fn mark_batch_paid_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
    body: Result<Json<BatchPaymentRequest>, JsonRejection>,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    match body {
        Ok(Json(request)) => respond(
            StatusCode::OK,
            service.mark_batch_paid(&actor, BatchId(id), &request.payment_ref),
        ),
        Err(rejection) => malformed(rejection.body_text()),
    }
}

pub(crate) async fn cancel_batch_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    respond(StatusCode::OK, service.cancel_batch(&actor, BatchId(id)))
}

pub(crate) async fn export_batch_handler<S, C>(
    State(service): State<SharedService<S, C>>,
    actor: Actor,
    IdPath(id): IdPath,
) -> Response
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    match service.export_batch_csv(&actor, BatchId(id)) {
        Ok((batch, csv)) => {
            let disposition = format!(
                "attachment; filename=\"royalty-{}-{}.csv\"",
                batch.month_key, batch.id
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                csv,
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}
