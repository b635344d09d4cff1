use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, MatchedPath, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tera::Context;
use tracing::{error, warn};
use ulid::Ulid;

use crate::auth::{require_api_key, ApiKey};
use crate::clock::Zone;
use crate::engine::{
    BookingError, BookingMode, BookingRequest, BookingService, CallLogRequest, CancelRequest,
    ConfirmOutcome, RescheduleRequest, SlotView,
};
use crate::model::*;
use crate::templates;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BookingService>,
}

/// Build the full router: public health and confirmation-link routes, the
/// rest behind the API key, all under a request timeout.
pub fn router(service: Arc<BookingService>, api_key: ApiKey, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route("/availability", post(availability))
        .route("/bookings", post(create_booking))
        .route("/bookings/immediate", post(book_immediately))
        .route("/bookings/cancel", post(cancel_booking))
        .route("/bookings/reschedule", post(reschedule_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/calls", post(log_call))
        .route_layer(middleware::from_fn_with_state(api_key, require_api_key));

    let public = Router::new()
        .route("/health", get(health))
        .route("/bookings/{id}/confirm", get(confirm_page));

    Router::new()
        .merge(public)
        .merge(protected)
        .route_layer(middleware::from_fn(track_metrics))
        .layer(middleware::from_fn_with_state(request_timeout, enforce_timeout))
        .with_state(AppState { service })
}

// ── Middleware ───────────────────────────────────────────

async fn track_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();
    metrics::counter!(crate::observability::HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(crate::observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

/// Bounds how long a caller waits. Booking mutations run as their own tasks,
/// so a timed-out request still finishes its commit in the background.
async fn enforce_timeout(State(limit): State<Duration>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("request to {path} timed out after {limit:?}");
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(serde_json::json!({ "error": "timeout", "message": "request timed out" })),
            )
                .into_response()
        }
    }
}

// ── Errors ───────────────────────────────────────────────

pub struct ApiError(BookingError);

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BookingError::PastDate
            | BookingError::SameDay
            | BookingError::BelowMinimumBudget { .. }
            | BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::Overlap | BookingError::Cancelled(_) => StatusCode::CONFLICT,
            BookingError::NotFound => StatusCode::NOT_FOUND,
            BookingError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BookingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = if self.0.is_user_error() {
            self.0.to_string()
        } else {
            // Details are in the log; callers only learn the category.
            "the booking system is temporarily unavailable".to_string()
        };
        let body = serde_json::json!({
            "error": crate::observability::error_label(&self.0),
            "message": message,
        });
        (self.status(), Json(body)).into_response()
    }
}

/// `Json` whose rejections come back as typed validation errors.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(ApiError(BookingError::Validation(rejection.body_text()))),
        }
    }
}

// ── Views ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: String,
    pub status: BookingStatus,
    pub contact: Contact,
    pub details: BookingDetails,
    pub start_time: String,
    pub end_time: String,
    pub display_time: String,
    pub external_event_ref: Option<String>,
    pub reminders: ReminderFlags,
}

impl BookingView {
    pub fn new(booking: &Booking, zone: &Zone) -> Self {
        Self {
            id: booking.id.to_string(),
            status: booking.status,
            contact: booking.contact.clone(),
            details: booking.details.clone(),
            start_time: zone.format_rfc3339(booking.start_time),
            end_time: zone.format_rfc3339(booking.end_time),
            display_time: zone.format_human(booking.start_time),
            external_event_ref: booking.external_event_ref.clone(),
            reminders: booking.reminders,
        }
    }
}

// ── Handlers ─────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct AvailabilityRequest {
    date: String,
}

#[derive(Debug, Serialize)]
struct AvailabilityResponse {
    date: String,
    timezone: &'static str,
    slots: Vec<SlotView>,
}

async fn availability(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AvailabilityRequest>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let svc = &state.service;
    let day = svc.check_query_date(&req.date)?;
    let date = day.format("%Y-%m-%d").to_string();
    let slots = svc.available_slots(&date).await;
    Ok(Json(AvailabilityResponse {
        slots: svc.slot_views(&slots),
        timezone: svc.zone().name(),
        date,
    }))
}

async fn create_booking(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<BookingRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let svc = &state.service;
    let receipt = svc.create_booking(req, BookingMode::Deferred).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "booking": BookingView::new(&receipt.booking, svc.zone()),
            "email_sent": receipt.email_sent,
            "message": "confirmation email sent; the booking is held until confirmed",
        })),
    ))
}

async fn book_immediately(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<BookingRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let svc = &state.service;
    let receipt = svc.create_booking(req, BookingMode::Immediate).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "booking": BookingView::new(&receipt.booking, svc.zone()),
            "email_sent": receipt.email_sent,
            "sms_sent": receipt.sms_sent,
        })),
    ))
}

fn parse_id(raw: &str) -> Result<Ulid, BookingError> {
    Ulid::from_string(raw).map_err(|_| BookingError::NotFound)
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BookingView>, ApiError> {
    let svc = &state.service;
    let booking = svc.get_booking(parse_id(&id)?).await?;
    Ok(Json(BookingView::new(&booking, svc.zone())))
}

async fn cancel_booking(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CancelRequest>,
) -> Result<Json<BookingView>, ApiError> {
    let svc = &state.service;
    let booking = svc.cancel_booking(req).await?;
    Ok(Json(BookingView::new(&booking, svc.zone())))
}

async fn reschedule_booking(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RescheduleRequest>,
) -> Result<Json<BookingView>, ApiError> {
    let svc = &state.service;
    let booking = svc.reschedule_booking(req).await?;
    Ok(Json(BookingView::new(&booking, svc.zone())))
}

async fn log_call(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CallLogRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let call = state.service.log_call(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": call.id.to_string(), "logged": true })),
    ))
}

// ── Confirmation pages ───────────────────────────────────

async fn confirm_page(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let svc = &state.service;
    let outcome = match parse_id(&id) {
        Ok(id) => svc.confirm_booking(id).await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(ConfirmOutcome::Confirmed(b)) => page(
            StatusCode::OK,
            "Appointment confirmed",
            &format!(
                "Thank you, {}. Your call on {} is confirmed. A calendar invitation is on its way.",
                b.contact.first_name(),
                svc.zone().format_human(b.start_time)
            ),
        ),
        Ok(ConfirmOutcome::AlreadyConfirmed(b)) => page(
            StatusCode::OK,
            "Already confirmed",
            &format!(
                "Your call on {} was already confirmed. Nothing else to do.",
                svc.zone().format_human(b.start_time)
            ),
        ),
        Err(BookingError::NotFound) => page(
            StatusCode::NOT_FOUND,
            "Booking not found",
            "This confirmation link is not valid.",
        ),
        Err(e @ (BookingError::Cancelled(_) | BookingError::PastDate)) => page(
            StatusCode::GONE,
            "Booking no longer available",
            &e.to_string(),
        ),
        Err(e) => page(
            ApiError(e).status(),
            "Something went wrong",
            "We could not confirm your booking right now. Please try the link again later.",
        ),
    }
}

fn page(status: StatusCode, title: &str, message: &str) -> Response {
    let mut ctx = Context::new();
    ctx.insert("title", title);
    ctx.insert("message", message);
    match templates::render(templates::CONFIRM_PAGE, &ctx) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            error!("cannot render confirmation page: {e}");
            (status, title.to_string()).into_response()
        }
    }
}
