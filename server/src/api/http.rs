use axum::{
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use raffle_types::api::{
    CartReceipt, PageRequest, PublicSummary, PurchaseSort, DEFAULT_PAGE_SIZE,
};
use raffle_types::{GiftId, Purchase, PurchaseId, QuantityAction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::caller::{Caller, Manager};
use super::error::ApiError;
use crate::Server;

type ApiResult = Result<Response, ApiError>;

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Serialize)]
struct LotteryStatusResponse {
    lottery_completed: bool,
}

#[derive(Deserialize)]
pub(super) struct QuantityQuery {
    action: QuantityAction,
}

#[derive(Deserialize)]
pub(super) struct GateRequest {
    locked: bool,
}

#[derive(Deserialize)]
pub(super) struct PurchasesQuery {
    #[serde(default, alias = "sortBy")]
    sort_by: PurchaseSort,
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default = "default_page_size", alias = "pageSize")]
    page_size: u32,
}

fn first_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[derive(Deserialize)]
pub(super) struct TicketCountsRequest {
    gift_ids: Vec<GiftId>,
}

fn receipt(row: &Purchase) -> CartReceipt {
    CartReceipt {
        purchase_id: row.id,
        gift_id: row.gift_id,
        quantity: row.quantity,
    }
}

/// Liveness check.
pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn get_cart(
    AxumState(server): AxumState<Arc<Server>>,
    caller: Caller,
) -> ApiResult {
    let rows = server.raffle().cart().cart(caller.user).await?;
    Ok(Json(rows).into_response())
}

pub(super) async fn add_ticket(
    AxumState(server): AxumState<Arc<Server>>,
    caller: Caller,
    Path(gift_id): Path<GiftId>,
) -> ApiResult {
    let row = server.raffle().cart().add_ticket(caller.user, gift_id).await?;
    Ok((StatusCode::CREATED, Json(receipt(&row))).into_response())
}

pub(super) async fn remove_ticket(
    AxumState(server): AxumState<Arc<Server>>,
    caller: Caller,
    Path(purchase_id): Path<PurchaseId>,
) -> ApiResult {
    server
        .raffle()
        .cart()
        .remove_ticket(caller.user, purchase_id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(super) async fn adjust_quantity(
    AxumState(server): AxumState<Arc<Server>>,
    caller: Caller,
    Path(purchase_id): Path<PurchaseId>,
    Query(query): Query<QuantityQuery>,
) -> ApiResult {
    let row = server
        .raffle()
        .cart()
        .adjust_quantity(caller.user, purchase_id, query.action)
        .await?;
    Ok(Json(receipt(&row)).into_response())
}

pub(super) async fn checkout(
    AxumState(server): AxumState<Arc<Server>>,
    caller: Caller,
) -> ApiResult {
    let paid = server.raffle().cart().checkout(caller.user).await?;
    Ok(Json(paid).into_response())
}

pub(super) async fn my_purchases(
    AxumState(server): AxumState<Arc<Server>>,
    caller: Caller,
) -> ApiResult {
    let paid = server.raffle().cart().paid_tickets(caller.user).await?;
    Ok(Json(paid).into_response())
}

pub(super) async fn lottery_status(AxumState(server): AxumState<Arc<Server>>) -> Response {
    Json(LotteryStatusResponse {
        lottery_completed: server.raffle().reports().is_lottery_completed(),
    })
    .into_response()
}

pub(super) async fn all_results(AxumState(server): AxumState<Arc<Server>>) -> ApiResult {
    let results = server.raffle().reports().all_results().await?;
    Ok(Json(results).into_response())
}

pub(super) async fn result_for_gift(
    AxumState(server): AxumState<Arc<Server>>,
    Path(gift_id): Path<GiftId>,
) -> ApiResult {
    let view = server
        .raffle()
        .reports()
        .result_for_gift(gift_id)
        .await?
        .ok_or(ApiError::ResultNotFound)?;
    Ok(Json(view).into_response())
}

pub(super) async fn public_summary(AxumState(server): AxumState<Arc<Server>>) -> ApiResult {
    let summary = server.raffle().reports().summary().await?;
    Ok(Json(PublicSummary::from(&summary)).into_response())
}

pub(super) async fn summary(
    AxumState(server): AxumState<Arc<Server>>,
    _manager: Manager,
) -> ApiResult {
    let summary = server.raffle().reports().summary().await?;
    Ok(Json(summary).into_response())
}

pub(super) async fn pending_gifts(
    AxumState(server): AxumState<Arc<Server>>,
    _manager: Manager,
) -> ApiResult {
    let awaiting = server.raffle().reports().gifts_awaiting_draw().await?;
    Ok(Json(awaiting).into_response())
}

pub(super) async fn draw_gift(
    AxumState(server): AxumState<Arc<Server>>,
    Manager(caller): Manager,
    Path(gift_id): Path<GiftId>,
) -> ApiResult {
    let drawn = server.raffle().draws().draw_one(gift_id).await?;
    tracing::info!(
        manager = caller.user,
        gift_id,
        winner = drawn.result.winner,
        "draw requested"
    );
    let view = server.raffle().reports().drawn_view(&drawn);
    Ok(Json(view).into_response())
}

pub(super) async fn draw_all(
    AxumState(server): AxumState<Arc<Server>>,
    Manager(caller): Manager,
) -> ApiResult {
    tracing::info!(manager = caller.user, "bulk draw requested");
    let report = server.raffle().draws().draw_all().await?;
    Ok(Json(report).into_response())
}

pub(super) async fn set_gate(
    AxumState(server): AxumState<Arc<Server>>,
    Manager(caller): Manager,
    Json(request): Json<GateRequest>,
) -> ApiResult {
    server.raffle().set_locked(request.locked).await?;
    tracing::info!(manager = caller.user, locked = request.locked, "gate set");
    Ok(Json(LotteryStatusResponse {
        lottery_completed: server.raffle().gate().is_locked(),
    })
    .into_response())
}

pub(super) async fn overall_report(
    AxumState(server): AxumState<Arc<Server>>,
    _manager: Manager,
) -> ApiResult {
    let report = server.raffle().revenue_and_participants().await?;
    Ok(Json(report).into_response())
}

pub(super) async fn income_by_gift(
    AxumState(server): AxumState<Arc<Server>>,
    _manager: Manager,
) -> ApiResult {
    let report = server.raffle().income_by_gift().await?;
    Ok(Json(report).into_response())
}

pub(super) async fn purchases_by_gift(
    AxumState(server): AxumState<Arc<Server>>,
    _manager: Manager,
    Query(query): Query<PurchasesQuery>,
) -> ApiResult {
    let page = PageRequest {
        page: query.page,
        page_size: query.page_size,
    };
    let report = server
        .raffle()
        .purchases_by_gift(query.sort_by, page)
        .await?;
    Ok(Json(report).into_response())
}

pub(super) async fn purchases_for_gift(
    AxumState(server): AxumState<Arc<Server>>,
    _manager: Manager,
    Path(gift_id): Path<GiftId>,
) -> ApiResult {
    let rows = server.raffle().paid_purchases_for_gift(gift_id).await?;
    Ok(Json(rows).into_response())
}

pub(super) async fn ticket_counts(
    AxumState(server): AxumState<Arc<Server>>,
    _manager: Manager,
    Json(request): Json<TicketCountsRequest>,
) -> ApiResult {
    let counts = server.raffle().ticket_counts(&request.gift_ids).await?;
    Ok(Json(counts).into_response())
}
