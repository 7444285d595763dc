// src/api.rs
use crate::error::AppError;
use crate::models::{
    parse_shares, AccountId, LoginRequest, RegisterRequest, SessionResponse, TradeRequest,
};
use crate::state::AppState;
use log::{debug, error, info};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Caller identity resolved from the bearer token, scoped to one request.
#[derive(Debug, Clone)]
pub struct Session {
    pub account_id: AccountId,
    token: String,
}

/// All routes with error recovery and caching disabled.
pub fn app(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    routes(state)
        .recover(handle_rejection)
        .with(warp::reply::with::header(
            "cache-control",
            "no-cache, no-store, must-revalidate",
        ))
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let register = warp::path!("register")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body::<RegisterRequest>())
        .and_then(register_handler);

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body::<LoginRequest>())
        .and_then(login_handler);

    let logout = warp::path!("logout")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(with_session(state.clone()))
        .and_then(logout_handler);

    let portfolio = warp::path!("portfolio")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(with_session(state.clone()))
        .and_then(portfolio_handler);

    let quote = warp::path!("quote" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(with_session(state.clone()))
        .and_then(quote_handler);

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(with_session(state.clone()))
        .and(json_body::<TradeRequest>())
        .and_then(buy_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(with_session(state.clone()))
        .and(json_body::<TradeRequest>())
        .and_then(sell_handler);

    let history = warp::path!("history")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(with_session(state))
        .and_then(history_handler);

    register
        .or(login)
        .or(logout)
        .or(portfolio)
        .or(quote)
        .or(buy)
        .or(sell)
        .or(history)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn with_session(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Session,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(authorize)
}

fn json_body<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

async fn authorize(header: Option<String>, state: Arc<AppState>) -> Result<Session, Rejection> {
    let token = header
        .as_deref()
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| warp::reject::custom(AppError::Unauthorized))?;
    let account_id = state.tokens.validate(token).map_err(warp::reject::custom)?;
    Ok(Session {
        account_id,
        token: token.to_string(),
    })
}

async fn register_handler(
    state: Arc<AppState>,
    form: RegisterRequest,
) -> Result<impl Reply, Rejection> {
    let account_id = state
        .accounts
        .register(
            form.username.as_deref().unwrap_or_default(),
            form.password.as_deref().unwrap_or_default(),
            form.confirmation.as_deref().unwrap_or_default(),
        )
        .await
        .map_err(warp::reject::custom)?;
    let token = state
        .tokens
        .create_token(account_id)
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&SessionResponse { account_id, token }),
        StatusCode::CREATED,
    ))
}

async fn login_handler(state: Arc<AppState>, form: LoginRequest) -> Result<impl Reply, Rejection> {
    let account_id = state
        .accounts
        .authenticate(
            form.username.as_deref().unwrap_or_default(),
            form.password.as_deref().unwrap_or_default(),
        )
        .await
        .map_err(warp::reject::custom)?;
    let token = state
        .tokens
        .create_token(account_id)
        .map_err(warp::reject::custom)?;
    info!("Account {} logged in.", account_id);
    Ok(warp::reply::json(&SessionResponse { account_id, token }))
}

async fn logout_handler(state: Arc<AppState>, session: Session) -> Result<impl Reply, Rejection> {
    state
        .tokens
        .revoke(&session.token)
        .map_err(warp::reject::custom)?;
    info!("Account {} logged out.", session.account_id);
    Ok(warp::reply::json(&json!({ "message": "logged out" })))
}

async fn portfolio_handler(
    state: Arc<AppState>,
    session: Session,
) -> Result<impl Reply, Rejection> {
    let portfolio = state
        .portfolio
        .snapshot(session.account_id)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&portfolio))
}

async fn quote_handler(
    symbol: String,
    state: Arc<AppState>,
    _session: Session,
) -> Result<impl Reply, Rejection> {
    let quote = state
        .portfolio
        .quote(&symbol)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&quote))
}

async fn buy_handler(
    state: Arc<AppState>,
    session: Session,
    form: TradeRequest,
) -> Result<impl Reply, Rejection> {
    let (symbol, shares) = trade_params(&form).map_err(warp::reject::custom)?;
    let receipt = state
        .engine
        .buy(session.account_id, symbol, shares)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&receipt))
}

async fn sell_handler(
    state: Arc<AppState>,
    session: Session,
    form: TradeRequest,
) -> Result<impl Reply, Rejection> {
    let (symbol, shares) = trade_params(&form).map_err(warp::reject::custom)?;
    let receipt = state
        .engine
        .sell(session.account_id, symbol, shares)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&receipt))
}

async fn history_handler(
    state: Arc<AppState>,
    session: Session,
) -> Result<impl Reply, Rejection> {
    let entries = state
        .portfolio
        .history(session.account_id)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&entries))
}

fn trade_params(form: &TradeRequest) -> Result<(&str, i64), AppError> {
    let symbol = form
        .symbol
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("missing symbol".into()))?;
    let shares = parse_shares(form.shares.as_ref())?;
    Ok((symbol, shares))
}

/// Turns every rejection into `{error, message, retryable}` JSON with a matching status.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let mut retryable = false;
    let (status, code, message) = if let Some(e) = err.find::<AppError>() {
        if e.status().is_server_error() {
            error!("Request failed: {}", e);
        } else {
            debug!("Request rejected: {}", e);
        }
        retryable = e.retryable();
        (e.status(), e.code(), e.public_message())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "NOT_FOUND", "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "INVALID_INPUT", e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "INVALID_INPUT",
            "request body too large".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({
            "error": code,
            "message": message,
            "retryable": retryable,
        })),
        status,
    ))
}
