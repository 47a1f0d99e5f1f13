use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{info, warn};
use uuid::Uuid;

pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Debug, Default)]
pub struct MockState {
    pub issued_tokens: HashSet<String>,
    pub token_requests: u32,
    pub sheets: HashMap<String, Vec<Vec<Value>>>,
}

pub type Db = Arc<RwLock<MockState>>;

#[derive(Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub assertion: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    pub token_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendParams {
    pub value_input_option: String,
    pub insert_data_option: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendBody {
    pub range: String,
    #[serde(default)]
    pub major_dimension: Option<String>,
    pub values: Vec<Vec<Value>>,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn google_error(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
                "status": status.canonical_reason().unwrap_or("ERROR"),
            }
        })),
    )
}

pub fn app() -> Router {
    app_with_state(Db::default())
}

pub fn app_with_state(db: Db) -> Router {
    Router::new()
        .route("/token", post(issue_token))
        .route("/v4/spreadsheets/{id}/", get(get_spreadsheet))
        .route(
            "/v4/spreadsheets/{id}/values/{range}",
            get(get_values).post(append_values),
        )
        .with_state(db)
}

pub async fn run_with_state(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(db)).await
}

async fn issue_token(
    State(db): State<Db>,
    Form(form): Form<TokenForm>,
) -> Result<Json<TokenResponse>, (StatusCode, Json<Value>)> {
    let mut state = db.write().await;
    state.token_requests += 1;

    // The device appends a blank line after the form block.
    let grant_type = form.grant_type.trim();
    let assertion = form.assertion.trim();
    if grant_type != JWT_BEARER_GRANT {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type", "error_description": "Invalid grant_type"})),
        ));
    }
    let well_formed = assertion.split('.').count() == 3 && assertion.split('.').all(|part| !part.is_empty());
    if !well_formed {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "Invalid JWT"})),
        ));
    }

    let token = format!("ya29.mock-{}", Uuid::new_v4().simple());
    state.issued_tokens.insert(token.clone());
    info!(requests = state.token_requests, "issued access token");
    Ok(Json(TokenResponse {
        access_token: token,
        expires_in: 3599,
        token_type: "Bearer".to_string(),
    }))
}

async fn authorize(db: &Db, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let valid = match presented {
        Some(token) => db.read().await.issued_tokens.contains(token),
        None => false,
    };
    if !valid {
        warn!("rejected request without a valid bearer token");
        return Err(google_error(
            StatusCode::UNAUTHORIZED,
            "Request had invalid authentication credentials.",
        ));
    }
    Ok(())
}

fn column_letter(width: usize) -> char {
    (b'A' + width.clamp(1, 26) as u8 - 1) as char
}

async fn get_spreadsheet(State(db): State<Db>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult {
    authorize(&db, &headers).await?;
    let state = db.read().await;
    let rows = state
        .sheets
        .get(&id)
        .ok_or_else(|| google_error(StatusCode::NOT_FOUND, "Requested entity was not found."))?;
    Ok(Json(json!({
        "spreadsheetId": id,
        "properties": {"title": format!("Mock sheet {id}")},
        "sheets": [{"properties": {"sheetId": 0, "title": "Sheet1", "gridProperties": {"rowCount": rows.len()}}}],
    })))
}

async fn get_values(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((id, range)): Path<(String, String)>,
) -> ApiResult {
    authorize(&db, &headers).await?;
    let state = db.read().await;
    let rows = state
        .sheets
        .get(&id)
        .ok_or_else(|| google_error(StatusCode::NOT_FOUND, "Requested entity was not found."))?;
    let mut body = json!({"range": format!("Sheet1!{range}"), "majorDimension": "ROWS"});
    if !rows.is_empty() {
        body["values"] = json!(rows);
    }
    Ok(Json(body))
}

async fn append_values(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((id, range)): Path<(String, String)>,
    Query(params): Query<AppendParams>,
    Json(input): Json<AppendBody>,
) -> ApiResult {
    authorize(&db, &headers).await?;
    let Some(target) = range.strip_suffix(":append") else {
        return Err(google_error(StatusCode::NOT_FOUND, "Unknown values operation."));
    };
    if params.value_input_option != "USER_ENTERED" || params.insert_data_option != "OVERWRITE" {
        return Err(google_error(StatusCode::BAD_REQUEST, "Unsupported append options."));
    }
    if input.range != target || input.major_dimension.as_deref().unwrap_or("ROWS") != "ROWS" {
        return Err(google_error(StatusCode::BAD_REQUEST, "Body range does not match the URL."));
    }

    let mut state = db.write().await;
    let rows = state
        .sheets
        .get_mut(&id)
        .ok_or_else(|| google_error(StatusCode::NOT_FOUND, "Requested entity was not found."))?;
    let first = rows.len() + 1;
    let width = input.values.iter().map(Vec::len).max().unwrap_or(0);
    let added = input.values.len();
    let cells: usize = input.values.iter().map(Vec::len).sum();
    rows.extend(input.values);
    let last = rows.len();

    Ok(Json(json!({
        "spreadsheetId": id,
        "tableRange": format!("Sheet1!A1:{}{}", column_letter(width), first.saturating_sub(1).max(1)),
        "updates": {
            "spreadsheetId": id,
            "updatedRange": format!("Sheet1!A{first}:{}{last}", column_letter(width)),
            "updatedRows": added,
            "updatedColumns": width,
            "updatedCells": cells,
        }
    })))
}
