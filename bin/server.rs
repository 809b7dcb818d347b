// Finance Support - Web Server
// REST API with Axum, mounted under /finance

use anyhow::{anyhow, Context};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use finance_support::{
    BankListResult, ExtremeAveragesResult, FinanceError, ForecastResult, LargestSupportResult,
    Outcome, QueryFacade, SqliteStore, YearlyStaticsResult,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Multipart field carrying the CSV
const UPLOAD_FIELD: &str = "file";

/// Path alias for 외환은행 (Korea Exchange Bank)
const KEB_ALIAS: &str = "KEB";
const KEB_BANK: &str = "외환은행";

const UPLOAD_LIMIT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "finance-server", version, about = "Housing finance support API")]
struct Args {
    /// SQLite database file
    #[arg(long, env = "FINANCE_DB", default_value = "finance.db")]
    db: PathBuf,

    /// Listen address
    #[arg(long, env = "FINANCE_ADDR", default_value = "0.0.0.0:3000")]
    addr: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    facade: Arc<Mutex<QueryFacade<SqliteStore>>>,
}

/// Upload response (`{"result": "OK" | "NO_FILE" | "WRONG_FORM"}`)
#[derive(Serialize, Deserialize)]
struct UploadResponse {
    result: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastRequest {
    bank_name: String,
    month: String,
}

// ============================================================================
// Error mapping
// ============================================================================

struct ApiError(FinanceError);

impl From<FinanceError> for ApiError {
    fn from(error: FinanceError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0.outcome() {
            Outcome::NotFound => (StatusCode::NOT_FOUND, Json(json!({}))).into_response(),
            Outcome::BadInput(reason) => {
                warn!(code = reason.code(), "rejected upload: {}", self.0);
                (
                    StatusCode::BAD_REQUEST,
                    Json(UploadResponse {
                        result: reason.code().to_string(),
                    }),
                )
                    .into_response()
            }
            Outcome::Unprocessable => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": self.0.to_string() })),
            )
                .into_response(),
            Outcome::Internal => {
                error!("request failed: {:#}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Run one facade call under the database lock
fn with_facade<T, F>(state: &AppState, query: F) -> Result<T, ApiError>
where
    F: FnOnce(&QueryFacade<SqliteStore>) -> finance_support::Result<T>,
{
    let facade = state
        .facade
        .lock()
        .map_err(|_| FinanceError::Storage(anyhow!("database lock poisoned")))?;
    Ok(query(&*facade)?)
}

// ============================================================================
// API Handlers
// ============================================================================

/// POST /finance/uploadSupportData - Import a CSV (multipart field "file")
async fn upload_support_data(
    State(state): State<AppState>,
    multipart: Option<Multipart>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file: Option<Vec<u8>> = None;

    if let Some(mut multipart) = multipart {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| FinanceError::malformed(format!("multipart body: {}", e)))?
        {
            if field.name() == Some(UPLOAD_FIELD) {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| FinanceError::malformed(format!("multipart body: {}", e)))?;
                file = Some(bytes.to_vec());
                break;
            }
        }
    }

    let report = with_facade(&state, |facade| facade.ingest(file.as_deref()))?;
    info!(
        inserted = report.inserted,
        duplicates = report.duplicates,
        "upload accepted"
    );

    Ok(Json(UploadResponse {
        result: "OK".to_string(),
    }))
}

/// GET /finance/findAllBanks
async fn find_all_banks(State(state): State<AppState>) -> Result<Json<BankListResult>, ApiError> {
    Ok(Json(with_facade(&state, |facade| facade.bank_list())?))
}

/// GET /finance/findSupportStatics
async fn find_support_statics(
    State(state): State<AppState>,
) -> Result<Json<YearlyStaticsResult>, ApiError> {
    Ok(Json(with_facade(&state, |facade| facade.yearly_statics())?))
}

/// GET /finance/findLargestSupportBank
async fn find_largest_support_bank(
    State(state): State<AppState>,
) -> Result<Json<LargestSupportResult>, ApiError> {
    Ok(Json(with_facade(&state, |facade| facade.largest_support())?))
}

/// GET /finance/findBankSupportLargestAndSmallestAverage/:bank
async fn find_bank_support_largest_and_smallest_average(
    State(state): State<AppState>,
    Path(bank): Path<String>,
) -> Result<Json<ExtremeAveragesResult>, ApiError> {
    let name = if bank == KEB_ALIAS { KEB_BANK } else { bank.as_str() };
    Ok(Json(with_facade(&state, |facade| facade.extreme_averages(name))?))
}

/// POST /finance/calcForecastMonthlySupportForBank
async fn calc_forecast_monthly_support_for_bank(
    State(state): State<AppState>,
    Json(request): Json<ForecastRequest>,
) -> Result<Json<ForecastResult>, ApiError> {
    Ok(Json(with_facade(&state, |facade| {
        facade.forecast(&request.bank_name, &request.month)
    })?))
}

fn build_router(state: AppState) -> Router {
    let finance_routes = Router::new()
        .route("/uploadSupportData", post(upload_support_data))
        .route("/findAllBanks", get(find_all_banks))
        .route("/findSupportStatics", get(find_support_statics))
        .route("/findLargestSupportBank", get(find_largest_support_bank))
        .route(
            "/findBankSupportLargestAndSmallestAverage/:bank",
            get(find_bank_support_largest_and_smallest_average),
        )
        .route(
            "/calcForecastMonthlySupportForBank",
            post(calc_forecast_monthly_support_for_bank),
        )
        .with_state(state);

    Router::new().nest("/finance", finance_routes).layer(
        ServiceBuilder::new()
            .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES))
            .layer(CorsLayer::permissive()),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Failed to open database {}", args.db.display()))?;
    info!(db = %args.db.display(), "database opened");

    let state = AppState {
        facade: Arc::new(Mutex::new(QueryFacade::new(store))),
    };

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", args.addr))?;
    info!(addr = %args.addr, "finance server listening");

    axum::serve(listener, build_router(state))
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "finance-test-boundary";

    const SAMPLE: &str = "\
연도,월,국민은행(억원),외환은행(억원)
2005,1,846,199
2006,1,900,120
2007,1,950,300
";

    fn test_app() -> Router {
        let store = SqliteStore::open_in_memory().unwrap();
        build_router(AppState {
            facade: Arc::new(Mutex::new(QueryFacade::new(store))),
        })
    }

    fn multipart_request(field: &str, text: &str) -> Request<Body> {
        let (encoded, _, _) = encoding_rs::EUC_KR.encode(text);

        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"data.csv\"\r\nContent-Type: text/csv\r\n\r\n",
                BOUNDARY, field
            )
            .as_bytes(),
        );
        body.extend_from_slice(&encoded);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/finance/uploadSupportData")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_empty_database_is_not_found() {
        let response = test_app()
            .oneshot(get_request("/finance/findAllBanks"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await, json!({}));
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let response = test_app()
            .oneshot(multipart_request("other", SAMPLE))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["result"], "NO_FILE");
    }

    #[tokio::test]
    async fn test_upload_wrong_form() {
        let response = test_app()
            .oneshot(multipart_request("file", "year,month,bank\n2005,1,10\n"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["result"], "WRONG_FORM");
    }

    #[tokio::test]
    async fn test_upload_then_query() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(multipart_request("file", SAMPLE))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["result"], "OK");

        let response = app
            .clone()
            .oneshot(get_request("/finance/findAllBanks"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "banks": [{ "bankName": "국민은행" }, { "bankName": "외환은행" }] })
        );

        let response = app
            .clone()
            .oneshot(get_request("/finance/findLargestSupportBank"))
            .await
            .unwrap();
        let largest = json_body(response).await;
        assert_eq!(largest["year"], "2007");
        assert_eq!(largest["bank"], "국민은행");

        let response = app
            .clone()
            .oneshot(get_request(
                "/finance/findBankSupportLargestAndSmallestAverage/KEB",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let extremes = json_body(response).await;
        assert_eq!(extremes["bank"], "외환은행");
        assert_eq!(extremes["largestYear"], "2007");
        assert_eq!(extremes["smallestYear"], "2006");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/finance/calcForecastMonthlySupportForBank")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "bankName": "국민은행", "month": "1" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_forecast_with_non_numeric_year_is_unprocessable() {
        let app = test_app();
        let text = format!("{}합계,1,1000,500\n", SAMPLE);

        let response = app
            .clone()
            .oneshot(multipart_request("file", &text))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/finance/calcForecastMonthlySupportForBank")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "bankName": "국민은행", "month": "1" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert!(body.get("result").is_none());
        assert!(body["error"].as_str().unwrap().contains("합계"));
    }
}
