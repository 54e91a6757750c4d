use std::{collections::HashMap, path::PathBuf, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use image::RgbImage;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::codec;
use crate::error::AppError;
use crate::generator::AutomaticMaskGenerator;
use crate::model::{Prediction, Prompt, SegmentModel};
use crate::ranker;
use crate::shared::{BoxPrompt, CompressedMask, HelloResponse, MaskRecord, MasksResponse, Point, Points};

/// Model handle shared by all requests; one prediction runs at a time.
pub type SharedModel = Arc<Mutex<dyn SegmentModel>>;

#[derive(Clone)]
pub struct AppState {
    model: SharedModel,
    generator: Arc<AutomaticMaskGenerator>,
    max_masks: Option<usize>,
}

impl AppState {
    pub fn new(model: SharedModel, generator: AutomaticMaskGenerator, max_masks: Option<usize>) -> Self {
        Self {
            model,
            generator: Arc::new(generator),
            max_masks,
        }
    }
}

#[allow(dead_code)]
#[derive(ToSchema)]
struct PointUpload {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    /// JSON-encoded `Points`.
    #[schema(example = r#"{"points":[{"x":320,"y":240}],"points_labels":[1]}"#)]
    points: String,
}

#[allow(dead_code)]
#[derive(ToSchema)]
struct BoxUpload {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    /// JSON-encoded `BoxPrompt`.
    #[schema(rename = "box", example = r#"{"x1":10,"y1":20,"x2":200,"y2":180}"#)]
    bbox: String,
}

#[allow(dead_code)]
#[derive(ToSchema)]
struct ImageUpload {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(OpenApi)]
#[openapi(
    paths(index, point, bbox, everything),
    components(schemas(
        HelloResponse,
        MasksResponse,
        MaskRecord,
        CompressedMask,
        Points,
        Point,
        BoxPrompt,
        PointUpload,
        BoxUpload,
        ImageUpload
    ))
)]
struct ApiDoc;

#[utoipa::path(
    get,
    path = "/",
    tag = "Health",
    responses((status = 200, description = "Service is up", body = HelloResponse))
)]
async fn index() -> Json<HelloResponse> {
    Json(HelloResponse {
        code: 0,
        data: "Hello World".into(),
    })
}

#[utoipa::path(
    post,
    path = "/api/point",
    tag = "Segmentation",
    summary = "Segment from click prompts",
    description = "Returns every mask candidate for the clicks, highest stability score first.",
    request_body(content = PointUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Ranked masks", body = MasksResponse),
        (status = 400, description = "Bad image or prompt")
    )
)]
async fn point(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<MasksResponse>, AppError> {
    let request_id = Uuid::new_v4();
    let mut form = UploadForm::read(multipart).await?;
    let file = form.take_file()?;
    let raw = form.take_field("points")?;
    let points: Points = serde_json::from_str(&raw)
        .map_err(|e| AppError::BadRequest(format!("invalid points: {e}")))?;
    let prompt = Prompt::try_from(&points).map_err(|e| AppError::BadRequest(e.to_string()))?;
    info!(%request_id, "point: points={}", prompt.coords.len());

    let image = decode_image(&file)?;
    let records = predict_records(&state, image, prompt, true).await?;
    Ok(Json(finish(&state, request_id, records)))
}

#[utoipa::path(
    post,
    path = "/api/box",
    tag = "Segmentation",
    summary = "Segment from a bounding box",
    description = "Prompts with the box and its centre point; returns the single best mask.",
    request_body(content = BoxUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Ranked masks", body = MasksResponse),
        (status = 400, description = "Bad image or prompt")
    )
)]
async fn bbox(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<MasksResponse>, AppError> {
    let request_id = Uuid::new_v4();
    let mut form = UploadForm::read(multipart).await?;
    let file = form.take_file()?;
    let raw = form.take_field("box")?;
    let b: BoxPrompt = serde_json::from_str(&raw)
        .map_err(|e| AppError::BadRequest(format!("invalid box: {e}")))?;
    info!(%request_id, "box: {:?}", b);

    let image = decode_image(&file)?;
    let records = predict_records(&state, image, Prompt::from_box(&b), false).await?;
    Ok(Json(finish(&state, request_id, records)))
}

#[utoipa::path(
    post,
    path = "/api/everything",
    tag = "Segmentation",
    summary = "Segment everything",
    description = "Prompts with a grid of points and keeps confident, stable, non-overlapping masks.",
    request_body(content = ImageUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Ranked masks", body = MasksResponse),
        (status = 400, description = "Bad image")
    )
)]
async fn everything(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<MasksResponse>, AppError> {
    let request_id = Uuid::new_v4();
    let mut form = UploadForm::read(multipart).await?;
    let file = form.take_file()?;
    info!(%request_id, "everything: points_per_side={}", state.generator.config().points_per_side);

    let image = decode_image(&file)?;
    let model = Arc::clone(&state.model).lock_owned().await;
    let generator = Arc::clone(&state.generator);
    let records = tokio::task::spawn_blocking(move || {
        let mut model = model;
        generator.generate(&mut *model, &image)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
    .map_err(internal)?;
    Ok(Json(finish(&state, request_id, records)))
}

/// Run one prompt against the shared model off the async runtime.
async fn predict_records(
    state: &AppState,
    image: RgbImage,
    prompt: Prompt,
    multimask: bool,
) -> Result<Vec<MaskRecord>, AppError> {
    let model = Arc::clone(&state.model).lock_owned().await;
    let prediction = tokio::task::spawn_blocking(move || -> anyhow::Result<Prediction> {
        let mut model = model;
        model.set_image(&image)?;
        model.predict(&prompt, multimask)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
    .map_err(internal)?;
    Ok(records_from_prediction(prediction))
}

/// Compress each predicted mask into a record. The bbox is left as a
/// placeholder on this path.
pub fn records_from_prediction(prediction: Prediction) -> Vec<MaskRecord> {
    prediction
        .masks
        .iter()
        .zip(&prediction.scores)
        .map(|(mask, &score)| MaskRecord {
            segmentation: codec::encode_mask(mask.view()),
            stability_score: score as f64,
            bbox: [0, 0, 0, 0],
            area: codec::area(mask.view()),
            predicted_iou: None,
            point_coords: None,
            crop_box: None,
        })
        .collect()
}

fn finish(state: &AppState, request_id: Uuid, records: Vec<MaskRecord>) -> MasksResponse {
    let ranked = match state.max_masks {
        Some(k) => ranker::top_k(records, k),
        None => ranker::rank(records),
    };
    info!(%request_id, "returning {} masks", ranked.len());
    MasksResponse::ok(ranked)
}

fn decode_image(bytes: &[u8]) -> Result<RgbImage, AppError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| AppError::BadRequest(format!("invalid image: {e}")))?;
    Ok(img.to_rgb8())
}

fn internal(e: anyhow::Error) -> AppError {
    error!("model failure: {e:#}");
    AppError::Internal(e.to_string())
}

/// Multipart body: the uploaded `file` plus any text fields.
#[derive(Default)]
struct UploadForm {
    file: Option<Bytes>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(format!("invalid multipart: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("invalid file: {e}")))?;
                form.file = Some(bytes);
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("invalid field {name}: {e}")))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    fn take_file(&mut self) -> Result<Bytes, AppError> {
        self.file
            .take()
            .ok_or_else(|| AppError::BadRequest("missing file".into()))
    }

    fn take_field(&mut self, name: &str) -> Result<String, AppError> {
        self.fields
            .remove(name)
            .ok_or_else(|| AppError::BadRequest(format!("missing field {name}")))
    }
}

/// Routes, docs and middleware. Metrics are attached by the binary.
pub fn build_router(state: AppState, static_dir: Option<PathBuf>, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route("/point", post(point))
        .route("/box", post(bbox))
        .route("/everything", post(everything));

    let mut app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(index))
        .nest("/api", api_router);
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
