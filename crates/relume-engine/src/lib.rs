use std::env;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat, Rgb, RgbImage};
use relume_contracts::events::{EventPayload, EventWriter};
use relume_contracts::history::{ResultHistory, ResultItem, ResultKind, EDITED_LABEL, ORIGINAL_LABEL};
use relume_contracts::prompts::{default_prompt, CustomPromptRegistry, PromptStore};
use relume_contracts::session::{ComparisonMode, Dimensions, ImageRef, PromptMode};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub const GENERATION_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const COOLDOWN_SECONDS: u64 = 60;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT_S: u64 = 90;
const DIMENSION_LOAD_ERROR: &str = "Could not load image properties.";

/// One restoration attempt's failure, classified so the session layer can
/// react per kind. Each variant's `Display` is the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("Request was blocked: {0}. Please adjust your prompt or image.")]
    Blocked(String),
    #[error("The model did not return any content. Please try a different prompt.")]
    Empty,
    #[error("The model returned text instead of an image: \"{0}\"")]
    TextOnly(String),
    #[error("The model did not return an image. Please try a different prompt.")]
    NoImage,
    #[error("You have exceeded your API quota. To prevent further errors, generation is disabled for 60 seconds.")]
    Quota,
    #[error("API error: {0}")]
    Api(String),
}

impl GenerateError {
    pub fn is_quota(&self) -> bool {
        matches!(self, GenerateError::Quota)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerateError::Blocked(_) => "blocked",
            GenerateError::Empty => "empty",
            GenerateError::TextOnly(_) => "text_only",
            GenerateError::NoImage => "no_image",
            GenerateError::Quota => "quota",
            GenerateError::Api(_) => "api",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredImage {
    pub image_url: String,
    pub mime_type: String,
}

/// Remote image-to-image restoration service. One outstanding call per
/// invocation; retry policy, if any, belongs to the caller.
pub trait RestorationModel {
    fn restore(
        &self,
        image_base64: &str,
        mime_type: &str,
        prompt: &str,
    ) -> std::result::Result<RestoredImage, GenerateError>;
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: api_key.into(),
            http: HttpClient::new(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let Some(api_key) = non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
        else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        Ok(Self::new(api_key))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base, GENERATION_MODEL
        )
    }

    fn build_payload(image_base64: &str, mime_type: &str, prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"inlineData": {"data": image_base64, "mimeType": mime_type}},
                    {"text": prompt},
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
            },
        })
    }
}

impl RestorationModel for GeminiClient {
    fn restore(
        &self,
        image_base64: &str,
        mime_type: &str,
        prompt: &str,
    ) -> std::result::Result<RestoredImage, GenerateError> {
        let endpoint = self.endpoint();
        let payload = Self::build_payload(image_base64, mime_type, prompt);
        log::debug!("posting generation request to {endpoint}");

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .json(&payload)
            .send()
            .map_err(|err| {
                let detail = err.to_string();
                if is_quota_text(&detail) {
                    GenerateError::Quota
                } else {
                    GenerateError::Api(detail)
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| GenerateError::Api(format!("response body read failed: {err}")))?;
        if !status.is_success() {
            return Err(classify_http_failure(status.as_u16(), &body));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|_| GenerateError::Api("Gemini returned an invalid JSON payload".to_string()))?;
        parse_generate_response(&parsed, mime_type)
    }
}

/// Classifies a non-2xx response. Quota exhaustion must stay distinguishable
/// so the session can arm its cooldown.
fn classify_http_failure(code: u16, body: &str) -> GenerateError {
    if code == 429 || is_quota_text(body) {
        return GenerateError::Quota;
    }
    GenerateError::Api(format!(
        "Gemini request failed ({code}): {}",
        truncate_text(body, 512)
    ))
}

fn is_quota_text(text: &str) -> bool {
    text.contains("RESOURCE_EXHAUSTED") || text.to_ascii_lowercase().contains("quota")
}

/// Pure classification of a decoded `generateContent` payload: the first
/// inline image part wins; otherwise the failure kind is derived from block
/// reason, text parts, or their absence.
fn parse_generate_response(
    payload: &Value,
    request_mime: &str,
) -> std::result::Result<RestoredImage, GenerateError> {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if candidates.is_empty() {
        if let Some(reason) = payload
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
        {
            return Err(GenerateError::Blocked(reason.to_string()));
        }
        return Err(GenerateError::Empty);
    }

    let mut texts = Vec::new();
    for candidate in &candidates {
        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !data.is_empty() {
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .filter(|mime| !mime.is_empty())
                    .unwrap_or(request_mime)
                    .to_string();
                return Ok(RestoredImage {
                    image_url: format!("data:{mime_type};base64,{data}"),
                    mime_type,
                });
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    texts.push(trimmed.to_string());
                }
            }
        }
    }

    if !texts.is_empty() {
        return Err(GenerateError::TextOnly(texts.join(" ")));
    }
    Err(GenerateError::NoImage)
}

/// Offline stand-in for the remote model: returns a solid-color image at the
/// source's dimensions, with the color derived from the prompt. Lets the CLI
/// and tests exercise the whole session loop without an API key.
#[derive(Debug, Default)]
pub struct DryRunModel;

impl RestorationModel for DryRunModel {
    fn restore(
        &self,
        image_base64: &str,
        _mime_type: &str,
        prompt: &str,
    ) -> std::result::Result<RestoredImage, GenerateError> {
        let (width, height) = BASE64
            .decode(image_base64.as_bytes())
            .ok()
            .and_then(|bytes| image::load_from_memory(&bytes).ok())
            .map(|decoded| decoded.dimensions())
            .unwrap_or((512, 512));

        let (r, g, b) = color_from_prompt(prompt);
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }

        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| GenerateError::Api(format!("dry-run encode failed: {err}")))?;

        Ok(RestoredImage {
            image_url: build_data_url("image/png", &bytes),
            mime_type: "image/png".to_string(),
        })
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// Wall-clock port. The session only ever reads milliseconds since the
/// epoch, which keeps the cooldown deterministic under test.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-cranked clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Image decode port: given a data URL, report pixel dimensions.
pub trait ImageInspector {
    fn dimensions(&self, data_url: &str) -> Result<Dimensions>;
}

/// Decodes the payload with the `image` crate.
#[derive(Debug, Default)]
pub struct DecodingInspector;

impl ImageInspector for DecodingInspector {
    fn dimensions(&self, data_url: &str) -> Result<Dimensions> {
        let (_, bytes) = decode_data_url(data_url)?;
        let decoded = image::load_from_memory(&bytes).context("failed to decode image payload")?;
        let (width, height) = decoded.dimensions();
        Ok(Dimensions { width, height })
    }
}

/// `max(0, ceil((cooldown_end - now) / 1000))`, in whole seconds.
pub fn remaining_seconds(cooldown_end: u64, now: u64) -> u64 {
    cooldown_end.saturating_sub(now).div_ceil(1000)
}

pub fn build_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and the still
/// encoded payload.
pub fn split_data_url(data_url: &str) -> Result<(String, String)> {
    let rest = data_url
        .strip_prefix("data:")
        .context("not a data URL")?;
    let (mime_type, payload) = rest
        .split_once(";base64,")
        .context("data URL is not base64-encoded")?;
    if mime_type.is_empty() || payload.is_empty() {
        bail!("data URL is missing its MIME type or payload");
    }
    Ok((mime_type.to_string(), payload.to_string()))
}

pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let (mime_type, payload) = split_data_url(data_url)?;
    let bytes = BASE64
        .decode(payload.as_bytes())
        .context("data URL base64 decode failed")?;
    Ok((mime_type, bytes))
}

pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let lowered = mime_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

fn image_digest(data_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data_url.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaledImage {
    pub image_url: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

/// Doubles the image's dimensions with a smooth filter and applies the
/// subtle contrast/brightness lift the upscale view promises. JPEG sources
/// re-encode as JPEG; everything else falls back to PNG.
pub fn upscale_2x(data_url: &str) -> Result<UpscaledImage> {
    let (mime_type, bytes) = decode_data_url(data_url)?;
    let decoded = image::load_from_memory(&bytes).context("failed to decode image for upscaling")?;
    let (width, height) = decoded.dimensions();
    let upscaled = decoded
        .resize_exact(width * 2, height * 2, FilterType::CatmullRom)
        .adjust_contrast(5.0)
        .brighten(4);

    let mut out = Vec::new();
    let out_mime = if extension_for_mime(&mime_type) == "jpg" {
        let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), 100);
        upscaled
            .to_rgb8()
            .write_with_encoder(encoder)
            .context("failed to encode upscaled JPEG")?;
        "image/jpeg"
    } else {
        upscaled
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .context("failed to encode upscaled PNG")?;
        "image/png"
    };

    Ok(UpscaledImage {
        image_url: build_data_url(out_mime, &out),
        mime_type: out_mime.to_string(),
        width: width * 2,
        height: height * 2,
    })
}

/// What a generation attempt came to.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// Silently rejected: no image, already in flight, or cooling down.
    Skipped,
    Completed(ResultItem),
    Failed(GenerateError),
}

/// Payload handed to the model for one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub image_base64: String,
    pub mime_type: String,
    pub prompt: String,
}

/// Owns one photo-editing session: the uploaded original, the image the
/// next request will start from, the bounded result history, prompt and
/// comparison state, the quota cooldown, and dimension bookkeeping.
///
/// All collaborators that would touch a runtime (network, decoding, wall
/// clock, persistence) come in through ports; every transition is mirrored
/// onto the event stream.
pub struct SessionOrchestrator {
    session_id: String,
    original_image: Option<ImageRef>,
    processing_image: Option<ImageRef>,
    history: ResultHistory,
    prompt: String,
    prompt_mode: PromptMode,
    comparison_mode: ComparisonMode,
    loading: bool,
    error: Option<String>,
    quota_cooldown_end: Option<u64>,
    before_dimensions: Option<Dimensions>,
    after_dimensions: Option<Dimensions>,
    selection_epoch: u64,
    custom_prompts: CustomPromptRegistry,
    events: EventWriter,
    inspector: Box<dyn ImageInspector>,
    clock: Arc<dyn Clock>,
}

impl SessionOrchestrator {
    pub fn new(
        events_path: impl Into<std::path::PathBuf>,
        prompt_store: Box<dyn PromptStore>,
        inspector: Box<dyn ImageInspector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let session_id = format!("session-{}", Uuid::new_v4());
        let events = EventWriter::new(events_path.into(), session_id.clone());
        events.emit(
            "session_started",
            map_object(json!({ "model": GENERATION_MODEL })),
        )?;

        Ok(Self {
            session_id,
            original_image: None,
            processing_image: None,
            history: ResultHistory::new(),
            prompt: default_prompt().to_string(),
            prompt_mode: PromptMode::Retouch,
            comparison_mode: ComparisonMode::Slider,
            loading: false,
            error: None,
            quota_cooldown_end: None,
            before_dimensions: None,
            after_dimensions: None,
            selection_epoch: 0,
            custom_prompts: CustomPromptRegistry::load(prompt_store),
            events,
            inspector,
            clock,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    /// Resets the whole session and adopts the uploaded image as both the
    /// original and the next request's input, represented in the history by
    /// a synthetic entry that is its own source.
    pub fn upload_image(&mut self, data_url: &str, mime_type: &str) -> Result<()> {
        self.reset_state();
        let image = ImageRef::new(data_url, mime_type);
        self.original_image = Some(image.clone());
        self.processing_image = Some(image);

        let item = self.history.push(
            ResultKind::Original,
            data_url,
            mime_type,
            ORIGINAL_LABEL,
            Some(data_url.to_string()),
        );
        self.events.emit(
            "image_uploaded",
            map_object(json!({
                "mime": mime_type,
                "digest": image_digest(data_url),
            })),
        )?;
        self.apply_selection(&item.id)
    }

    /// First phase of a generation attempt. Returns `None` without touching
    /// any state when there is nothing to send, a request is already in
    /// flight, or the quota cooldown has not expired.
    pub fn begin_generation(&mut self) -> Result<Option<GenerationRequest>> {
        let Some(image) = self.processing_image.clone() else {
            return Ok(None);
        };
        if self.loading {
            return Ok(None);
        }
        if let Some(end) = self.quota_cooldown_end {
            if self.clock.now_millis() < end {
                return Ok(None);
            }
        }

        let (_, image_base64) = split_data_url(&image.data_url)?;
        self.loading = true;
        self.error = None;
        self.events.emit(
            "generation_started",
            map_object(json!({
                "prompt": self.prompt,
                "mode": self.prompt_mode.as_str(),
            })),
        )?;
        Ok(Some(GenerationRequest {
            image_base64,
            mime_type: image.mime_type,
            prompt: self.prompt.clone(),
        }))
    }

    /// Applies a successful generation: the new result is prepended (history
    /// enforces the cap), becomes the next request's input, and is selected.
    /// Single-view comparison reverts to the slider; single is reserved for
    /// edit results.
    pub fn complete_generation(&mut self, restored: RestoredImage) -> Result<ResultItem> {
        self.loading = false;
        let source = self
            .processing_image
            .as_ref()
            .map(|image| image.data_url.clone());
        let item = self.history.push(
            ResultKind::Generated,
            restored.image_url.clone(),
            restored.mime_type.clone(),
            self.prompt.clone(),
            source,
        );
        self.processing_image = Some(ImageRef::new(item.image_url.clone(), item.mime_type.clone()));
        if self.comparison_mode == ComparisonMode::Single {
            self.comparison_mode = ComparisonMode::Slider;
        }
        self.events.emit(
            "generation_succeeded",
            map_object(json!({
                "result_id": item.id,
                "mime": item.mime_type,
                "digest": image_digest(&item.image_url),
            })),
        )?;
        self.apply_selection(&item.id)?;
        Ok(item)
    }

    /// Applies a failed generation: the error becomes the displayable
    /// message, and a quota failure (only that kind) arms the cooldown.
    pub fn fail_generation(&mut self, err: &GenerateError) -> Result<()> {
        self.loading = false;
        self.error = Some(err.to_string());
        self.events.emit(
            "generation_failed",
            map_object(json!({
                "kind": err.kind(),
                "message": err.to_string(),
            })),
        )?;
        if err.is_quota() {
            let end = self.clock.now_millis() + COOLDOWN_SECONDS * 1000;
            self.quota_cooldown_end = Some(end);
            self.events.emit(
                "cooldown_armed",
                map_object(json!({ "until_ms": end })),
            )?;
        }
        Ok(())
    }

    /// Drives one full attempt against the given model.
    pub fn request_generation(&mut self, model: &dyn RestorationModel) -> Result<GenerationOutcome> {
        let Some(request) = self.begin_generation()? else {
            return Ok(GenerationOutcome::Skipped);
        };
        match model.restore(&request.image_base64, &request.mime_type, &request.prompt) {
            Ok(restored) => {
                let item = self.complete_generation(restored)?;
                Ok(GenerationOutcome::Completed(item))
            }
            Err(err) => {
                self.fail_generation(&err)?;
                Ok(GenerationOutcome::Failed(err))
            }
        }
    }

    /// Promotes a result to be the next request's input. Reusing a result
    /// implies the next operation reimagines rather than retouches.
    pub fn use_result_as_source(&mut self, id: &str) -> Result<bool> {
        let Some(item) = self.history.get(id).cloned() else {
            return Ok(false);
        };
        self.processing_image = Some(ImageRef::new(item.image_url.clone(), item.mime_type.clone()));
        self.prompt_mode = PromptMode::Reimagine;
        self.events.emit(
            "source_promoted",
            map_object(json!({ "result_id": item.id })),
        )?;
        self.apply_selection(&item.id)?;
        Ok(true)
    }

    /// Points the next request back at the uploaded original and re-selects
    /// its synthetic history entry.
    pub fn reset_to_original(&mut self) -> Result<()> {
        let Some(original) = self.original_image.clone() else {
            return Ok(());
        };
        self.processing_image = Some(original);
        if let Some(item) = self.history.original().cloned() {
            self.apply_selection(&item.id)?;
        }
        Ok(())
    }

    /// Selects a result for display. Edit results are always shown alone;
    /// anything else leaves single view for the slider.
    pub fn select_for_view(&mut self, id: &str) -> Result<bool> {
        let Some(item) = self.history.get(id).cloned() else {
            return Ok(false);
        };
        if item.prompt == EDITED_LABEL {
            self.comparison_mode = ComparisonMode::Single;
        } else if self.comparison_mode == ComparisonMode::Single {
            self.comparison_mode = ComparisonMode::Slider;
        }
        self.apply_selection(&item.id)?;
        Ok(true)
    }

    /// Adopts a locally edited image as a new result. Edits are shown
    /// without a before/after comparison.
    pub fn record_edit(&mut self, data_url: &str, mime_type: &str) -> Result<ResultItem> {
        let source = self
            .processing_image
            .as_ref()
            .map(|image| image.data_url.clone());
        let item = self.history.push(
            ResultKind::Edited,
            data_url,
            mime_type,
            EDITED_LABEL,
            source,
        );
        self.processing_image = Some(ImageRef::new(data_url, mime_type));
        self.comparison_mode = ComparisonMode::Single;
        self.events.emit(
            "edit_recorded",
            map_object(json!({
                "result_id": item.id,
                "digest": image_digest(data_url),
            })),
        )?;
        self.apply_selection(&item.id)?;
        Ok(item)
    }

    /// Returns every session field to its initial value, including an armed
    /// cooldown.
    pub fn clear_all(&mut self) -> Result<()> {
        self.reset_state();
        self.events.emit("session_cleared", EventPayload::new())?;
        Ok(())
    }

    /// ≈1 Hz poll: reports the remaining cooldown and self-clears it once
    /// expired.
    pub fn tick(&mut self) -> u64 {
        let Some(end) = self.quota_cooldown_end else {
            return 0;
        };
        let remaining = remaining_seconds(end, self.clock.now_millis());
        if remaining == 0 {
            self.quota_cooldown_end = None;
        }
        remaining
    }

    pub fn is_quota_limited(&self) -> bool {
        self.quota_cooldown_end
            .map(|end| self.clock.now_millis() < end)
            .unwrap_or(false)
    }

    pub fn quota_cooldown_end(&self) -> Option<u64> {
        self.quota_cooldown_end
    }

    /// Commits asynchronously probed dimensions. A commit from a superseded
    /// selection (stale epoch) is dropped so it cannot overwrite the state
    /// of a newer selection.
    pub fn commit_dimensions(
        &mut self,
        epoch: u64,
        before: Option<Dimensions>,
        after: Option<Dimensions>,
    ) {
        if epoch != self.selection_epoch {
            return;
        }
        self.before_dimensions = before;
        self.after_dimensions = after;
    }

    pub fn selection_epoch(&self) -> u64 {
        self.selection_epoch
    }

    pub fn add_custom_prompt(&mut self, prompt: &str) -> bool {
        self.custom_prompts.add(self.prompt_mode, prompt)
    }

    pub fn delete_custom_prompt(&mut self, prompt: &str) -> bool {
        self.custom_prompts.delete(self.prompt_mode, prompt)
    }

    pub fn custom_prompts(&self) -> Vec<String> {
        self.custom_prompts.list(self.prompt_mode)
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn set_prompt_mode(&mut self, mode: PromptMode) {
        self.prompt_mode = mode;
    }

    pub fn prompt_mode(&self) -> PromptMode {
        self.prompt_mode
    }

    pub fn set_comparison_mode(&mut self, mode: ComparisonMode) {
        self.comparison_mode = mode;
    }

    pub fn comparison_mode(&self) -> ComparisonMode {
        self.comparison_mode
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn original_image(&self) -> Option<&ImageRef> {
        self.original_image.as_ref()
    }

    pub fn processing_image(&self) -> Option<&ImageRef> {
        self.processing_image.as_ref()
    }

    pub fn has_image(&self) -> bool {
        self.original_image.is_some()
    }

    pub fn is_processing_original(&self) -> bool {
        match (&self.original_image, &self.processing_image) {
            (Some(original), Some(processing)) => original.data_url == processing.data_url,
            _ => false,
        }
    }

    pub fn results(&self) -> &[ResultItem] {
        self.history.items()
    }

    pub fn result(&self, id: &str) -> Option<&ResultItem> {
        self.history.get(id)
    }

    pub fn selected_result(&self) -> Option<&ResultItem> {
        self.history.selected()
    }

    pub fn before_dimensions(&self) -> Option<Dimensions> {
        self.before_dimensions
    }

    pub fn after_dimensions(&self) -> Option<Dimensions> {
        self.after_dimensions
    }

    /// The dimensions shown for the current image: the result's own, or its
    /// source's when the result itself could not be probed.
    pub fn image_dimensions(&self) -> Option<Dimensions> {
        self.after_dimensions.or(self.before_dimensions)
    }

    fn reset_state(&mut self) {
        self.original_image = None;
        self.processing_image = None;
        self.history.clear();
        self.prompt = default_prompt().to_string();
        self.prompt_mode = PromptMode::Retouch;
        self.comparison_mode = ComparisonMode::Slider;
        self.loading = false;
        self.error = None;
        self.quota_cooldown_end = None;
        self.before_dimensions = None;
        self.after_dimensions = None;
        // Supersede any in-flight dimension probe from the old session.
        self.selection_epoch += 1;
    }

    /// Selects a result and recomputes its before/after dimensions. Stale
    /// values are cleared before probing starts so they are never displayed
    /// against the wrong selection.
    fn apply_selection(&mut self, id: &str) -> Result<()> {
        let Some(item) = self.history.select(id).cloned() else {
            return Ok(());
        };
        self.selection_epoch += 1;
        self.before_dimensions = None;
        self.after_dimensions = None;
        let epoch = self.selection_epoch;

        let before_url = item
            .source_image_url
            .clone()
            .or_else(|| self.original_image.as_ref().map(|image| image.data_url.clone()));
        let probed = self.probe_pair(before_url.as_deref(), &item.image_url);
        match probed {
            Ok((before, after)) => self.commit_dimensions(epoch, before, after),
            Err(err) => {
                log::warn!("dimension probe failed for {}: {err:#}", item.id);
                self.error = Some(DIMENSION_LOAD_ERROR.to_string());
            }
        }

        self.events.emit(
            "result_selected",
            map_object(json!({ "result_id": item.id })),
        )?;
        Ok(())
    }

    fn probe_pair(
        &self,
        before_url: Option<&str>,
        after_url: &str,
    ) -> Result<(Option<Dimensions>, Option<Dimensions>)> {
        let before = before_url
            .map(|url| self.inspector.dimensions(url))
            .transpose()?;
        let after = Some(self.inspector.dimensions(after_url)?);
        Ok((before, after))
    }
}
