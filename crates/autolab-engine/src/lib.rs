use std::env;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use autolab_contracts::errors::SessionError;
use autolab_contracts::events::{EventPayload, SessionLog};
use autolab_contracts::models::{ModelRegistry, CAP_IMAGE, CAP_TEXT};
use autolab_contracts::presets::{apply_preset, StylePreset};
use autolab_contracts::session::{
    GeneratedImage, ImageBlob, SessionState, MAX_REFERENCE_IMAGES,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;

/// Per-session configuration. The API key may come from the surface (a
/// settings input) or fall back to the environment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_key: Option<String>,
    pub image_model: String,
    pub text_model: String,
    pub request_timeout_s: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
        }
    }
}

impl SessionConfig {
    /// Explicit key first, then `GEMINI_API_KEY` / `GOOGLE_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }
}

/// Text-rewrite request for the prompt enhancer.
#[derive(Debug, Clone)]
pub struct EnhanceRequest {
    pub prompt: String,
    pub model: String,
    pub aspect_ratio: String,
    pub preset_label: Option<String>,
    pub reference_image_count: usize,
}

/// One multimodal generation request: the composed prompt plus up to three
/// reference images in priority order.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub model: String,
    pub images: Vec<ImageBlob>,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub images: Vec<GeneratedImage>,
    pub warnings: Vec<String>,
}

/// The two outbound capabilities the session depends on. Injected so the
/// controller can run against a scripted double without network access.
pub trait GenerativeService: Send + Sync {
    fn name(&self) -> &str;
    /// Whether calls need a configured API credential. Hosted backends do;
    /// offline implementations opt out so a keyless session still works.
    fn requires_api_key(&self) -> bool {
        true
    }
    fn enhance(&self, request: &EnhanceRequest) -> Result<String>;
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;
}

// ---------------------------------------------------------------------------
// Prompt composition
// ---------------------------------------------------------------------------

/// Builds the exact text submitted to the generation service: the draft, a
/// blank line, the fixed guidance clause, and a seed clause only when the
/// seed is nonzero.
pub fn compose_submission_prompt(draft: &str, aspect_ratio: &str, seed: u64) -> String {
    let guide = format!(
        "Aspect ratio {aspect_ratio}. Return only images, no text. \
         If multiple variations requested, produce 1 image."
    );
    let seed_clause = if seed != 0 {
        format!(" Seed: {seed}.")
    } else {
        String::new()
    };
    format!("{draft}\n\n{guide}{seed_clause}").trim().to_string()
}

fn enhancement_directive() -> &'static str {
    "You are an expert creative director for automotive marketing shots. \
     Rewrite and optimize the user's prompt for image generation. \
     Keep it concise but richly descriptive (camera, lighting, scene, materials, reflections). \
     Enforce brand-friendly composition with clean negative space for CTA if relevant. \
     Return ONLY the improved prompt, no commentary."
}

fn enhancement_context(request: &EnhanceRequest) -> String {
    let mut context = format!(
        "Aspect ratio: {}. If applicable: crisp details, natural reflections on paint, \
         realistic shadows, no text baked into the image, avoid watermarks, editorial quality.",
        request.aspect_ratio
    );
    if let Some(label) = request
        .preset_label
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
    {
        context.push_str(&format!(" Style preset: {label}."));
    }
    if request.reference_image_count > 0 {
        context.push_str(&format!(
            " The user attached {} reference image(s) in priority order; respect their subject and styling.",
            request.reference_image_count
        ));
    }
    context
}

// ---------------------------------------------------------------------------
// Gemini backend
// ---------------------------------------------------------------------------

/// Blocking client for the Gemini `generateContent` endpoint, used for both
/// image generation and prompt rewriting. One call per action, run to
/// completion or failure; the timeout lives in the transport, not the
/// session.
pub struct GeminiService {
    api_base: String,
    api_key: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiService {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_timeout(api_key, DEFAULT_REQUEST_TIMEOUT_S)
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout_s: f64) -> Self {
        Self {
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: api_key.into(),
            timeout: Duration::from_secs_f64(timeout_s.clamp(5.0, 600.0)),
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post(&self, endpoint: &str, payload: &Value) -> Result<HttpResponse> {
        self.http
            .post(endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))
    }
}

impl GenerativeService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    fn enhance(&self, request: &EnhanceRequest) -> Result<String> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": enhancement_directive() },
                    { "text": enhancement_context(request) },
                    { "text": format!("Original prompt: {}", request.prompt) },
                ],
            }],
        });

        let response = self.post(&endpoint, &payload)?;
        let parsed = response_json_or_error("Gemini", response)?;
        let text = extract_text(&parsed)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("Gemini enhancement returned no text")?;
        Ok(text)
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let endpoint = self.endpoint_for_model(&request.model);
        let mut parts: Vec<Value> = request.images.iter().map(inline_image_part).collect();
        parts.push(json!({ "text": request.prompt }));
        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
            },
        });

        let response = self.post(&endpoint, &payload)?;
        let parsed = response_json_or_error("Gemini", response)?;
        let mut warnings = Vec::new();
        let images = extract_generated_images(&parsed, &mut warnings);
        Ok(GenerateResponse { images, warnings })
    }
}

fn inline_image_part(image: &ImageBlob) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": BASE64.encode(&image.bytes),
        }
    })
}

/// Scans every candidate content part for inline image payloads. Parts with
/// a non-image mime type, a bad base64 payload, or bytes that do not decode
/// as an image are skipped with a warning; one bad part never fails the
/// whole response.
fn extract_generated_images(payload: &Value, warnings: &mut Vec<String>) -> Vec<GeneratedImage> {
    let mut out = Vec::new();
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !mime_type.starts_with("image") {
                continue;
            }
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = match BASE64.decode(data.as_bytes()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    push_unique_warning(
                        warnings,
                        format!("Returned image couldn't be decoded: {err}"),
                    );
                    continue;
                }
            };
            if let Err(err) = image::load_from_memory(&bytes) {
                push_unique_warning(
                    warnings,
                    format!("Returned image couldn't be decoded: {err}"),
                );
                continue;
            }
            out.push(GeneratedImage {
                bytes,
                mime_type: Some(mime_type.to_string()),
            });
        }
    }
    out
}

/// Concatenates the text parts of the first candidate.
fn extract_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            out.push_str(text);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

// ---------------------------------------------------------------------------
// Offline backend
// ---------------------------------------------------------------------------

/// Keyless, networkless stand-in: renders one solid-color PNG whose color is
/// derived from the prompt, and echoes the prompt back from the enhancer.
/// Deterministic, so demos and tests get stable output.
pub struct OfflineService;

impl OfflineService {
    fn frame_bytes(prompt: &str) -> Result<Vec<u8>> {
        let (r, g, b) = color_from_prompt(prompt);
        let mut frame = RgbImage::new(512, 512);
        for pixel in frame.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Cursor::new(Vec::new());
        frame
            .write_to(&mut bytes, ImageFormat::Png)
            .context("failed to encode placeholder frame")?;
        Ok(bytes.into_inner())
    }
}

impl GenerativeService for OfflineService {
    fn name(&self) -> &str {
        "offline"
    }

    fn requires_api_key(&self) -> bool {
        false
    }

    fn enhance(&self, request: &EnhanceRequest) -> Result<String> {
        Ok(format!(
            "{} Shot at {} with cinematic light, crisp paint reflections, editorial quality.",
            request.prompt.trim(),
            request.aspect_ratio
        ))
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        Ok(GenerateResponse {
            images: vec![GeneratedImage {
                bytes: Self::frame_bytes(&request.prompt)?,
                mime_type: Some("image/png".to_string()),
            }],
            warnings: Vec::new(),
        })
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

// ---------------------------------------------------------------------------
// Session controller
// ---------------------------------------------------------------------------

/// Summary of one successful generation, for the surface to report.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub image_count: usize,
    pub warnings: Vec<String>,
    pub submitted_prompt: String,
}

/// Owns all mutable state for one user session and mediates between the
/// surface and the generative service. One action at a time: every
/// transition takes `&mut self`, so a session can never interleave calls.
pub struct SessionController {
    config: SessionConfig,
    state: SessionState,
    service: Box<dyn GenerativeService>,
    registry: ModelRegistry,
    log: SessionLog,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        service: Box<dyn GenerativeService>,
        events_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let registry = ModelRegistry::default();
        if registry.ensure(&config.image_model, CAP_IMAGE).is_none() {
            bail!(
                "model '{}' is not a known image model",
                config.image_model
            );
        }
        if registry.ensure(&config.text_model, CAP_TEXT).is_none() {
            bail!("model '{}' is not a known text model", config.text_model);
        }

        let session_id = Uuid::new_v4().to_string();
        let log = SessionLog::new(events_path.into(), session_id);
        log.emit(
            "session_started",
            payload(json!({
                "service": service.name(),
                "image_model": config.image_model,
                "text_model": config.text_model,
            })),
        )?;

        Ok(Self {
            config,
            state: SessionState::new(),
            service,
            registry,
            log,
        })
    }

    /// Controller wired to the live Gemini backend, using the configured or
    /// environment-supplied key. Fails when neither exists.
    pub fn gemini(config: SessionConfig, events_path: impl Into<PathBuf>) -> Result<Self> {
        let Some(api_key) = config.resolved_api_key() else {
            bail!("{}", SessionError::MissingApiKey);
        };
        let service = GeminiService::with_timeout(api_key, config.request_timeout_s);
        Self::new(config, Box::new(service), events_path)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn session_id(&self) -> &str {
        self.log.session_id()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Appends the preset clause to the draft and remembers the selection.
    /// Re-applying stacks the clause again.
    pub fn apply_preset(&mut self, preset: StylePreset) {
        self.state.selected_preset = preset;
        if preset == StylePreset::None {
            return;
        }
        self.state.prompt_draft = apply_preset(&self.state.prompt_draft, preset);
    }

    /// Replaces the attached reference images. Files that do not declare a
    /// JPEG/PNG mime type are rejected up front, the way the surface's
    /// picker refuses them; of what remains, only the first
    /// [`MAX_REFERENCE_IMAGES`] files are considered, and an unreadable
    /// file inside that window is skipped without promoting a later file
    /// into its place. Returns how many files were attached.
    pub fn attach_reference_images(&mut self, files: Vec<ImageBlob>) -> usize {
        let mut eligible = Vec::new();
        for file in files {
            if !is_supported_reference_mime(&file.mime_type) {
                // Event log is best-effort; a full disk must not block the session.
                self.log
                    .warning(format!(
                        "Rejected {}: only JPEG/PNG reference images are accepted",
                        file.filename
                    ))
                    .ok();
                continue;
            }
            eligible.push(file);
        }
        eligible.truncate(MAX_REFERENCE_IMAGES);

        let mut readable = Vec::new();
        for file in eligible {
            if let Err(err) = image::load_from_memory(&file.bytes) {
                self.log
                    .warning(format!("Could not read {}: {err}", file.filename))
                    .ok();
                continue;
            }
            readable.push(file);
        }
        self.state.attach_reference_images(readable);
        self.state.reference_images().len()
    }

    /// Rewrites the draft through the text model. On success the enhanced
    /// text is stored and returned; on service failure the original draft
    /// comes back unchanged and the failure is only visible in the event
    /// log. Configuration and validation problems are still hard errors.
    pub fn enhance_prompt(&mut self, aspect_ratio: &str) -> Result<String, SessionError> {
        if self.service.requires_api_key() && self.config.resolved_api_key().is_none() {
            return Err(SessionError::MissingApiKey);
        }
        let draft = self.state.prompt_draft.clone();
        if draft.trim().is_empty() {
            return Err(SessionError::invalid("write a base prompt first"));
        }

        let request = EnhanceRequest {
            prompt: draft.clone(),
            model: self.config.text_model.clone(),
            aspect_ratio: aspect_ratio.to_string(),
            preset_label: match self.state.selected_preset {
                StylePreset::None => None,
                preset => Some(preset.label().to_string()),
            },
            reference_image_count: self.state.reference_images().len(),
        };

        match self.service.enhance(&request) {
            Ok(text) => {
                let enhanced = text.trim().to_string();
                self.state.enhanced_prompt = enhanced.clone();
                self.log
                    .emit(
                        "prompt_enhanced",
                        payload(json!({ "chars": enhanced.len() })),
                    )
                    .ok();
                Ok(enhanced)
            }
            Err(err) => {
                self.log
                    .warning(format!(
                        "Prompt enhancement failed; keeping original draft: {}",
                        error_chain_text(&err, 512)
                    ))
                    .ok();
                Ok(draft)
            }
        }
    }

    /// Promotes the last enhanced prompt into the editable draft. The change
    /// is visible to the very next read of the draft.
    pub fn replace_prompt_with_enhanced(&mut self) -> Result<(), SessionError> {
        if self.state.enhanced_prompt.is_empty() {
            return Err(SessionError::invalid("no enhanced prompt available"));
        }
        self.state.prompt_draft = self.state.enhanced_prompt.clone();
        Ok(())
    }

    /// Submits the composed prompt plus reference images and, on success,
    /// swaps in the new result set and archives it to the library in one
    /// step. Any failure leaves the session state exactly as it was.
    pub fn generate(
        &mut self,
        aspect_ratio: &str,
        seed: u64,
    ) -> Result<GenerationOutcome, SessionError> {
        if self.service.requires_api_key() && self.config.resolved_api_key().is_none() {
            return Err(SessionError::MissingApiKey);
        }
        if self.state.prompt_draft.trim().is_empty() {
            return Err(SessionError::invalid("write a prompt first"));
        }

        let submitted_prompt =
            compose_submission_prompt(&self.state.prompt_draft, aspect_ratio, seed);
        let request = GenerateRequest {
            prompt: submitted_prompt.clone(),
            model: self.config.image_model.clone(),
            images: self
                .state
                .reference_images()
                .iter()
                .take(MAX_REFERENCE_IMAGES)
                .cloned()
                .collect(),
        };

        self.log
            .emit(
                "generation_started",
                payload(json!({
                    "model": request.model,
                    "aspect_ratio": aspect_ratio,
                    "seed": seed,
                    "reference_images": request.images.len(),
                })),
            )
            .ok();

        let response = self
            .service
            .generate(&request)
            .map_err(|err| SessionError::Service(error_chain_text(&err, 512)))?;
        for warning in &response.warnings {
            self.log.warning(warning.clone()).ok();
        }
        if response.images.is_empty() {
            return Err(SessionError::NoImages);
        }

        let image_count = response.images.len();
        self.state
            .record_generation(submitted_prompt.clone(), response.images);
        self.log
            .emit(
                "generation_finished",
                payload(json!({
                    "image_count": image_count,
                    "library_size": self.state.library().len(),
                })),
            )
            .ok();

        Ok(GenerationOutcome {
            image_count,
            warnings: response.warnings,
            submitted_prompt,
        })
    }

    /// Drops the current result set and its paired prompt. The library is
    /// untouched.
    pub fn clear_results(&mut self) {
        self.state.clear_results();
        self.log.emit("results_cleared", EventPayload::new()).ok();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_supported_reference_mime(mime_type: &str) -> bool {
    matches!(
        mime_type.trim().to_ascii_lowercase().as_str(),
        "image/png" | "image/jpeg" | "image/jpg"
    )
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(String::as_str) == Some(trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
