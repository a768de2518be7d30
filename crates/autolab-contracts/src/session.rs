use chrono::Local;

use crate::presets::StylePreset;

/// Upper bound on reference images sent with one generation request.
/// Files beyond the cap are accepted at the surface but never attached.
pub const MAX_REFERENCE_IMAGES: usize = 3;

/// Filename prefix for downloaded results.
pub const DOWNLOAD_PREFIX: &str = "auto_creative";

/// One user-supplied image attached to bias composition or style.
/// Order of attachment encodes priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// One image returned by the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Immutable record of one past generation: the exact prompt submitted and
/// every image it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub timestamp: String,
    pub prompt_used: String,
    pub results: Vec<GeneratedImage>,
}

impl LibraryEntry {
    /// Download filename for the entry's `index`-th image (zero-based).
    /// The entry timestamp doubles as the stamp, with `:` made path-safe.
    pub fn download_name(&self, index: usize) -> String {
        let stamp = self.timestamp.replace(':', "-");
        format!("{DOWNLOAD_PREFIX}_{stamp}_{}.png", index + 1)
    }
}

/// All mutable state for one user session. Created empty at session start,
/// discarded when the session ends; nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub prompt_draft: String,
    pub enhanced_prompt: String,
    pub selected_preset: StylePreset,
    reference_images: Vec<ImageBlob>,
    last_submitted_prompt: String,
    results: Vec<GeneratedImage>,
    library: Vec<LibraryEntry>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference_images(&self) -> &[ImageBlob] {
        &self.reference_images
    }

    pub fn last_submitted_prompt(&self) -> &str {
        &self.last_submitted_prompt
    }

    pub fn results(&self) -> &[GeneratedImage] {
        &self.results
    }

    /// Past generations, oldest first. Display order is newest-first, which
    /// is the caller's concern.
    pub fn library(&self) -> &[LibraryEntry] {
        &self.library
    }

    /// Replaces the attached reference images with the first
    /// [`MAX_REFERENCE_IMAGES`] of `files`, in the order supplied.
    /// Returns how many trailing files were dropped.
    pub fn attach_reference_images(&mut self, mut files: Vec<ImageBlob>) -> usize {
        let dropped = files.len().saturating_sub(MAX_REFERENCE_IMAGES);
        files.truncate(MAX_REFERENCE_IMAGES);
        self.reference_images = files;
        dropped
    }

    /// Records a successful generation: the result set and the prompt that
    /// produced it change together, and the library gains one entry stamped
    /// now. Callers must not invoke this with an empty result set.
    pub fn record_generation(&mut self, submitted_prompt: String, results: Vec<GeneratedImage>) {
        debug_assert!(!results.is_empty());
        self.results = results;
        self.last_submitted_prompt = submitted_prompt;
        self.library.push(LibraryEntry {
            timestamp: library_timestamp(),
            prompt_used: self.last_submitted_prompt.clone(),
            results: self.results.clone(),
        });
    }

    /// Empties the current result set and its paired prompt. The library
    /// keeps every past entry.
    pub fn clear_results(&mut self) {
        self.results.clear();
        self.last_submitted_prompt.clear();
    }
}

/// Download filename for a fresh (not yet archived) result, stamped now.
pub fn result_download_name(index: usize) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{DOWNLOAD_PREFIX}_{stamp}_{}.png", index + 1)
}

fn library_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
