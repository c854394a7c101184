//! Prompt documents, layout style templates and image prompts.
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Documents shorter than this are treated as not written yet.
const MIN_DOCUMENT_BYTES: u64 = 10;

pub const WRITER_PERSONA_FILE: &str = "writer_agent.md";
pub const SUMMARY_PERSONA_FILE: &str = "summary_agent.md";
pub const STRATEGY_FILE: &str = "account_strategy.md";

const DEFAULT_STYLE_FILE: &str = "pattern_editor.md";

/// Inline illustrations requested per article.
pub const ILLUSTRATION_PROMPTS: [&str; 3] = [
    "Cinematic scene, business transformation struggle, team facing change in a modern office, photorealistic, natural window light, shallow depth of field, 4:3 ratio, no text, --ar 4:3",
    "Cinematic scene, organizational challenges, people debating around a whiteboard full of diagrams, photorealistic, warm tungsten light, documentary feel, 4:3 ratio, no text, --ar 4:3",
    "Cinematic scene, future opportunity, sunrise over a city skyline seen from a glass office, photorealistic, golden hour, hopeful mood, 4:3 ratio, no text, --ar 4:3",
];

/// Text token marking inline image slot `index` (zero-based) in a body.
pub fn placeholder(index: usize) -> String {
    format!("[IMAGE_PLACEHOLDER_{}]", index)
}

pub fn cover_prompt(topic: &str) -> String {
    format!(
        "Cinematic wide shot, {}, photorealistic, dramatic lighting, 2.35:1 aspect ratio, moody atmosphere, high contrast, professional photography, no text, --ar 2.35:1",
        topic
    )
}

/// Layout template file for a style name. Unknown names use the editor style.
pub fn style_file(style: &str) -> &'static str {
    match style.trim().to_ascii_lowercase().as_str() {
        "business" => "pattern_business.md",
        "minimalist" => "pattern_minimalist.md",
        "elegant" => "pattern_elegant.md",
        "creative" => "pattern_creative.md",
        _ => DEFAULT_STYLE_FILE,
    }
}

/// Text documents kept in the prompts directory.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    dir: PathBuf,
}

impl PromptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Read a document; missing, unreadable or near-empty files yield "".
    pub fn load(&self, name: &str) -> String {
        read_document(&self.path(name))
    }

    pub fn writer_persona(&self) -> String {
        self.load(WRITER_PERSONA_FILE)
    }

    pub fn summary_persona(&self) -> String {
        self.load(SUMMARY_PERSONA_FILE)
    }

    pub fn strategy(&self) -> String {
        self.load(STRATEGY_FILE)
    }

    pub fn style_template(&self, style: &str) -> String {
        self.load(style_file(style))
    }
}

fn read_document(path: &Path) -> String {
    match fs::metadata(path) {
        Ok(meta) if meta.len() >= MIN_DOCUMENT_BYTES => {}
        Ok(_) => {
            debug!(path = %path.display(), "prompt document too short; ignoring");
            return String::new();
        }
        Err(_) => {
            debug!(path = %path.display(), "prompt document missing");
            return String::new();
        }
    }
    match fs::read_to_string(path) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read prompt document");
            String::new()
        }
    }
}
