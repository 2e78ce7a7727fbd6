//! Process-wide configuration: per-backend credentials resolved once from
//! the environment, upload limits, and shared strength bounds.

use std::env;

/// Minimum transformation strength (very similar to the original).
pub const MIN_STRENGTH: f32 = 0.3;
/// Maximum transformation strength (very different result).
pub const MAX_STRENGTH: f32 = 0.9;
/// Default transformation strength (balanced).
pub const DEFAULT_STRENGTH: f32 = 0.6;

/// Maximum uploadable file size in megabytes.
pub const MAX_FILE_SIZE_MB: u64 = 5;
/// Accepted upload file extensions.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Per-backend API secrets, read once at startup and immutable afterwards.
///
/// A missing credential disables only that one adapter; it is never a
/// process-level failure.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub deepai: Option<String>,
    pub hugging_face: Option<String>,
    pub leonardo: Option<String>,
    pub replicate: Option<String>,
    pub stability: Option<String>,
}

impl Credentials {
    /// Read all five credentials from the environment. Empty values count
    /// as absent.
    pub fn from_env() -> Self {
        Self {
            deepai: non_empty_var("DEEPAI_API_KEY"),
            hugging_face: non_empty_var("HF_API_TOKEN"),
            leonardo: non_empty_var("LEONARDO_API_KEY"),
            replicate: non_empty_var("REPLICATE_API_TOKEN"),
            stability: non_empty_var("STABILITY_API_KEY"),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Upload validation limits handed to the imaging boundary.
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_file_size_mb: u64,
    pub allowed_extensions: &'static [&'static str],
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size_mb: MAX_FILE_SIZE_MB,
            allowed_extensions: &ALLOWED_EXTENSIONS,
        }
    }
}

impl UploadLimits {
    pub fn max_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Whether the file name carries an accepted extension.
    pub fn allows_extension(&self, filename: &str) -> bool {
        let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
        self.allowed_extensions.contains(&ext.as_str())
    }
}

/// Everything the core needs at startup.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub limits: UploadLimits,
}

impl AppConfig {
    /// Load configuration once at process start. Reads a `.env` file if one
    /// is present, then the environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self {
            credentials: Credentials::from_env(),
            limits: UploadLimits::default(),
        }
    }
}
