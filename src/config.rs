use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default lifetime of the store's metadata cache before a rescan.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default line-search executable used by the fallback index.
pub const DEFAULT_SEARCH_TOOL: &str = "rg";

/// Where notes live and how the store and index behave.
#[derive(Debug, Clone)]
pub struct Config {
    /// Active notes, one `<id>.md` file per note.
    pub notes_dir: PathBuf,
    /// Soft-deleted notes, same filenames as in `notes_dir`.
    pub trash_dir: PathBuf,
    /// SQLite database used by the preferred index backend.
    pub index_file: PathBuf,
    pub cache_ttl: Duration,
    /// Executable name (resolved through `PATH`) or absolute path.
    pub search_tool: String,
    /// Try the SQLite backend before falling back to the scan-based one.
    pub prefer_sqlite: bool,
    pub auto_create_dirs: bool,
}

impl Default for Config {
    fn default() -> Self {
        let base = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nx");

        Self {
            notes_dir: base.join("notes"),
            trash_dir: base.join("trash"),
            index_file: base.join("index.db"),
            cache_ttl: DEFAULT_CACHE_TTL,
            search_tool: DEFAULT_SEARCH_TOOL.to_string(),
            prefer_sqlite: true,
            auto_create_dirs: true,
        }
    }
}

impl Config {
    /// Lays out notes, trash and index under a single directory.
    pub fn with_root(root: &Path) -> Self {
        Self {
            notes_dir: root.join("notes"),
            trash_dir: root.join("trash"),
            index_file: root.join("index.db"),
            ..Self::default()
        }
    }

    /// Default configuration with `NX_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| env::var(key).ok())
    }

    /// Applies overrides from any key lookup; `from_env` feeds it the process environment.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("NX_NOTES_DIR") {
            self.notes_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("NX_TRASH_DIR") {
            self.trash_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("NX_INDEX_FILE") {
            self.index_file = PathBuf::from(file);
        }
        if let Some(tool) = lookup("NX_SEARCH_TOOL") {
            self.search_tool = tool;
        }
        if let Some(secs) = lookup("NX_CACHE_TTL_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(secs) => self.cache_ttl = Duration::from_secs(secs),
                Err(_) => tracing::warn!(value = %secs, "ignoring invalid NX_CACHE_TTL_SECS"),
            }
        }
        if let Some(backend) = lookup("NX_INDEX_BACKEND") {
            match backend.trim().to_ascii_lowercase().as_str() {
                "sqlite" => self.prefer_sqlite = true,
                "ripgrep" | "rg" => self.prefer_sqlite = false,
                other => tracing::warn!(value = %other, "ignoring unknown NX_INDEX_BACKEND"),
            }
        }
        self
    }
}
