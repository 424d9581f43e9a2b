//! Configuration and credential file locations

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default provider base URL
pub const DEFAULT_BASE_URL: &str = "https://ai.costa.app";

/// Environment variable that overrides the provider base URL
pub const BASE_URL_ENV: &str = "COSTA_BASE_URL";

/// Environment variable that turns on debug logging
pub const DEBUG_ENV: &str = "COSTA_DEBUG";

const TOKEN_FILE: &str = "token.json";
const METADATA_FILE: &str = "token-metadata.json";
const SETTINGS_FILE: &str = "config.toml";

/// Locations of everything the CLI keeps on disk.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    dir: PathBuf,
}

impl ConfigPaths {
    /// Resolve `~/.config/costa` for the current user.
    pub fn discover() -> Result<Self> {
        let base = BaseDirs::new().context("Could not determine home directory")?;
        Ok(Self::in_dir(base.home_dir().join(".config").join("costa")))
    }

    /// Root all paths at `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn config_dir(&self) -> &Path {
        &self.dir
    }

    /// Full token bundle, written only when the vault is unusable.
    pub fn token_file(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    /// Non-secret expiry bookkeeping kept next to the vault entries.
    pub fn metadata_file(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }
}

/// Optional user settings (`config.toml`)
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Provider base URL, overridden by `COSTA_BASE_URL`
    pub base_url: Option<String>,
}

impl Settings {
    /// Load settings from disk. A missing file yields defaults.
    pub fn load(paths: &ConfigPaths) -> Result<Self> {
        let path = paths.settings_file();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read settings file")?;
        toml::from_str(&content).context("Failed to parse settings file")
    }

    /// Effective provider base URL: environment, then settings file, then default.
    pub fn base_url(&self) -> String {
        let env = std::env::var(BASE_URL_ENV).ok();
        resolve_base_url(env.as_deref(), self.base_url.as_deref())
    }
}

fn resolve_base_url(env: Option<&str>, file: Option<&str>) -> String {
    [env, file]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(DEFAULT_BASE_URL)
        .trim_end_matches('/')
        .to_string()
}

/// Whether `COSTA_DEBUG` asks for debug output.
pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Create `dir` (and parents) readable only by the owner. An existing `dir`
/// is tightened to owner-only as well.
pub fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(dir)?.permissions().mode() & 0o777;
        if mode != 0o700 {
            tracing::debug!("Tightening {} from {:o} to 700", dir.display(), mode);
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}

/// Write `contents` to `path` atomically with owner-only permissions.
///
/// Each write goes to its own uniquely named sibling temp file, which is then
/// renamed over the target, so concurrent writers never share a temp file and
/// readers never see a partially written one.
pub fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );

    // Removed on drop unless persisted
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Remove `path`, treating "already absent" as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_precedence() {
        assert_eq!(resolve_base_url(None, None), DEFAULT_BASE_URL);
        assert_eq!(
            resolve_base_url(None, Some("https://staging.costa.app/")),
            "https://staging.costa.app"
        );
        assert_eq!(
            resolve_base_url(Some("http://localhost:3000"), Some("https://staging.costa.app")),
            "http://localhost:3000"
        );
        // Blank env falls through to the file value
        assert_eq!(
            resolve_base_url(Some("  "), Some("https://staging.costa.app")),
            "https://staging.costa.app"
        );
    }

    #[test]
    fn test_settings_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&ConfigPaths::in_dir(dir.path())).unwrap();
        assert!(settings.base_url.is_none());
    }

    #[test]
    fn test_settings_parses_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::in_dir(dir.path());
        fs::write(paths.settings_file(), "base_url = \"https://eu.costa.app\"\n").unwrap();

        let settings = Settings::load(&paths).unwrap();
        assert_eq!(settings.base_url.as_deref(), Some("https://eu.costa.app"));
    }

    #[test]
    fn test_write_private_file_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");

        write_private_file(&path, b"first").unwrap();
        write_private_file(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        // No temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_create_private_dir_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("costa");
        create_private_dir(&nested).unwrap();

        let mode = fs::metadata(&nested).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn test_create_private_dir_tightens_existing_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("costa");
        fs::create_dir(&existing).unwrap();
        fs::set_permissions(&existing, fs::Permissions::from_mode(0o755)).unwrap();

        create_private_dir(&existing).unwrap();

        let mode = fs::metadata(&existing).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_concurrent_writers_never_expose_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let bodies: Vec<Vec<u8>> = (0..4u8).map(|i| vec![b'a' + i; 64 * 1024]).collect();
        write_private_file(&path, &bodies[0]).unwrap();

        std::thread::scope(|scope| {
            for body in &bodies {
                let path = path.clone();
                scope.spawn(move || {
                    for _ in 0..25 {
                        write_private_file(&path, body).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..200 {
                    let seen = fs::read(&path).unwrap();
                    assert!(bodies.contains(&seen), "torn read of {} bytes", seen.len());
                }
            });
        });

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.json");
        remove_if_exists(&path).unwrap();
        fs::write(&path, "x").unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }
}
