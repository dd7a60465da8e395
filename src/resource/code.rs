//! Function code store
//!
//! Downloads function code archives into a scratch directory (one folder per
//! code location), extracts them, and returns their script sources. Folders
//! not used for longer than the configured age are pruned, at most once per
//! minute.
//!
//! Within a store, each folder is guarded by its own async lock. Across
//! processes sharing the scratch directory, archives and extracted trees are
//! written under temporary names and renamed into place, so a folder's
//! `code/` tree is either absent or complete.

use crate::cloud::{CloudClient, HttpClient};
use crate::resource::fetcher::str_at;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// How long a `get-function` response (and its pre-signed URL) is reused
pub const DEFAULT_CODE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Scratch folders unused for longer than this are deleted
pub const DEFAULT_SCRATCH_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Minimum time between two prune passes
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Extra attempts after a failed download or extraction
const CODE_FETCH_RETRIES: u32 = 1;

const ARCHIVE_NAME: &str = "archive.zip";

/// Extracted tree inside a scratch folder
const CODE_DIR: &str = "code";

/// Touched on every use; its mtime is the folder's age
const LAST_USED_MARKER: &str = ".last-used";

/// Script extensions handed to the scanner
const SOURCE_EXTENSIONS: &[&str] = &["py", "js"];

/// Source path (relative to the archive root, with a leading `/`) to source text
pub type CodeMap = BTreeMap<String, String>;

type FolderLock = Arc<tokio::sync::Mutex<()>>;

/// Download-and-extract cache for function code
pub struct CodeStore {
    root: PathBuf,
    max_age: Duration,
    code_ttl: Duration,
    http: HttpClient,
    last_prune: Mutex<Option<Instant>>,
    folder_locks: Mutex<HashMap<PathBuf, FolderLock>>,
}

impl CodeStore {
    pub fn new(root: PathBuf, http: HttpClient) -> Self {
        Self {
            root,
            max_age: DEFAULT_SCRATCH_MAX_AGE,
            code_ttl: DEFAULT_CODE_CACHE_TTL,
            http,
            last_prune: Mutex::new(None),
            folder_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_code_ttl(mut self, code_ttl: Duration) -> Self {
        self.code_ttl = code_ttl;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fetch and extract the code of `function_name`, returning its scripts.
    ///
    /// A failed download or extraction discards the archive and tries once
    /// more with a fresh `get-function` call (pre-signed URLs expire).
    pub async fn fetch_code(&self, function_name: &str, client: &CloudClient) -> Result<CodeMap> {
        // Local emulators hand out stable locations that change on redeploy
        let ttl = if client.is_local() {
            client.settings().cache_ttl
        } else {
            self.code_ttl
        };

        let mut last_error = None;
        for attempt in 0..=CODE_FETCH_RETRIES {
            let params = json!({ "function-name": function_name });
            let result = if attempt == 0 {
                client.call_with_ttl("lambda", "get-function", params, ttl).await
            } else {
                client.call_fresh("lambda", "get-function", params).await
            };
            let response =
                result.with_context(|| format!("Failed to get function '{}'", function_name))?;

            let location = str_at(&response, "Code.Location")
                .with_context(|| format!("Function '{}' has no code location", function_name))?;

            match self.load(location).await {
                Ok(sources) => {
                    self.prune_if_due().await;
                    return Ok(sources);
                }
                Err(e) => {
                    tracing::warn!(
                        "Attempt {} to retrieve code for '{}' failed: {:#}",
                        attempt + 1,
                        function_name,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("No attempt made"))
            .context(format!("Unable to retrieve code for '{}'", function_name)))
    }

    /// Scratch folder for a code location
    pub fn folder_for(&self, location: &str) -> PathBuf {
        let digest = Sha256::digest(location.as_bytes());
        self.root.join(&hex::encode(digest)[..16])
    }

    fn folder_lock(&self, folder: &Path) -> FolderLock {
        self.folder_locks
            .lock()
            .entry(folder.to_path_buf())
            .or_default()
            .clone()
    }

    /// Materialize and read the code at `location` while holding its folder lock.
    /// A failure discards the folder before the lock is released.
    async fn load(&self, location: &str) -> Result<CodeMap> {
        let folder = self.folder_for(location);
        let lock = self.folder_lock(&folder);
        let _guard = lock.lock().await;

        let result = match self.materialize(location, &folder).await {
            Ok(code_dir) => tokio::task::spawn_blocking(move || collect_sources(&code_dir))
                .await
                .context("Source collection task failed")
                .and_then(|r| r),
            Err(e) => Err(e),
        };

        if result.is_err() {
            discard(&folder).await;
        }
        result
    }

    /// Make sure the archive at `location` is downloaded and extracted into
    /// `folder`, returning the extracted tree
    async fn materialize(&self, location: &str, folder: &Path) -> Result<PathBuf> {
        let archive = folder.join(ARCHIVE_NAME);
        let code_dir = folder.join(CODE_DIR);

        tokio::fs::create_dir_all(folder)
            .await
            .with_context(|| format!("Failed to create {}", folder.display()))?;

        if !tokio::fs::try_exists(&code_dir).await.unwrap_or(false) {
            if !tokio::fs::try_exists(&archive).await.unwrap_or(false) {
                tracing::info!("Downloading code archive to {}", archive.display());
                let bytes = self.download(location).await?;
                let partial = folder.join(format!("{}.{}.part", ARCHIVE_NAME, uuid::Uuid::new_v4()));
                tokio::fs::write(&partial, &bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", partial.display()))?;
                tokio::fs::rename(&partial, &archive)
                    .await
                    .with_context(|| format!("Failed to move {} into place", archive.display()))?;
            }

            tracing::info!("Extracting {}", archive.display());
            let staging = folder.join(format!(".{}.{}", CODE_DIR, uuid::Uuid::new_v4()));
            let (from, into) = (archive, staging.clone());
            let extracted = tokio::task::spawn_blocking(move || extract_archive(&from, &into))
                .await
                .context("Extraction task failed")
                .and_then(|r| r);
            if let Err(e) = extracted {
                discard(&staging).await;
                return Err(e);
            }
            publish_dir(&staging, &code_dir).await?;
        }

        mark_used(folder).await;
        Ok(code_dir)
    }

    async fn download(&self, location: &str) -> Result<Vec<u8>> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return self.http.get_bytes(location).await;
        }

        let path = if location.starts_with("file://") {
            url::Url::parse(location)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .with_context(|| format!("Invalid file location: {}", location))?
        } else {
            PathBuf::from(location)
        };

        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Delete scratch folders unused for longer than the max age, at most once
    /// per interval. Folders locked by a running fetch are left alone.
    async fn prune_if_due(&self) {
        {
            let mut last_prune = self.last_prune.lock();
            if last_prune.is_some_and(|t| t.elapsed() < PRUNE_INTERVAL) {
                return;
            }
            *last_prune = Some(Instant::now());
        }

        let root = self.root.clone();
        let max_age = self.max_age;
        let expired =
            tokio::task::spawn_blocking(move || expired_folders(&root, max_age, SystemTime::now()));
        let expired = match expired.await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::warn!("Scratch pruning task failed: {}", e);
                return;
            }
        };

        let mut removed = 0;
        for folder in expired {
            let lock = self.folder_lock(&folder);
            let Ok(_guard) = lock.try_lock() else {
                continue;
            };
            match tokio::fs::remove_dir_all(&folder).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::debug!("Unable to prune {}: {}", folder.display(), e),
            }
        }
        if removed > 0 {
            tracing::debug!("Pruned {} scratch folders", removed);
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        tracing::debug!("Unable to discard {}: {}", path.display(), e);
    }
}

/// Rename a fully extracted `staging` tree to `target`. Losing the race to
/// another process that published the same tree is not an error.
async fn publish_dir(staging: &Path, target: &Path) -> Result<()> {
    if let Err(e) = tokio::fs::rename(staging, target).await {
        discard(staging).await;
        if !tokio::fs::try_exists(target).await.unwrap_or(false) {
            return Err(e).with_context(|| format!("Failed to move {} into place", target.display()));
        }
    }
    Ok(())
}

async fn mark_used(folder: &Path) {
    let marker = folder.join(LAST_USED_MARKER);
    if let Err(e) = tokio::fs::write(&marker, chrono::Utc::now().to_rfc3339()).await {
        tracing::debug!("Unable to touch {}: {}", marker.display(), e);
    }
}

fn extract_archive(archive: &Path, target: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)
        .with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file).context("Corrupt code archive")?;
    zip.extract(target).context("Failed to extract code archive")?;
    Ok(())
}

/// Read every script under `folder` into a code map
pub fn collect_sources(folder: &Path) -> Result<CodeMap> {
    let mut sources = CodeMap::new();
    for entry in walkdir::WalkDir::new(folder) {
        let entry = entry.with_context(|| format!("Failed to walk {}", folder.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_source = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e));
        if !is_source {
            continue;
        }

        let Ok(relative) = path.strip_prefix(folder) else {
            continue;
        };
        let key = format!(
            "/{}",
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        );
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        sources.insert(key, String::from_utf8_lossy(&bytes).into_owned());
    }
    Ok(sources)
}

/// Last time a folder was used: the newest of its own and its marker's mtime
fn last_used(folder: &Path) -> Option<SystemTime> {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(folder), modified(&folder.join(LAST_USED_MARKER))) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Folders under `root` unused for longer than `max_age` at `now`
fn expired_folders(root: &Path, max_age: Duration, now: SystemTime) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            last_used(path)
                .and_then(|used| now.duration_since(used).ok())
                .is_some_and(|age| age > max_age)
        })
        .collect()
}
