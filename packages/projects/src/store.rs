// ABOUTME: Filesystem-backed project store
// ABOUTME: Materializes generated trees atomically and serves confined file access

use crate::error::{StoreError, StoreResult};
use crate::paths::{
    confine, display_relative, new_project_id, normalize_relative, validate_project_id,
    METADATA_FILE, SECRETS_FILE,
};
use crate::types::{FileMap, NewProject, Project, ProjectMetadata, TreeNode};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";

/// Owns the on-disk representation of every project under one workspace root.
///
/// Each project lives in `<root>/<id>/` and carries its metadata in a reserved
/// file inside that directory, so a project is fully recoverable from disk.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    /// Open (creating if necessary) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::write(&root, e))?;
        let root = fs::canonicalize(&root)
            .await
            .map_err(|e| StoreError::read(&root, e))?;

        let store = Self { root };
        store.recover_interrupted().await;
        info!(root = %store.root.display(), "Project store ready");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a project lives in (validated, not checked for existence)
    pub fn project_dir(&self, project_id: &str) -> StoreResult<PathBuf> {
        validate_project_id(project_id)?;
        Ok(self.root.join(project_id))
    }

    /// Write a brand new project tree, visible only once fully written
    pub async fn materialize(&self, new: NewProject) -> StoreResult<Project> {
        let id = new_project_id();
        let target = self.root.join(&id);
        if fs::try_exists(&target).await.unwrap_or(false) {
            return Err(StoreError::Conflict(format!("project {} already exists", id)));
        }

        let now = Utc::now();
        let name = new.name.trim();
        let metadata = ProjectMetadata {
            name: if name.is_empty() { id.clone() } else { name.to_string() },
            description: new.description.trim().to_string(),
            created_at: now,
            modified_at: now,
            application_id: new.application_id.filter(|a| !a.trim().is_empty()),
        };

        let staging = self.staging_dir(&id);
        let result = async {
            write_tree(&staging, &new.files).await?;
            if !new.secrets.is_empty() {
                write_secrets(&staging, &new.secrets).await?;
            }
            write_metadata(&staging, &metadata).await?;
            fs::rename(&staging, &target)
                .await
                .map_err(|e| StoreError::write(&target, e))
        }
        .await;

        if let Err(e) = result {
            discard_dir(&staging).await;
            return Err(e);
        }

        info!(project_id = %id, files = new.files.len(), "Materialized project");
        Ok(Project {
            id,
            root_path: target,
            metadata,
        })
    }

    /// Replace an existing project's tree with a regenerated one.
    ///
    /// Metadata and the secrets file carry over unless the new tree supplies its own `.env`.
    pub async fn replace_tree(&self, project_id: &str, files: FileMap) -> StoreResult<Project> {
        let existing = self.get(project_id).await?;
        let staging = self.staging_dir(project_id);
        discard_dir(&staging).await;

        let mut metadata = existing.metadata.clone();
        metadata.modified_at = Utc::now();

        let result = async {
            write_tree(&staging, &files).await?;

            let secrets = existing.root_path.join(SECRETS_FILE);
            let supplies_secrets = files
                .keys()
                .any(|k| normalize_relative(k).ok().as_deref() == Some(Path::new(SECRETS_FILE)));
            if !supplies_secrets && fs::try_exists(&secrets).await.unwrap_or(false) {
                let dest = staging.join(SECRETS_FILE);
                fs::copy(&secrets, &dest)
                    .await
                    .map_err(|e| StoreError::write(&dest, e))?;
            }

            write_metadata(&staging, &metadata).await?;
            self.swap_into_place(project_id, &staging).await
        }
        .await;

        if let Err(e) = result {
            discard_dir(&staging).await;
            return Err(e);
        }

        info!(project_id = %project_id, files = files.len(), "Replaced project tree");
        Ok(Project {
            id: existing.id,
            root_path: existing.root_path,
            metadata,
        })
    }

    /// Load a project, recovering metadata from the directory if the record is missing
    pub async fn get(&self, project_id: &str) -> StoreResult<Project> {
        let dir = self.project_dir(project_id)?;
        let dir_meta = match fs::metadata(&dir).await {
            Ok(m) if m.is_dir() => m,
            _ => return Err(StoreError::NotFound(format!("project {}", project_id))),
        };

        let metadata_path = dir.join(METADATA_FILE);
        let metadata = match fs::read(&metadata_path).await {
            Ok(bytes) => match serde_json::from_slice::<ProjectMetadata>(&bytes) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(project_id = %project_id, error = %e, "Corrupt project metadata, recovering from directory");
                    recovered_metadata(project_id, &dir_meta)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(project_id = %project_id, "No metadata record, recovering from directory");
                recovered_metadata(project_id, &dir_meta)
            }
            Err(e) => return Err(StoreError::read(metadata_path, e)),
        };

        Ok(Project {
            id: project_id.to_string(),
            root_path: dir,
            metadata,
        })
    }

    /// All projects, most recently modified first
    pub async fn list(&self) -> StoreResult<Vec<Project>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::read(&self.root, e))?;

        let mut projects = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::read(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || validate_project_id(&name).is_err() {
                continue;
            }
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => {}
                _ => continue,
            }
            match self.get(&name).await {
                Ok(project) => projects.push(project),
                Err(e) => warn!(project_id = %name, error = %e, "Skipping unreadable project"),
            }
        }

        projects.sort_by(|a, b| b.metadata.modified_at.cmp(&a.metadata.modified_at));
        Ok(projects)
    }

    pub async fn read_file(&self, project_id: &str, path: &str) -> StoreResult<String> {
        let dir = self.existing_dir(project_id).await?;
        let target = confine(&dir, path)?;

        match fs::metadata(&target).await {
            Ok(m) if m.is_file() => {}
            _ => return Err(StoreError::NotFound(path.to_string())),
        }

        fs::read_to_string(&target).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
            _ => StoreError::read(&target, e),
        })
    }

    /// Overwrite (or create) a file and bump the project's modification time
    pub async fn write_file(&self, project_id: &str, path: &str, content: &str) -> StoreResult<()> {
        let dir = self.existing_dir(project_id).await?;
        let target = confine(&dir, path)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::write(parent, e))?;
        }
        atomic_write(&target, content.as_bytes()).await?;
        self.touch(project_id).await?;

        debug!(project_id = %project_id, path = %path, bytes = content.len(), "Wrote project file");
        Ok(())
    }

    /// Write several files, bumping the modification time once
    pub async fn write_files(&self, project_id: &str, files: &FileMap) -> StoreResult<()> {
        let dir = self.existing_dir(project_id).await?;
        for (path, content) in files {
            let target = confine(&dir, path)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::write(parent, e))?;
            }
            atomic_write(&target, content.as_bytes()).await?;
        }
        self.touch(project_id).await?;

        info!(project_id = %project_id, files = files.len(), "Applied file edits");
        Ok(())
    }

    /// Delete a file or an empty directory. Missing paths are a no-op.
    pub async fn delete_path(&self, project_id: &str, path: &str) -> StoreResult<()> {
        let dir = self.existing_dir(project_id).await?;
        let target = confine(&dir, path)?;

        let meta = match fs::symlink_metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::read(&target, e)),
        };

        if meta.is_dir() {
            let mut entries = fs::read_dir(&target)
                .await
                .map_err(|e| StoreError::read(&target, e))?;
            let has_children = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::read(&target, e))?
                .is_some();
            if has_children {
                return Err(StoreError::DirectoryNotEmpty(path.to_string()));
            }
            fs::remove_dir(&target)
                .await
                .map_err(|e| StoreError::write(&target, e))?;
        } else {
            fs::remove_file(&target)
                .await
                .map_err(|e| StoreError::write(&target, e))?;
        }

        self.touch(project_id).await
    }

    /// Read-only hierarchical listing, names and relative paths only
    pub async fn tree(&self, project_id: &str) -> StoreResult<Vec<TreeNode>> {
        let dir = self.existing_dir(project_id).await?;
        let walk_root = dir.clone();
        tokio::task::spawn_blocking(move || build_tree(&walk_root, Path::new("")))
            .await
            .map_err(|e| StoreError::read(&dir, io::Error::other(e)))?
            .map_err(|e| StoreError::read(&dir, e))
    }

    /// Remove a project directory.
    ///
    /// `container_active` must reflect the lifecycle state observed under the
    /// project's operation lock; an active container makes this a conflict.
    pub async fn delete(&self, project_id: &str, container_active: bool) -> StoreResult<()> {
        let dir = self.existing_dir(project_id).await?;
        if container_active {
            return Err(StoreError::Conflict(format!(
                "project {} has an active container; stop it before deleting",
                project_id
            )));
        }

        fs::remove_dir_all(&dir)
            .await
            .map_err(|e| StoreError::write(&dir, e))?;
        info!(project_id = %project_id, "Deleted project");
        Ok(())
    }

    /// Environment variables from the project's secrets file
    pub async fn secrets(&self, project_id: &str) -> StoreResult<Vec<(String, String)>> {
        let dir = self.existing_dir(project_id).await?;
        let path = dir.join(SECRETS_FILE);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let iter = dotenvy::from_path_iter(&path)
            .map_err(|e| StoreError::read(&path, io::Error::other(e)))?;
        iter.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::read(&path, io::Error::other(e)))
    }

    /// Bump the modification timestamp
    pub async fn touch(&self, project_id: &str) -> StoreResult<()> {
        let mut project = self.get(project_id).await?;
        project.metadata.modified_at = Utc::now();
        write_metadata(&project.root_path, &project.metadata).await
    }

    async fn existing_dir(&self, project_id: &str) -> StoreResult<PathBuf> {
        let dir = self.project_dir(project_id)?;
        match fs::metadata(&dir).await {
            Ok(m) if m.is_dir() => Ok(dir),
            _ => Err(StoreError::NotFound(format!("project {}", project_id))),
        }
    }

    fn staging_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(format!("{}{}", STAGING_PREFIX, project_id))
    }

    fn trash_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(format!("{}{}", TRASH_PREFIX, project_id))
    }

    async fn swap_into_place(&self, project_id: &str, staging: &Path) -> StoreResult<()> {
        let target = self.root.join(project_id);
        let trash = self.trash_dir(project_id);
        discard_dir(&trash).await;

        fs::rename(&target, &trash)
            .await
            .map_err(|e| StoreError::write(&target, e))?;

        if let Err(e) = fs::rename(staging, &target).await {
            if let Err(restore) = fs::rename(&trash, &target).await {
                warn!(project_id = %project_id, error = %restore, "Failed to restore previous tree");
            }
            return Err(StoreError::write(&target, e));
        }

        discard_dir(&trash).await;
        Ok(())
    }

    /// Clean up staging and trash directories left by an interrupted write
    async fn recover_interrupted(&self) {
        let Ok(mut entries) = fs::read_dir(&self.root).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(STAGING_PREFIX) {
                debug!(dir = %name, "Removing abandoned staging directory");
                discard_dir(&entry.path()).await;
            } else if let Some(project_id) = name.strip_prefix(TRASH_PREFIX) {
                let target = self.root.join(project_id);
                if fs::try_exists(&target).await.unwrap_or(false) {
                    discard_dir(&entry.path()).await;
                } else if let Err(e) = fs::rename(entry.path(), &target).await {
                    warn!(project_id = %project_id, error = %e, "Failed to restore interrupted project swap");
                } else {
                    info!(project_id = %project_id, "Restored project after interrupted swap");
                }
            }
        }
    }
}

fn recovered_metadata(project_id: &str, dir_meta: &std::fs::Metadata) -> ProjectMetadata {
    let modified_at = dir_meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let created_at = dir_meta
        .created()
        .map(DateTime::<Utc>::from)
        .unwrap_or(modified_at);

    ProjectMetadata {
        name: project_id.to_string(),
        description: String::new(),
        created_at,
        modified_at,
        application_id: None,
    }
}

async fn write_tree(dir: &Path, files: &FileMap) -> StoreResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::write(dir, e))?;

    for (relative, content) in files {
        let clean = normalize_relative(relative).map_err(|_| {
            StoreError::write(
                relative,
                io::Error::new(io::ErrorKind::InvalidInput, "path escapes the project root"),
            )
        })?;
        let target = dir.join(&clean);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::write(parent, e))?;
        }
        fs::write(&target, content.as_bytes())
            .await
            .map_err(|e| StoreError::write(&target, e))?;
    }

    Ok(())
}

async fn write_metadata(dir: &Path, metadata: &ProjectMetadata) -> StoreResult<()> {
    let path = dir.join(METADATA_FILE);
    let bytes = serde_json::to_vec_pretty(metadata).map_err(|e| StoreError::write(&path, e.into()))?;
    atomic_write(&path, &bytes).await
}

async fn write_secrets(dir: &Path, secrets: &BTreeMap<String, String>) -> StoreResult<()> {
    let path = dir.join(SECRETS_FILE);
    let mut content = String::new();
    for (key, value) in secrets {
        if !is_valid_env_key(key) {
            return Err(StoreError::write(
                &path,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid environment variable name: {}", key),
                ),
            ));
        }
        content.push_str(key);
        content.push('=');
        content.push_str(&quote_env_value(value));
        content.push('\n');
    }
    atomic_write(&path, content.as_bytes()).await
}

fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote a value so the dotenv parser returns it verbatim
fn quote_env_value(value: &str) -> String {
    if !value.contains('\'') && !value.contains('\n') {
        return format!("'{}'", value);
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Write via a sibling temp file and rename so readers never see a partial file
async fn atomic_write(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, &suffix[..8]));

    if let Err(e) = fs::write(&tmp, bytes).await {
        return Err(StoreError::write(path, e));
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::write(path, e));
    }
    Ok(())
}

async fn discard_dir(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove directory"),
    }
}

fn build_tree(dir: &Path, prefix: &Path) -> io::Result<Vec<TreeNode>> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut nodes = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if prefix.as_os_str().is_empty() && name == METADATA_FILE {
            continue;
        }
        let relative = prefix.join(&name);
        // Symlinks are listed but never followed
        if entry.file_type()?.is_dir() {
            nodes.push(TreeNode::Dir {
                children: build_tree(&entry.path(), &relative)?,
                name,
                path: display_relative(&relative),
            });
        } else {
            nodes.push(TreeNode::File {
                name,
                path: display_relative(&relative),
            });
        }
    }

    Ok(nodes)
}
