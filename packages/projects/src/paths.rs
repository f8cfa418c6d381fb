// ABOUTME: Path and identifier validation for the project store
// ABOUTME: Keeps every editor path confined to its project root

use crate::error::{StoreError, StoreResult};
use std::path::{Component, Path, PathBuf};

/// Reserved file holding project metadata inside each project root
pub const METADATA_FILE: &str = ".botyard.json";

/// File receiving opaque credentials
pub const SECRETS_FILE: &str = ".env";

const PROJECT_ID_LEN: usize = 12;

/// Generate a fresh project identifier (12 lowercase hex characters)
pub fn new_project_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(PROJECT_ID_LEN);
    id
}

/// Validate project ID to prevent path traversal attacks.
///
/// Project IDs must contain only lowercase ASCII letters, digits, hyphens, and
/// underscores, so each ID maps to exactly one directory and one container name.
pub fn validate_project_id(project_id: &str) -> StoreResult<()> {
    if project_id.is_empty() {
        return Err(StoreError::InvalidProjectId {
            project_id: project_id.to_string(),
            reason: "Project ID cannot be empty".to_string(),
        });
    }

    if project_id.contains("..") || project_id.contains('/') || project_id.contains('\\') {
        return Err(StoreError::InvalidProjectId {
            project_id: project_id.to_string(),
            reason: "Project ID cannot contain path traversal sequences (.. / \\)".to_string(),
        });
    }

    if !project_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(StoreError::InvalidProjectId {
            project_id: project_id.to_string(),
            reason: "Project ID can only contain lowercase letters, digits, hyphens, and underscores"
                .to_string(),
        });
    }

    Ok(())
}

/// Lexically normalize an editor-supplied relative path.
///
/// Rejects absolute paths, `..` components and the reserved metadata file. The
/// error is always `NotFound` so callers cannot probe outside the project.
pub fn normalize_relative(relative: &str) -> StoreResult<PathBuf> {
    let trimmed = relative.trim();
    let mut clean = PathBuf::new();

    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StoreError::NotFound(relative.to_string()));
            }
        }
    }

    if clean.as_os_str().is_empty() || clean == Path::new(METADATA_FILE) {
        return Err(StoreError::NotFound(relative.to_string()));
    }

    Ok(clean)
}

/// Resolve `relative` under `root` and make sure the result, after following
/// symlinks, still lives inside `root`. The target itself may not exist yet;
/// the nearest existing ancestor is checked instead.
pub fn confine(root: &Path, relative: &str) -> StoreResult<PathBuf> {
    let clean = normalize_relative(relative)?;
    let canonical_root = root
        .canonicalize()
        .map_err(|_| StoreError::NotFound(root.display().to_string()))?;
    let candidate = canonical_root.join(&clean);

    let mut probe = candidate.as_path();
    loop {
        match probe.canonicalize() {
            Ok(resolved) => {
                if !resolved.starts_with(&canonical_root) {
                    return Err(StoreError::NotFound(relative.to_string()));
                }
                break;
            }
            Err(_) => match probe.parent() {
                Some(parent) => probe = parent,
                None => return Err(StoreError::NotFound(relative.to_string())),
            },
        }
    }

    Ok(candidate)
}

/// Render a relative path with forward slashes for API consumers
pub fn display_relative(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_new_project_id_shape() {
        let id = new_project_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(validate_project_id(&id).is_ok());
        assert_ne!(id, new_project_id());
    }

    #[test]
    fn test_validate_project_id_valid() {
        assert!(validate_project_id("my-project").is_ok());
        assert!(validate_project_id("my_project").is_ok());
        assert!(validate_project_id("a1b2c3d4e5f6").is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("../../../etc/passwd")]
    #[case("..\\..\\windows")]
    #[case("project/subdir")]
    #[case("project name")]
    #[case("project@name")]
    #[case("Abc123")]
    #[case("DEADBEEF0000")]
    fn test_validate_project_id_rejects(#[case] id: &str) {
        assert!(validate_project_id(id).is_err());
    }

    #[rstest]
    #[case("bot.py", "bot.py")]
    #[case("./src/bot.py", "src/bot.py")]
    #[case("src//cogs/./fun.py", "src/cogs/fun.py")]
    fn test_normalize_relative_accepts(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_relative(input).unwrap(), PathBuf::from(expected));
    }

    #[rstest]
    #[case("../../etc/passwd")]
    #[case("src/../../outside")]
    #[case("/etc/passwd")]
    #[case("")]
    #[case(".")]
    #[case(METADATA_FILE)]
    fn test_normalize_relative_rejects(#[case] input: &str) {
        assert!(normalize_relative(input).unwrap_err().is_not_found());
    }

    #[test]
    fn test_confine_allows_missing_targets_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = confine(dir.path(), "new/dir/file.py").unwrap();
        assert!(resolved.ends_with("new/dir/file.py"));
    }

    #[cfg(unix)]
    #[test]
    fn test_confine_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let err = confine(root.path(), "link/secret.txt").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_display_relative() {
        assert_eq!(display_relative(Path::new("src/cogs/fun.py")), "src/cogs/fun.py");
    }
}
