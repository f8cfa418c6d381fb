// ABOUTME: Build context packaging for project images
// ABOUTME: Resolves the build descriptor and tars the project tree for the engine

use crate::providers::RuntimeError;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Entrypoints probed, in order, when a project ships no Dockerfile
pub const ENTRYPOINT_CANDIDATES: [&str; 4] = ["src/bot.py", "bot.py", "main.py", "src/main.py"];

const DOCKERFILE: &str = "Dockerfile";
const REQUIREMENTS: &str = "requirements.txt";
const BASE_IMAGE: &str = "python:3.11-slim";

/// How the image for a project gets described
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// The project ships its own Dockerfile
    Provided,
    /// A Python Dockerfile is generated for the detected entrypoint
    Synthesized { entrypoint: String, requirements: bool },
}

impl Descriptor {
    pub fn resolve(dir: &Path) -> Result<Self, RuntimeError> {
        if dir.join(DOCKERFILE).is_file() {
            return Ok(Descriptor::Provided);
        }

        let entrypoint = ENTRYPOINT_CANDIDATES
            .iter()
            .find(|candidate| dir.join(candidate).is_file())
            .ok_or_else(|| RuntimeError::Build {
                output: format!(
                    "No {} and no Python entrypoint found (looked for {})",
                    DOCKERFILE,
                    ENTRYPOINT_CANDIDATES.join(", ")
                ),
            })?;

        Ok(Descriptor::Synthesized {
            entrypoint: entrypoint.to_string(),
            requirements: dir.join(REQUIREMENTS).is_file(),
        })
    }

    /// Dockerfile text for synthesized descriptors
    pub fn dockerfile(&self) -> Option<String> {
        let Descriptor::Synthesized {
            entrypoint,
            requirements,
        } = self
        else {
            return None;
        };

        let mut lines = vec![format!("FROM {}", BASE_IMAGE), "WORKDIR /app".to_string()];
        if *requirements {
            lines.push(format!("COPY {} .", REQUIREMENTS));
            lines.push(format!(
                "RUN pip install --no-cache-dir -r {}",
                REQUIREMENTS
            ));
        }
        lines.push("COPY . .".to_string());
        lines.push("ENV PYTHONPATH=/app".to_string());
        lines.push(format!("CMD [\"python\", \"-u\", \"{}\"]", entrypoint));

        Some(lines.join("\n") + "\n")
    }
}

/// Tar the project directory into an in-memory build context.
///
/// Top-level entries named in `exclude` are skipped and symlinks are archived
/// as links rather than followed. A synthesized Dockerfile is injected into the
/// archive only; the project tree on disk is left untouched.
pub fn build_context(dir: &Path, exclude: &[String]) -> Result<(Vec<u8>, Descriptor), RuntimeError> {
    let descriptor = Descriptor::resolve(dir)?;
    let context_error = |e: std::io::Error| RuntimeError::Build {
        output: format!("Failed to package build context: {}", e),
    };

    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() != 1
                || !exclude
                    .iter()
                    .any(|name| entry.file_name().to_string_lossy() == name.as_str())
        });

    for entry in walker {
        let entry = entry.map_err(|e| context_error(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| context_error(std::io::Error::other(e)))?;
        archive
            .append_path_with_name(entry.path(), relative)
            .map_err(context_error)?;
    }

    if let Some(dockerfile) = descriptor.dockerfile() {
        let mut header = tar::Header::new_gnu();
        header.set_size(dockerfile.len() as u64);
        header.set_mode(0o644);
        archive
            .append_data(&mut header, DOCKERFILE, dockerfile.as_bytes())
            .map_err(context_error)?;
    }

    let bytes = archive.into_inner().map_err(context_error)?;
    debug!(dir = %dir.display(), bytes = bytes.len(), descriptor = ?descriptor, "Packaged build context");
    Ok((bytes, descriptor))
}
