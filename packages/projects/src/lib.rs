//! # Botyard Projects
//!
//! On-disk store for generated bot projects. Each project is a directory under
//! the workspace root holding the generated source tree, an optional `.env`
//! with opaque credentials, and a reserved metadata record.

pub mod error;
pub mod paths;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use paths::{new_project_id, validate_project_id, METADATA_FILE, SECRETS_FILE};
pub use store::ProjectStore;
pub use types::{FileMap, NewProject, Project, ProjectMetadata, TreeNode};
