// ABOUTME: Data types for generated bot projects
// ABOUTME: Project records, creation input and the file tree listing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Relative path → file content
pub type FileMap = BTreeMap<String, String>;

const DISCORD_AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";

/// Metadata persisted alongside a project's source tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// External application identifier, opaque to the orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
}

/// A materialized project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub root_path: PathBuf,
    #[serde(flatten)]
    pub metadata: ProjectMetadata,
}

impl Project {
    /// Invite URL for the bot, if an application identifier was supplied
    pub fn invite_url(&self) -> Option<String> {
        self.metadata
            .application_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| {
                format!(
                    "{}?client_id={}&permissions=8&scope=bot",
                    DISCORD_AUTHORIZE_URL,
                    id.trim()
                )
            })
    }
}

/// Input for materializing a new project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub application_id: Option<String>,
    pub files: FileMap,
    /// Opaque credentials written to the project's `.env`
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

/// Node in a project's file tree (no contents)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    Dir {
        name: String,
        path: String,
        children: Vec<TreeNode>,
    },
    File {
        name: String,
        path: String,
    },
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::Dir { name, .. } | TreeNode::File { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            TreeNode::Dir { path, .. } | TreeNode::File { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(application_id: Option<&str>) -> Project {
        let now = Utc::now();
        Project {
            id: "abc123".to_string(),
            root_path: PathBuf::from("/tmp/abc123"),
            metadata: ProjectMetadata {
                name: "Greeter".to_string(),
                description: String::new(),
                created_at: now,
                modified_at: now,
                application_id: application_id.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_invite_url() {
        assert_eq!(
            project(Some("1234")).invite_url().as_deref(),
            Some("https://discord.com/oauth2/authorize?client_id=1234&permissions=8&scope=bot")
        );
        assert_eq!(project(None).invite_url(), None);
        assert_eq!(project(Some("  ")).invite_url(), None);
    }

    #[test]
    fn test_tree_node_serialization() {
        let node = TreeNode::Dir {
            name: "src".to_string(),
            path: "src".to_string(),
            children: vec![TreeNode::File {
                name: "bot.py".to_string(),
                path: "src/bot.py".to_string(),
            }],
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "dir");
        assert_eq!(json["children"][0]["type"], "file");
        assert_eq!(json["children"][0]["path"], "src/bot.py");
    }
}
