// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Botyard

// Workspace Configuration
pub const BOTYARD_WORKSPACE_ROOT: &str = "BOTYARD_WORKSPACE_ROOT";

// Server Configuration
pub const BOTYARD_API_HOST: &str = "BOTYARD_API_HOST";
pub const BOTYARD_API_PORT: &str = "BOTYARD_API_PORT";
pub const PORT: &str = "PORT"; // Legacy

// CORS Configuration
pub const BOTYARD_CORS_ORIGIN: &str = "BOTYARD_CORS_ORIGIN";

// Log Stream Configuration
pub const BOTYARD_LOG_BUFFER_LINES: &str = "BOTYARD_LOG_BUFFER_LINES";
pub const BOTYARD_LOG_TAIL_LINES: &str = "BOTYARD_LOG_TAIL_LINES";
pub const BOTYARD_READY_MARKERS: &str = "BOTYARD_READY_MARKERS";

// Container Runtime Configuration
pub const BOTYARD_STOP_TIMEOUT_SECS: &str = "BOTYARD_STOP_TIMEOUT_SECS";
pub const BOTYARD_BUILD_TIMEOUT_SECS: &str = "BOTYARD_BUILD_TIMEOUT_SECS";
pub const BOTYARD_CONTAINER_MEMORY_MB: &str = "BOTYARD_CONTAINER_MEMORY_MB";
pub const BOTYARD_STOP_ON_EXIT: &str = "BOTYARD_STOP_ON_EXIT";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
