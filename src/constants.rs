//! Centralized constants for the teradl bot.
//!
//! This module contains all constants that control the job pipeline,
//! the pending-input flow and the resolver/download clients.

use std::time::Duration;

// ============================================================================
// Job Pipeline Settings
// ============================================================================

/// Number of link jobs allowed in flight at once
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 50;

/// Largest declared (and received) file size accepted (2 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// File extensions accepted by the validating stage
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "avi", "mov", "webm"];

/// Minimal interval between two progress edits of the same status message
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// HTTP Settings
// ============================================================================

/// Default timeout for a resolver API call
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout shared by the resolver and download clients
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single read while streaming a download
pub const DOWNLOAD_READ_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Telegram Settings
// ============================================================================

/// Expiration time of a pending password or chat-list prompt
pub const PENDING_INPUT_EXPIRE: Duration = Duration::from_secs(10 * 60);

/// Size of the LRU cache holding pending prompts
pub const PENDING_LRU_SIZE: usize = 1024;

/// Maximum length of an error message forwarded to the chat
pub const MAX_ERROR_LEN: usize = 100;

// ============================================================================
// Store Settings
// ============================================================================

/// `_id` of the singleton settings document
pub const SETTINGS_DOC_ID: &str = "global";

pub const CONFIG_COLLECTION: &str = "config";
pub const BROADCASTED_COLLECTION: &str = "broadcasted";
pub const ADMINS_COLLECTION: &str = "admins";
