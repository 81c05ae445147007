/// Application name
pub const APP_NAME: &str = "coursync";

/// Header carrying the authenticated user id on every API request
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the shared secret on webhook deliveries
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Maximum size of a single document in bytes (50 MiB)
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum aggregate size of the documents of one assignment (200 MiB)
pub const MAX_ASSIGNMENT_SIZE: u64 = 200 * 1024 * 1024;

/// Maximum aggregate size of one user's documents (2 GiB)
pub const MAX_USER_QUOTA: u64 = 2 * 1024 * 1024 * 1024;

/// Cached quota rows older than this are recomputed before display
pub const QUOTA_STALENESS_SECS: i64 = 3600;

/// Per-user push mailbox capacity
pub const MAILBOX_CAPACITY: usize = 100;

/// Interval between heartbeat comments on an open push stream
pub const HEARTBEAT_SECS: u64 = 15;

/// Longest push stream line a client buffers before giving up on the
/// connection
pub const MAX_PUSH_LINE_BYTES: usize = 1024 * 1024;

/// Fixed delay between push reconnect attempts
pub const RECONNECT_BACKOFF_SECS: u64 = 5;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Lower-case file extensions accepted for upload, with their MIME type.
pub const ALLOWED_EXTENSIONS: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("ppt", "application/vnd.ms-powerpoint"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("svg", "image/svg+xml"),
];

/// Look up the MIME type of an allowed extension (case-insensitive).
/// Returns `None` when the extension is not on the allow-list.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .iter()
        .find(|(allowed, _)| *allowed == ext)
        .map(|(_, mime)| *mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_lookup_is_case_insensitive() {
        assert_eq!(mime_for_extension("PDF"), Some("application/pdf"));
        assert_eq!(mime_for_extension("md"), Some("text/markdown"));
        assert_eq!(mime_for_extension("exe"), None);
    }

    #[test]
    fn quota_tiers_are_ordered() {
        assert!(MAX_FILE_SIZE < MAX_ASSIGNMENT_SIZE);
        assert!(MAX_ASSIGNMENT_SIZE < MAX_USER_QUOTA);
    }
}
