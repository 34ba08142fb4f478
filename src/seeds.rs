/// Fallback seed articles for a crawl started without any. Hub pages with
/// dense outbound link sets, so the frontier fans out quickly.
pub const DEFAULT_SEEDS: &[&str] = &[
    "Philosophy",
    "Mathematics",
    "Physics",
    "History",
    "Biology",
];
