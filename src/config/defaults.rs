pub(super) const MIN_TIMEOUT_MS: u64 = 100;
pub(super) const MAX_PAGE_SIZE: u32 = 500;

pub(super) fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

pub(super) fn clamp_timeout_ms(value: u64) -> u64 {
    value.max(MIN_TIMEOUT_MS)
}

pub(super) fn clamp_page_size(value: u32) -> u32 {
    value.clamp(1, MAX_PAGE_SIZE)
}

pub(super) fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

pub(super) fn default_io_timeout_ms() -> u64 {
    10_000
}

pub(super) fn default_max_body_bytes() -> usize {
    64 * 1024
}

pub(super) fn default_reviews_url() -> String {
    "http://128.199.96.56:8005/reviews".to_string()
}

pub(super) fn default_page_size() -> u32 {
    5
}

pub(super) fn default_upstream_timeout_ms() -> u64 {
    10_000
}

pub(super) fn default_max_response_bytes() -> usize {
    4 * 1024 * 1024
}

pub(super) fn default_false() -> bool {
    false
}

pub(super) fn default_results_file() -> String {
    "verification_results.json".to_string()
}

pub(super) fn default_backup_file() -> String {
    "verification_results_backup.json".to_string()
}

pub(super) fn default_log_file() -> String {
    "verification_log.txt".to_string()
}

pub(super) fn default_sqlite_file() -> String {
    "verification_results.db".to_string()
}

pub(super) fn default_ledger_timeout_ms() -> u64 {
    5_000
}

pub(super) fn default_positive_label() -> String {
    "INCIDENT".to_string()
}

pub(super) fn default_high_confidence() -> f64 {
    0.8
}

pub(super) fn default_medium_confidence() -> f64 {
    0.5
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_max_log_files() -> usize {
    10
}
