//! Default values for configuration

use crate::parse::IdentityScheme;

/// Default transport chunk size (1 MiB)
pub fn default_chunk_size() -> usize {
    1024 * 1024
}

/// Default number of ingestion transactions allowed in flight at once
pub fn default_max_in_flight() -> usize {
    4
}

/// Default number of chunks buffered between the reader and the parser
pub fn default_channel_capacity() -> usize {
    2
}

/// Unterminated records at end of input are dropped unless enabled
pub fn default_flush_unterminated_record() -> bool {
    false
}

/// Default record identity scheme
pub fn default_identity_scheme() -> IdentityScheme {
    IdentityScheme::Rolling32
}

/// Default SQLite pool size
pub fn default_max_connections() -> u32 {
    5
}

/// Default time a writer waits on a locked database
pub fn default_busy_timeout_secs() -> u64 {
    30
}

/// Default page size for record listings
pub fn default_page_size() -> u32 {
    10
}

/// Render a commented default config file
pub fn render_default_config() -> String {
    format!(
        r#"# health-ingest configuration

[import]
# Bytes read from the export per chunk
chunk_size = {chunk_size}
# Concurrent ingestion transactions
max_in_flight = {max_in_flight}
# Chunks buffered between the file reader and the parser
channel_capacity = {channel_capacity}
# Emit a record still open when the file ends instead of dropping it
flush_unterminated_record = {flush}

[identity]
# "rolling32" keeps ids compatible with earlier imports, "blake3" uses a digest
scheme = "rolling32"

[database]
max_connections = {max_connections}
busy_timeout_secs = {busy_timeout}

[query]
page_size = {page_size}
"#,
        chunk_size = default_chunk_size(),
        max_in_flight = default_max_in_flight(),
        channel_capacity = default_channel_capacity(),
        flush = default_flush_unterminated_record(),
        max_connections = default_max_connections(),
        busy_timeout = default_busy_timeout_secs(),
        page_size = default_page_size(),
    )
}
