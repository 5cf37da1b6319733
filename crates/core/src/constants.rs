/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "QUANTDESK_CACHE_DIR";

/// SQLite file name inside the cache directory
pub const CACHE_FILE_NAME: &str = "market-data.sqlite";
