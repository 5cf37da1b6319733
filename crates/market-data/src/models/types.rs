use std::borrow::Cow;
use std::sync::Arc;

/// Provider identifier - mostly static constants
pub type ProviderId = Cow<'static, str>;

/// Normalized instrument symbol (e.g. "600519.SH", "AAPL")
pub type Symbol = Arc<str>;
