//! Cacheability decisions taken before and after the handler runs.

use crate::context::Context;
use crate::http::StatusCode;

use super::config::CacheConfig;

impl CacheConfig {
    /// Whether the request may be looked up and stored at all.
    ///
    /// A configured `cache_if` predicate decides alone; otherwise the request
    /// method must be in the method list.
    pub fn is_cacheable(&self, ctx: &Context) -> bool {
        match &self.cache_if {
            Some(predicate) => predicate(ctx),
            None => self.methods.contains(ctx.request().method()),
        }
    }

    /// Whether the stored entry must be skipped and regenerated for this request.
    pub fn should_refresh(&self, ctx: &Context) -> bool {
        self.refresh.as_ref().is_some_and(|predicate| predicate(ctx))
    }

    /// Whether a response with `status` is worth storing.
    pub fn is_status_cacheable(&self, status: StatusCode) -> bool {
        self.status_codes.contains(&status)
    }
}
