//! User-agent allowlist for published feeds.

/// Whether a request with `user_agent` may read a feed.
///
/// An empty allowlist admits everyone. Otherwise the agent must contain at
/// least one entry as a case-sensitive substring. A missing header should be
/// passed as `""`.
pub fn authorized(user_agent: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }

    let permitted = allowlist
        .iter()
        .any(|entry| user_agent.contains(entry.as_str()));
    if !permitted {
        tracing::warn!(user_agent = %user_agent, "Rejected request from unpermitted user agent");
    }
    permitted
}
