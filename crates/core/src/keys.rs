//! Impression key construction.
//!
//! Bulk work products never travel in messages; they live in SharedMemory
//! under `{request_id}:{step_id}:{impression_name}` and messages carry only
//! the keys. The raw user query sits under the special `{request_id}:query`.

/// Key for a worker-produced impression.
pub fn impression_key(request_id: &str, step_id: &str, name: &str) -> String {
    format!("{request_id}:{step_id}:{name}")
}

/// Key holding the raw user query for the duration of a request.
pub fn query_key(request_id: &str) -> String {
    format!("{request_id}:query")
}

/// Prefix matching every key a request may own.
pub fn session_prefix(request_id: &str) -> String {
    format!("{request_id}:")
}

/// Render a list of impression keys the way goals carry them: a stringified
/// list, e.g. `["r1:1:retrieved_context", "r1:2:clean_text_bodies"]`.
pub fn render_key_list(keys: &[String]) -> String {
    let quoted: Vec<String> = keys.iter().map(|k| format!("{k:?}")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Parse a stringified key list back into keys. Accepts both the quoted
/// rendering above and a bare comma-separated fallback.
pub fn parse_key_list(content: &str) -> Vec<String> {
    let inner = content.trim().trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(|part| part.trim().trim_matches('\'').trim_matches('"').to_string())
        .filter(|part| !part.is_empty())
        .collect()
}
