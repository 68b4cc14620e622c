/// Longest accepted frame; anything larger is a transport error
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Extract the JSON payload carried by one line of the stream
///
/// Plain newline-delimited JSON lines are returned as-is. Server-sent
/// event framing is unwrapped: `data:` lines yield their payload, while
/// blank lines, `:` comments and `event:`/`id:`/`retry:` fields yield
/// nothing.
pub fn frame_payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }

    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();
        return (!data.is_empty()).then_some(data);
    }

    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return None;
    }

    Some(line.trim())
}
