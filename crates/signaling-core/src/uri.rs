//! SIP URI helpers.

/// Extract the user part of a SIP URI: `sip:+15551234@host;tag=x` → `+15551234`.
///
/// Falls back to the input (trimmed of a scheme prefix) when there is no
/// `@`, which covers bare numbers.
pub fn extract_number(uri: &str) -> String {
    let without_scheme = uri
        .strip_prefix("sips:")
        .or_else(|| uri.strip_prefix("sip:"))
        .unwrap_or(uri);

    let user_part = match without_scheme.split_once('@') {
        Some((user, _host)) => user,
        None => without_scheme,
    };

    // Drop any URI parameters attached to the user part.
    user_part
        .split_once(';')
        .map(|(user, _)| user)
        .unwrap_or(user_part)
        .to_string()
}
