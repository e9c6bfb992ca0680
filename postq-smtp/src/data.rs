//! Message body encoding for the DATA phase.

/// Prepare a raw message for transmission after `354`
///
/// Every line ending becomes CRLF, lines starting with `.` get a second dot,
/// and the terminating `.` line is appended.
#[must_use]
pub fn encode(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 5);

    let body = message
        .strip_suffix(b"\n")
        .map_or(message, |body| body.strip_suffix(b"\r").unwrap_or(body));

    if !message.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b".\r\n");
    out
}
