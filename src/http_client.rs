//! Outbound HTTP agent and a size-capped body reader for upstream calls.

use std::io::{self, Read};
use std::time::Duration;

/// Agent whose connect, read and write phases are each bounded by `timeout`.
pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .build()
}

/// Buffer a response body, failing with `InvalidData` once it passes `max_bytes`.
///
/// A declared `Content-Length` over the cap fails before any body is read.
pub(crate) fn read_response_bytes(
    response: ureq::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, io::Error> {
    let cap = max_bytes as u64;
    let declared = response
        .header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());
    if let Some(length) = declared.filter(|length| *length > cap) {
        return Err(too_large(format!(
            "upstream declared {length} bytes, limit is {max_bytes}"
        )));
    }
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(cap + 1)
        .read_to_end(&mut bytes)?;
    if bytes.len() > max_bytes {
        return Err(too_large(format!(
            "upstream body exceeded {max_bytes} bytes"
        )));
    }
    Ok(bytes)
}

fn too_large(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
