// Result Decoder - turns the sandbox stdout into a JobResult

use crate::error::JobError;
use verifier_common::types::JobResult;

/// How much of an undecodable payload is echoed back in the error
const PREVIEW_BYTES: usize = 256;

/// Decode the sandbox stdout as a `JobResult`.
///
/// Unknown fields are ignored, `solved` is required, `results` defaults to empty.
pub fn decode(stdout: &[u8]) -> Result<JobResult, JobError> {
    serde_json::from_slice(stdout).map_err(|source| JobError::Decode {
        source,
        preview: preview(stdout),
    })
}

fn preview(body: &[u8]) -> String {
    let cut = body.len().min(PREVIEW_BYTES);
    let mut text = String::from_utf8_lossy(&body[..cut]).into_owned();
    if body.len() > cut {
        text.push_str("...");
    }
    text
}
