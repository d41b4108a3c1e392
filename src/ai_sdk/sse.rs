/// Splits a server-sent event byte stream into `data:` payloads.
///
/// Bytes are buffered until a full frame (terminated by a blank line) is
/// available, so multi-byte characters split across chunks survive intact.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut payloads = Vec::new();
        while let Some(idx) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..idx + 2).collect();
            let raw = String::from_utf8_lossy(&frame[..idx]);
            if let Some(data) = extract_sse_data(&raw) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Returns the payload of a trailing frame that never got its blank line.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        extract_sse_data(&String::from_utf8_lossy(&rest))
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

fn extract_sse_data(raw: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
