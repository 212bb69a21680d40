use parley_core::Fragment;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Incremental line decoder for the model backend's event stream.
///
/// Bytes are buffered until a `\n` arrives, so a line (or a multi-byte
/// character) split across reads decodes the same as if it arrived whole.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` has been seen. All later input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one network buffer and return the fragments it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Fragment> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;
            self.decode_line(&line, &mut out);
            if self.finished {
                self.buffer.clear();
                return out;
            }
        }
        self.buffer.drain(..start);
        out
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<Fragment> {
        let mut out = Vec::new();
        if self.finished || self.buffer.is_empty() {
            self.buffer.clear();
            return out;
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest).into_owned();
        self.decode_line(&line, &mut out);
        out
    }

    fn decode_line(&mut self, raw: &str, out: &mut Vec<Fragment>) {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        if payload == DONE_SENTINEL {
            self.finished = true;
            return;
        }
        match serde_json::from_str::<Fragment>(payload) {
            Ok(fragment) => out.push(fragment),
            Err(e) => {
                tracing::warn!(error = %e, payload, "dropping undecodable fragment");
            }
        }
    }
}

/// Decode a complete byte stream in one go.
pub fn decode_all(bytes: &[u8]) -> Vec<Fragment> {
    let mut decoder = FrameDecoder::new();
    let mut out = decoder.push(bytes);
    out.extend(decoder.finish());
    out
}
