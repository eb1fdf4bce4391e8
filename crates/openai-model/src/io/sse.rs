use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Chunks(ChunksError),
    InvalidPayload,
}

/// Reads the `data` payloads of server-sent events from a chunk stream.
///
/// Comment lines and fields other than `data` are skipped. Multiple `data`
/// lines in one event are joined with `\n`. Both `\n` and `\r\n` line
/// endings are accepted.
pub struct Sse {
    buf: String,
    pending: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            pending: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(event) = self.try_parse_event() {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::Chunks)?
            else {
                return Ok(None);
            };
            self.push_bytes(&bytes)?;
        }
    }

    // A chunk boundary may split a multi-byte character, so undecodable
    // trailing bytes wait for the next chunk.
    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.pending.extend_from_slice(bytes);
        match str::from_utf8(&self.pending) {
            Ok(s) => {
                self.buf.push_str(&s.replace("\r\n", "\n"));
                self.pending.clear();
            }
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                let s = str::from_utf8(&self.pending[..valid])
                    .map_err(|_| Error::InvalidPayload)?;
                self.buf.push_str(&s.replace("\r\n", "\n"));
                self.pending.drain(..valid);
            }
            Err(_) => return Err(Error::InvalidPayload),
        }
        Ok(())
    }

    fn try_parse_event(&mut self) -> Option<String> {
        loop {
            let end = self.buf.find("\n\n")?;
            let block: String = self.buf.drain(..end + 2).collect();

            let mut data: Option<String> = None;
            for line in block.lines() {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => {
                        (field, value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line, ""),
                };
                if field != "data" {
                    continue;
                }
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }

            // Blocks made only of comments or other fields carry no payload.
            if data.is_some() {
                return data;
            }
        }
    }
}
