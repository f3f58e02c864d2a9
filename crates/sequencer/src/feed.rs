//! JSON-lines event feed
//!
//! Each line holds one `InboundEvent`. Blank lines are skipped; a line that
//! does not parse is logged and skipped.

use async_trait::async_trait;
use l1_bridge::{InboundEvent, L1ChainSource};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

/// Reads inbound events from a file or stdin, one JSON object per line
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_number: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl JsonLinesSource<BufReader<tokio::fs::File>> {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl JsonLinesSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> L1ChainSource for JsonLinesSource<R> {
    async fn next_event(&mut self) -> anyhow::Result<Option<InboundEvent>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_number += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => tracing::warn!("Skipping feed line {}: {}", self.line_number, e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l1_integration::L1Event;

    #[tokio::test]
    async fn test_reads_events_and_skips_junk() {
        let input = concat!(
            r#"{"kind":"l1","event":{"type":"reorg","common_ancestor":4}}"#,
            "\n\nnot json\n",
            r#"{"kind":"confirmation","payload":"AAEC"}"#,
            "\n"
        );
        let mut source = JsonLinesSource::new(BufReader::new(input.as_bytes()));

        assert_eq!(
            source.next_event().await.unwrap(),
            Some(InboundEvent::L1 {
                event: L1Event::Reorg { common_ancestor: 4 }
            })
        );
        assert_eq!(
            source.next_event().await.unwrap(),
            Some(InboundEvent::Confirmation {
                payload: "AAEC".to_string()
            })
        );
        assert_eq!(source.next_event().await.unwrap(), None);
        assert_eq!(source.line_number, 4);
    }
}
