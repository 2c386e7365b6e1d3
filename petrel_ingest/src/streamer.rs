//! Memory-bounded extraction of text lines from a blob's byte stream.

use futures::StreamExt;
use petrel_blob_store::BlobDownload;
use snafu::ResultExt;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{BlobStoreSnafu, Result, TimestampSnafu},
    event::{BlobEvent, EventMetadata, EventSink},
};

/// Result of streaming a single blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Number of events emitted.
    pub events: u64,
    /// `true` iff the stream was fully consumed; `false` iff cancellation
    /// was observed mid-blob.
    pub completed: bool,
}

/// Streams blob content line-by-line, attaching provenance metadata to each
/// event.
///
/// Lines end at LF, CR, or CRLF, including a CRLF split across two chunks.
/// Decoding is per-line lossy UTF-8, so malformed bytes become replacement
/// characters instead of errors. Memory held at any point is bounded by the
/// longest line, not the blob size, and any chunking of the same bytes
/// yields the same event sequence.
pub struct LineStreamer {
    storage_account: String,
    container: String,
    skip_empty_lines: bool,
}

impl LineStreamer {
    pub fn new(
        storage_account: impl Into<String>,
        container: impl Into<String>,
        skip_empty_lines: bool,
    ) -> Self {
        Self {
            storage_account: storage_account.into(),
            container: container.into(),
            skip_empty_lines,
        }
    }

    /// Drain `download` into `sink`, polling `ct` between lines.
    ///
    /// When cancellation is observed the pending line is not emitted and the
    /// outcome reports `completed = false`. I/O errors from the byte stream
    /// propagate.
    pub async fn stream(
        &self,
        download: BlobDownload,
        sink: &dyn EventSink,
        ct: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let blob_name = download.info.name;
        let last_modified = download
            .info
            .last_modified
            .format(&Rfc3339)
            .context(TimestampSnafu)?;

        let mut stream = download.stream;
        // Bytes of the line currently being assembled.
        let mut carry: Vec<u8> = Vec::new();
        // The previous chunk ended in CR; a leading LF in the next chunk
        // belongs to that already-terminated line.
        let mut pending_lf_skip = false;
        let mut line_number: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context(BlobStoreSnafu {
                operation: "read_blob_stream",
            })?;
            let mut data: &[u8] = &chunk;

            if pending_lf_skip {
                match data.split_first() {
                    Some((first, rest)) => {
                        if *first == b'\n' {
                            data = rest;
                        }
                        pending_lf_skip = false;
                    }
                    None => continue,
                }
            }

            while let Some(pos) = data.iter().position(|b| *b == b'\n' || *b == b'\r') {
                carry.extend_from_slice(&data[..pos]);

                if ct.is_cancelled() {
                    debug!(blob = %blob_name, events = line_number, "stop requested mid-blob");
                    return Ok(StreamOutcome {
                        events: line_number,
                        completed: false,
                    });
                }
                self.emit_line(&mut carry, &mut line_number, sink, &blob_name, &last_modified);

                if data[pos] == b'\r' {
                    match data.get(pos + 1) {
                        Some(b'\n') => data = &data[pos + 2..],
                        Some(_) => data = &data[pos + 1..],
                        None => {
                            pending_lf_skip = true;
                            data = &[];
                        }
                    }
                } else {
                    data = &data[pos + 1..];
                }
            }
            carry.extend_from_slice(data);
        }

        // A final line without a trailing delimiter still counts.
        if !carry.is_empty() {
            if ct.is_cancelled() {
                debug!(blob = %blob_name, events = line_number, "stop requested mid-blob");
                return Ok(StreamOutcome {
                    events: line_number,
                    completed: false,
                });
            }
            self.emit_line(&mut carry, &mut line_number, sink, &blob_name, &last_modified);
        }

        debug!(blob = %blob_name, events = line_number, "finished streaming blob");
        Ok(StreamOutcome {
            events: line_number,
            completed: true,
        })
    }

    fn emit_line(
        &self,
        carry: &mut Vec<u8>,
        line_number: &mut u64,
        sink: &dyn EventSink,
        blob_name: &str,
        last_modified: &str,
    ) {
        if self.skip_empty_lines && carry.is_empty() {
            return;
        }

        *line_number += 1;
        let message = String::from_utf8_lossy(carry).into_owned();
        carry.clear();

        sink.deliver(BlobEvent {
            message,
            metadata: EventMetadata {
                azure_blob_name: blob_name.to_string(),
                azure_blob_container: self.container.clone(),
                azure_blob_storage_account: self.storage_account.clone(),
                azure_blob_line_number: *line_number,
                azure_blob_last_modified: last_modified.to_string(),
            },
        });
    }
}
