//! Chunked response bodies for snapshots and live job logs.

use std::io;

use axum::{
    body::{Body, Bytes},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use futures_util::{Stream, stream};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

pub const DEFAULT_STREAM_CHUNK_BYTES: usize = 128;
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const LOG_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Streams `source` as the response body.
///
/// Every non-empty read becomes its own body frame, which hyper writes out
/// as soon as it is produced. End of stream finishes the response normally;
/// a read error aborts it. The 200 status is committed up front, so a late
/// error can only show up as a truncated body.
pub fn serve<R>(source: R, chunk_bytes: usize, content_type: &'static str) -> Response
where
    R: AsyncRead + Send + Unpin + 'static,
{
    (
        StatusCode::OK,
        [(CONTENT_TYPE, content_type)],
        Body::from_stream(chunks(source, chunk_bytes)),
    )
        .into_response()
}

/// Reads `source` through a fixed scratch buffer of `chunk_bytes` (at least one byte).
pub fn chunks<R>(source: R, chunk_bytes: usize) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    R: AsyncRead + Send + Unpin + 'static,
{
    // A zero-length destination makes readers report 0 bytes, which looks like EOF.
    let scratch = vec![0u8; chunk_bytes.max(1)];
    stream::try_unfold(
        (source, scratch),
        |(mut source, mut scratch)| async move {
            let read = match source.read(&mut scratch).await {
                Ok(read) => read,
                Err(err) => {
                    warn!("aborting streamed response: {err}");
                    return Err(err);
                }
            };
            if read == 0 {
                return Ok(None);
            }
            let chunk = Bytes::copy_from_slice(&scratch[..read]);
            Ok(Some((chunk, (source, scratch))))
        },
    )
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    use futures_util::StreamExt;
    use tokio::io::{AsyncWriteExt, ReadBuf};

    use super::*;

    /// Yields `prefix` once, then fails.
    struct BrokenPipe {
        prefix: Option<&'static [u8]>,
    }

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.prefix.take() {
                Some(prefix) => {
                    buf.put_slice(prefix);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "job log closed",
                ))),
            }
        }
    }

    #[tokio::test]
    async fn splits_source_into_fixed_size_chunks() {
        let payload: &'static [u8] = &[7u8; 300];
        let sizes = chunks(payload, 128)
            .map(|chunk| chunk.expect("slice reads never fail").len())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(sizes, vec![128, 128, 44]);
    }

    #[tokio::test]
    async fn zero_chunk_size_still_makes_progress() {
        let payload: &'static [u8] = b"abc";
        let collected = chunks(payload, 0)
            .map(|chunk| chunk.expect("slice reads never fail"))
            .collect::<Vec<_>>()
            .await;
        assert_eq!(collected.concat(), b"abc");
    }

    #[tokio::test]
    async fn delivers_bytes_from_several_separate_writes() {
        let (reader, mut writer) = tokio::io::duplex(16);
        let producer = tokio::spawn(async move {
            for part in [&b"first line\n"[..], b"second line\n", b"done\n"] {
                writer.write_all(part).await.expect("write should succeed");
                tokio::task::yield_now().await;
            }
        });

        let response = serve(reader, DEFAULT_STREAM_CHUNK_BYTES, LOG_CONTENT_TYPE);
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should complete at end of stream");
        assert_eq!(&body[..], b"first line\nsecond line\ndone\n");
        producer.await.expect("producer should finish");
    }

    #[tokio::test]
    async fn read_error_ends_stream_after_sent_bytes() {
        let items = chunks(
            BrokenPipe {
                prefix: Some(b"partial"),
            },
            DEFAULT_STREAM_CHUNK_BYTES,
        )
        .collect::<Vec<_>>()
        .await;
        assert_eq!(items.len(), 2);
        assert_eq!(
            &items[0].as_ref().expect("first chunk is data")[..],
            b"partial"
        );
        assert_eq!(
            items[1].as_ref().expect_err("second item is the error").kind(),
            io::ErrorKind::BrokenPipe
        );
    }
}
