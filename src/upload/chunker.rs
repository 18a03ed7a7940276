//! Fixed-size chunk producer
//!
//! Reads a source into `chunk_size` chunks and hands them to a bounded
//! channel. With a capacity of one, the next chunk is only read once the
//! consumer has taken the previous one, so memory stays bounded by a couple of
//! parts whatever the object size.

use super::UploadError;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Chunks buffered between producer and consumer
pub const CHANNEL_CAPACITY: usize = 1;

const INITIAL_BUFFER: usize = 8 * 1024 * 1024;

/// Bounded channel for chunks
pub fn channel() -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// Read up to `limit` bytes, returning fewer only at end of stream
///
/// The buffer grows with the data read, so a large part size planned for a
/// stream of unknown length does not allocate a full part up front.
async fn read_chunk<R>(reader: &mut R, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(limit.min(INITIAL_BUFFER));
    reader.take(limit as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Send `reader` to `tx` in `chunk_size` chunks and return the bytes read
///
/// Every chunk is full except possibly the last. An empty source yields a
/// single empty chunk so a multipart upload always has a part to complete.
pub async fn produce_chunks<R>(
    mut reader: R,
    chunk_size: usize,
    tx: mpsc::Sender<Bytes>,
) -> Result<u64, UploadError>
where
    R: AsyncRead + Unpin,
{
    if chunk_size == 0 {
        return Err(UploadError::InvalidArgument(
            "chunk size must be greater than 0".into(),
        ));
    }

    let mut total = 0u64;
    let mut chunks = 0u64;
    loop {
        let buf = read_chunk(&mut reader, chunk_size).await?;
        let n = buf.len();
        if n == 0 && chunks > 0 {
            break;
        }
        total += n as u64;
        chunks += 1;

        if tx.send(Bytes::from(buf)).await.is_err() {
            return Err(UploadError::MultipartError(
                "chunk consumer stopped before the source was exhausted".into(),
            ));
        }
        if n < chunk_size {
            break;
        }
    }

    tracing::debug!(chunks = chunks, bytes = total, "Chunking finished");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(data: Vec<u8>, chunk_size: usize) -> (u64, Vec<Bytes>) {
        let (tx, mut rx) = channel();
        let producer = produce_chunks(std::io::Cursor::new(data), chunk_size, tx);
        let consumer = async {
            let mut chunks = Vec::new();
            while let Some(chunk) = rx.recv().await {
                chunks.push(chunk);
            }
            Ok::<_, UploadError>(chunks)
        };
        futures::try_join!(producer, consumer).unwrap()
    }

    #[tokio::test]
    async fn test_exact_multiple() {
        let (total, chunks) = collect(vec![7u8; 30], 10).await;
        assert_eq!(total, 30);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 10));
    }

    #[tokio::test]
    async fn test_trailing_partial_chunk() {
        let data: Vec<u8> = (0..25u8).collect();
        let (total, chunks) = collect(data.clone(), 10).await;
        assert_eq!(total, 25);
        assert_eq!(chunks.iter().map(Bytes::len).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_empty_source_yields_one_empty_chunk() {
        let (total, chunks) = collect(Vec::new(), 10).await;
        assert_eq!(total, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[tokio::test]
    async fn test_short_reads_are_coalesced() {
        let reader = tokio_test::io::Builder::new()
            .read(b"abc")
            .read(b"defg")
            .read(b"hij")
            .read(b"k")
            .build();
        let (tx, mut rx) = channel();
        let producer = produce_chunks(reader, 5, tx);
        let consumer = async {
            let mut chunks = Vec::new();
            while let Some(chunk) = rx.recv().await {
                chunks.push(chunk);
            }
            Ok::<_, UploadError>(chunks)
        };
        let (total, chunks) = futures::try_join!(producer, consumer).unwrap();
        assert_eq!(total, 11);
        assert_eq!(&chunks[0][..], b"abcde");
        assert_eq!(&chunks[1][..], b"fghij");
        assert_eq!(&chunks[2][..], b"k");
    }

    #[tokio::test]
    async fn test_dropped_consumer_fails_producer() {
        let (tx, rx) = channel();
        drop(rx);
        let result = produce_chunks(std::io::Cursor::new(vec![1u8; 20]), 10, tx).await;
        assert!(matches!(result, Err(UploadError::MultipartError(_))));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let (tx, _rx) = channel();
        let result = produce_chunks(std::io::Cursor::new(vec![1u8]), 0, tx).await;
        assert!(matches!(result, Err(UploadError::InvalidArgument(_))));
    }
}
