//! Hands reply chunks from the socket reader to a decoding task.

use geode_core::protocol::{Chunk, ChunkHandler, ChunkedReply};
use geode_core::{GeodeError, Result};
use tokio::sync::{mpsc, oneshot};

/// Chunks buffered between the reader and the decoding task.
const CHUNK_QUEUE_CAPACITY: usize = 16;

/// Decodes the chunks of one reply on a separate task.
///
/// The socket reader submits chunks as they arrive and, after the last one,
/// waits in [`ChunkProcessor::finish`] until every chunk has been processed.
#[derive(Debug)]
pub struct ChunkProcessor<H> {
    sender: mpsc::Sender<Chunk>,
    done: oneshot::Receiver<ChunkedReply<H>>,
}

impl<H: ChunkHandler + 'static> ChunkProcessor<H> {
    /// Spawns the decoding task for `reply`.
    pub fn spawn(reply: ChunkedReply<H>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Chunk>(CHUNK_QUEUE_CAPACITY);
        let (done_tx, done) = oneshot::channel();

        tokio::spawn(async move {
            let mut reply = reply;
            while let Some(chunk) = receiver.recv().await {
                reply.process(&chunk);
            }
            tracing::trace!(
                request = %reply.request(),
                chunks = reply.chunks(),
                "chunked reply processed"
            );
            let _ = done_tx.send(reply);
        });

        Self { sender, done }
    }

    /// Queues a chunk for processing.
    pub async fn submit(&self, chunk: Chunk) -> Result<()> {
        self.sender
            .send(chunk)
            .await
            .map_err(|_| GeodeError::IllegalState("chunk processor has stopped".to_string()))
    }

    /// Waits until every submitted chunk has been processed and returns the
    /// reply.
    pub async fn finish(self) -> Result<ChunkedReply<H>> {
        drop(self.sender);
        self.done.await.map_err(|_| {
            GeodeError::IllegalState("chunk processor ended without a reply".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geode_core::protocol::{DurableCqListCollector, MessageType, Part, CHUNK_LAST};

    // an array list holding one ascii string
    fn chunk(value: &str, last: bool) -> Chunk {
        let mut payload = vec![65u8, 1, 87, 0, value.len() as u8];
        payload.extend_from_slice(value.as_bytes());
        Chunk::from_parts(
            MessageType::Response,
            if last { CHUNK_LAST } else { 0 },
            &[Part::object(payload)],
        )
    }

    #[tokio::test]
    async fn test_processes_chunks_in_order() {
        let reply = ChunkedReply::new(MessageType::GetDurableCqs, DurableCqListCollector::new());
        let processor = ChunkProcessor::spawn(reply);

        processor.submit(chunk("a", false)).await.unwrap();
        processor.submit(chunk("b", false)).await.unwrap();
        processor.submit(chunk("c", true)).await.unwrap();

        let reply = processor.finish().await.unwrap();
        assert_eq!(reply.chunks(), 3);
        let names = reply.finish().unwrap().into_names();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_finish_without_chunks() {
        let reply = ChunkedReply::new(MessageType::GetDurableCqs, DurableCqListCollector::new());
        let reply = ChunkProcessor::spawn(reply).finish().await.unwrap();
        assert_eq!(reply.chunks(), 0);
    }
}
