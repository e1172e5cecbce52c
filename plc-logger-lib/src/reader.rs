use crate::error::LoggerError;
use crate::tag::{TagResponse, TagValue};
use async_trait::async_trait;

/// Capability to read named tags from a controller.
///
/// `Err` means the transport failed and the session cannot continue. A
/// controller that rejects a single tag reports it through the response's
/// [`ReadStatus`](crate::tag::ReadStatus) instead.
#[async_trait]
pub trait TagReader: Send {
    async fn read(&mut self, tag: &str) -> Result<TagResponse<TagValue>, LoggerError>;

    /// Reads several tags, one response per name in the same order.
    /// Implementations override this when they can batch round trips.
    async fn read_many(&mut self, tags: &[String]) -> Result<Vec<TagResponse<TagValue>>, LoggerError> {
        let mut out = Vec::with_capacity(tags.len());
        for tag in tags {
            out.push(self.read(tag).await?);
        }
        Ok(out)
    }

    /// Reads `count` consecutive byte-sized elements starting at `tag`.
    async fn read_bytes(&mut self, tag: &str, count: usize) -> Result<TagResponse<Vec<u8>>, LoggerError>;

    /// Releases the controller session. Called once when the session ends.
    async fn close(&mut self) -> Result<(), LoggerError> {
        Ok(())
    }
}

#[async_trait]
impl<R: TagReader + ?Sized> TagReader for Box<R> {
    async fn read(&mut self, tag: &str) -> Result<TagResponse<TagValue>, LoggerError> {
        (**self).read(tag).await
    }

    async fn read_many(&mut self, tags: &[String]) -> Result<Vec<TagResponse<TagValue>>, LoggerError> {
        (**self).read_many(tags).await
    }

    async fn read_bytes(&mut self, tag: &str, count: usize) -> Result<TagResponse<Vec<u8>>, LoggerError> {
        (**self).read_bytes(tag, count).await
    }

    async fn close(&mut self) -> Result<(), LoggerError> {
        (**self).close().await
    }
}
