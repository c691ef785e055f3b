//! Cursor iteration under operation timeouts.
//!
//! A cursor created with a timeout applies that timeout to every iteration
//! call, not to its whole lifetime. Each iteration derives a fresh context
//! from the caller's, so an outer deadline still wins when it is sooner.

use std::time::Duration;

use bytes::Bytes;
use mongo_csot::{OperationContext, with_timeout};
use mongo_types::RawDocument;

use crate::error::{Error, Result};

/// A server-side cursor.
#[async_trait::async_trait]
pub trait Cursor: Send {
    /// Return the next buffered document, issuing at most one getMore when
    /// the buffer is empty.
    ///
    /// `Ok(None)` means no document was available after that one attempt.
    async fn try_advance(&mut self, ctx: &OperationContext) -> Result<Option<Bytes>>;

    /// Whether the server has closed the cursor and the buffer is drained.
    fn is_exhausted(&self) -> bool;

    /// Return the next document, issuing getMores until one arrives, the
    /// cursor is exhausted, or an error occurs.
    async fn advance(&mut self, ctx: &OperationContext) -> Result<Option<Bytes>> {
        loop {
            if let Some(doc) = self.try_advance(ctx).await? {
                return Ok(Some(doc));
            }
            if self.is_exhausted() {
                return Ok(None);
            }
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
        }
    }
}

/// Result of one iteration step.
#[derive(Debug)]
pub enum IterationOutcome {
    /// The next document.
    Document(RawDocument),
    /// No document was produced and the cursor reported no error.
    Exhausted,
    /// The cursor failed; surfaced as a result rather than returned as an
    /// error so callers can inspect it.
    Error(Error),
}

impl IterationOutcome {
    /// The document, if one was produced.
    #[must_use]
    pub fn document(&self) -> Option<&RawDocument> {
        match self {
            Self::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// The cursor error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// A cursor plus the timeout it was created with.
pub struct CursorEntity {
    cursor: Box<dyn Cursor>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for CursorEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorEntity")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CursorEntity {
    /// Wrap a cursor. `timeout` bounds each iteration call.
    pub fn new(cursor: Box<dyn Cursor>, timeout: Option<Duration>) -> Self {
        Self { cursor, timeout }
    }

    /// The per-iteration timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the underlying cursor is exhausted.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_exhausted()
    }

    /// Run one [`Cursor::try_advance`] step.
    ///
    /// Returns `Err` only for a document that fails to decode.
    pub async fn iterate_once(&mut self, ctx: &OperationContext) -> Result<IterationOutcome> {
        let (ctx, _guard) = with_timeout(ctx, self.timeout);
        let step = self.cursor.try_advance(&ctx).await;
        Self::outcome(step)
    }

    /// Run one [`Cursor::advance`] step.
    ///
    /// Returns `Err` only for a document that fails to decode.
    pub async fn iterate_until_document_or_error(
        &mut self,
        ctx: &OperationContext,
    ) -> Result<IterationOutcome> {
        let (ctx, _guard) = with_timeout(ctx, self.timeout);
        let step = self.cursor.advance(&ctx).await;
        Self::outcome(step)
    }

    fn outcome(step: Result<Option<Bytes>>) -> Result<IterationOutcome> {
        match step {
            Ok(Some(bytes)) => {
                let doc = RawDocument::from_bytes(bytes)?;
                Ok(IterationOutcome::Document(doc))
            }
            Ok(None) => Ok(IterationOutcome::Exhausted),
            Err(err) => {
                tracing::debug!(error = %err, "cursor iteration failed");
                Ok(IterationOutcome::Error(err))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use mongo_csot::{ContextError, Instant};

    use super::*;

    fn doc(byte: u8) -> Bytes {
        Bytes::from(vec![8, 0, 0, 0, 0x0a, b'a' + byte, 0, 0])
    }

    #[derive(Default)]
    struct ScriptedCursor {
        batches: VecDeque<Result<Vec<Bytes>>>,
        buffer: VecDeque<Bytes>,
        deadlines: Arc<Mutex<Vec<Option<Instant>>>>,
    }

    #[async_trait::async_trait]
    impl Cursor for ScriptedCursor {
        async fn try_advance(&mut self, ctx: &OperationContext) -> Result<Option<Bytes>> {
            self.deadlines.lock().unwrap().push(ctx.deadline());
            if self.buffer.is_empty() {
                match self.batches.pop_front() {
                    Some(Ok(batch)) => self.buffer.extend(batch),
                    Some(Err(err)) => return Err(err),
                    None => {}
                }
            }
            Ok(self.buffer.pop_front())
        }

        fn is_exhausted(&self) -> bool {
            self.buffer.is_empty() && self.batches.is_empty()
        }
    }

    fn entity(batches: Vec<Result<Vec<Bytes>>>, timeout: Option<Duration>) -> (CursorEntity, Arc<Mutex<Vec<Option<Instant>>>>) {
        let deadlines = Arc::new(Mutex::new(Vec::new()));
        let cursor = ScriptedCursor {
            batches: batches.into(),
            deadlines: Arc::clone(&deadlines),
            ..ScriptedCursor::default()
        };
        (CursorEntity::new(Box::new(cursor), timeout), deadlines)
    }

    #[tokio::test]
    async fn test_iterate_once_returns_document() {
        let (mut entity, _) = entity(vec![Ok(vec![doc(0), doc(1)])], None);
        let ctx = OperationContext::background();

        let outcome = entity.iterate_once(&ctx).await.unwrap();
        assert_eq!(outcome.document().unwrap().len(), 8);
        assert!(entity.iterate_once(&ctx).await.unwrap().document().is_some());
        assert!(matches!(
            entity.iterate_once(&ctx).await.unwrap(),
            IterationOutcome::Exhausted
        ));
        assert!(entity.is_exhausted());
    }

    #[tokio::test]
    async fn test_iterate_once_stops_after_empty_batch() {
        let (mut entity, _) = entity(vec![Ok(vec![]), Ok(vec![doc(0)])], None);
        let ctx = OperationContext::background();

        assert!(matches!(
            entity.iterate_once(&ctx).await.unwrap(),
            IterationOutcome::Exhausted
        ));
        assert!(!entity.is_exhausted());
        assert!(entity.iterate_once(&ctx).await.unwrap().document().is_some());
    }

    #[tokio::test]
    async fn test_iterate_until_document_skips_empty_batches() {
        let (mut entity, _) = entity(vec![Ok(vec![]), Ok(vec![]), Ok(vec![doc(2)])], None);
        let outcome = entity
            .iterate_until_document_or_error(&OperationContext::background())
            .await
            .unwrap();
        assert!(outcome.document().is_some());
    }

    #[tokio::test]
    async fn test_cursor_error_is_an_outcome() {
        let (mut entity, _) = entity(
            vec![Err(Error::Command {
                code: 43,
                message: "cursor not found".into(),
            })],
            None,
        );
        let outcome = entity
            .iterate_until_document_or_error(&OperationContext::background())
            .await
            .unwrap();
        assert!(matches!(outcome.error(), Some(Error::Command { code: 43, .. })));
    }

    #[tokio::test]
    async fn test_malformed_document_is_fatal() {
        let (mut entity, _) = entity(vec![Ok(vec![Bytes::from_static(&[9, 0, 0, 0, 0])])], None);
        let err = entity
            .iterate_once(&OperationContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().starts_with("error decoding cursor result: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies_per_iteration() {
        let (mut entity, deadlines) = entity(
            vec![Ok(vec![doc(0)]), Ok(vec![doc(1)])],
            Some(Duration::from_millis(100)),
        );
        let ctx = OperationContext::background();

        let first_start = Instant::now();
        entity.iterate_once(&ctx).await.unwrap();
        tokio::time::advance(Duration::from_millis(80)).await;
        let second_start = Instant::now();
        entity.iterate_once(&ctx).await.unwrap();

        let deadlines = deadlines.lock().unwrap();
        assert_eq!(deadlines[0], Some(first_start + Duration::from_millis(100)));
        assert_eq!(deadlines[1], Some(second_start + Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_deadline_wins() {
        let (mut entity, deadlines) = entity(vec![Ok(vec![doc(0)])], Some(Duration::from_secs(10)));
        let (ctx, _guard) = with_timeout(&OperationContext::background(), Some(Duration::from_millis(50)));

        entity.iterate_once(&ctx).await.unwrap();
        assert_eq!(deadlines.lock().unwrap()[0], ctx.deadline());
    }

    #[tokio::test]
    async fn test_advance_stops_on_cancelled_context() {
        struct Idle;

        #[async_trait::async_trait]
        impl Cursor for Idle {
            async fn try_advance(&mut self, _ctx: &OperationContext) -> Result<Option<Bytes>> {
                Ok(None)
            }

            fn is_exhausted(&self) -> bool {
                false
            }
        }

        let (ctx, guard) = OperationContext::background().child();
        guard.cancel();

        let mut entity = CursorEntity::new(Box::new(Idle), None);
        let outcome = entity.iterate_until_document_or_error(&ctx).await.unwrap();
        assert!(matches!(
            outcome.error(),
            Some(Error::Context(ContextError::Canceled))
        ));
    }
}
