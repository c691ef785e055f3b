//! Scripted cursor for iteration tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mongo_client::{Cursor, Error, Result};
use mongo_csot::{Instant, OperationContext};
use parking_lot::Mutex;

/// What the next getMore returns.
#[derive(Debug)]
pub enum GetMoreStep {
    /// A batch of documents.
    Batch(Vec<Bytes>),
    /// The server holds the getMore for `delay`, then returns an empty batch.
    ///
    /// Ends early with the context's error if the deadline comes first.
    Await(Duration),
    /// The getMore fails.
    Fail(Error),
}

/// A [`Cursor`] that replays [`GetMoreStep`]s.
///
/// Once the script runs out the cursor is exhausted. Every
/// [`Cursor::try_advance`] call records the deadline it ran under.
#[derive(Debug, Default)]
pub struct MockCursor {
    steps: VecDeque<GetMoreStep>,
    buffer: VecDeque<Bytes>,
    deadlines: Arc<Mutex<Vec<Option<Instant>>>>,
    get_mores: usize,
}

impl MockCursor {
    /// A cursor that replays `steps`.
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = GetMoreStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Shared log of the deadline seen by each call.
    #[must_use]
    pub fn deadlines(&self) -> Arc<Mutex<Vec<Option<Instant>>>> {
        Arc::clone(&self.deadlines)
    }

    /// getMores issued so far.
    #[must_use]
    pub fn get_mores(&self) -> usize {
        self.get_mores
    }
}

#[async_trait]
impl Cursor for MockCursor {
    async fn try_advance(&mut self, ctx: &OperationContext) -> Result<Option<Bytes>> {
        self.deadlines.lock().push(ctx.deadline());

        if self.buffer.is_empty() {
            let Some(step) = self.steps.pop_front() else {
                return Ok(None);
            };
            self.get_mores += 1;
            match step {
                GetMoreStep::Batch(docs) => self.buffer.extend(docs),
                GetMoreStep::Await(delay) => {
                    tokio::select! {
                        err = ctx.done() => return Err(err.into()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                GetMoreStep::Fail(err) => return Err(err),
            }
        }
        Ok(self.buffer.pop_front())
    }

    fn is_exhausted(&self) -> bool {
        self.buffer.is_empty() && self.steps.is_empty()
    }
}
