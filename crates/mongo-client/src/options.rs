//! Option composition.
//!
//! Operation options are assembled from any number of sources, each of which
//! contributes setter closures. [`merge`] applies every setter in order onto
//! a default value, so a later source overrides an earlier one.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// An option setter rejected its value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{option}: {reason}")]
pub struct OptionError {
    option: &'static str,
    reason: String,
}

impl OptionError {
    /// Create an option error.
    pub fn new(option: &'static str, reason: impl Into<String>) -> Self {
        Self {
            option,
            reason: reason.into(),
        }
    }

    /// The option that was rejected.
    #[must_use]
    pub fn option(&self) -> &'static str {
        self.option
    }
}

/// Applies one option to an argument struct.
pub type Setter<T> = Box<dyn Fn(&mut T) -> Result<(), OptionError> + Send + Sync>;

/// Something that contributes setters for `T`.
pub trait OptionSource<T> {
    /// The setters to apply, in order.
    fn setters(&self) -> Vec<Setter<T>>;
}

/// Fold every source's setters onto `T::default()`.
///
/// Setters run in source order, then in the order each source lists them.
/// The first rejected value aborts the merge.
pub fn merge<T: Default>(sources: &[&dyn OptionSource<T>]) -> Result<T, OptionError> {
    let mut args = T::default();
    for source in sources {
        for setter in source.setters() {
            setter(&mut args)?;
        }
    }
    Ok(args)
}

/// Arguments for a find operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct FindArgs {
    /// Documents per batch.
    pub batch_size: Option<i32>,
    /// Maximum documents to return.
    pub limit: Option<i64>,
    /// Documents to skip.
    pub skip: Option<i64>,
    /// Per-iteration timeout for the resulting cursor.
    pub timeout: Option<Duration>,
    /// How long a tailable getMore waits for new data.
    pub max_await_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<String>,
    /// Disable the server's idle cursor timeout.
    pub no_cursor_timeout: Option<bool>,
    /// Return partial results if some shards are down.
    pub allow_partial_results: Option<bool>,
}

type SharedSetter<T> = Arc<dyn Fn(&mut T) -> Result<(), OptionError> + Send + Sync>;

/// Builder for [`FindArgs`].
///
/// Each call records a setter; nothing is validated until [`merge`].
#[derive(Clone, Default)]
pub struct FindOptions {
    setters: Vec<SharedSetter<FindArgs>>,
}

impl std::fmt::Debug for FindOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FindOptions")
            .field("setters", &self.setters.len())
            .finish()
    }
}

impl FindOptions {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        mut self,
        setter: impl Fn(&mut FindArgs) -> Result<(), OptionError> + Send + Sync + 'static,
    ) -> Self {
        self.setters.push(Arc::new(setter));
        self
    }

    /// Set the batch size. Negative values are rejected.
    #[must_use]
    pub fn batch_size(self, size: i32) -> Self {
        self.push(move |args| {
            if size < 0 {
                return Err(OptionError::new(
                    "batchSize",
                    format!("must be non-negative, got {size}"),
                ));
            }
            args.batch_size = Some(size);
            Ok(())
        })
    }

    /// Set the maximum number of documents.
    #[must_use]
    pub fn limit(self, limit: i64) -> Self {
        self.push(move |args| {
            args.limit = Some(limit);
            Ok(())
        })
    }

    /// Set the number of documents to skip.
    #[must_use]
    pub fn skip(self, skip: i64) -> Self {
        self.push(move |args| {
            args.skip = Some(skip);
            Ok(())
        })
    }

    /// Set the per-iteration cursor timeout.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        self.push(move |args| {
            args.timeout = Some(timeout);
            Ok(())
        })
    }

    /// Set the tailable await time.
    #[must_use]
    pub fn max_await_time(self, wait: Duration) -> Self {
        self.push(move |args| {
            args.max_await_time = Some(wait);
            Ok(())
        })
    }

    /// Attach a comment.
    #[must_use]
    pub fn comment(self, comment: impl Into<String>) -> Self {
        let comment = comment.into();
        self.push(move |args| {
            args.comment = Some(comment.clone());
            Ok(())
        })
    }

    /// Disable the server's idle cursor timeout.
    #[must_use]
    pub fn no_cursor_timeout(self, enabled: bool) -> Self {
        self.push(move |args| {
            args.no_cursor_timeout = Some(enabled);
            Ok(())
        })
    }

    /// Allow partial results from a sharded cluster.
    #[must_use]
    pub fn allow_partial_results(self, enabled: bool) -> Self {
        self.push(move |args| {
            args.allow_partial_results = Some(enabled);
            Ok(())
        })
    }
}

impl OptionSource<FindArgs> for FindOptions {
    fn setters(&self) -> Vec<Setter<FindArgs>> {
        self.setters
            .iter()
            .map(|setter| {
                let setter = Arc::clone(setter);
                Box::new(move |args: &mut FindArgs| setter(args)) as Setter<FindArgs>
            })
            .collect()
    }
}
