use std::{collections::BTreeSet, fmt, sync::Arc};

use serde::Deserialize;

use crate::{Request, flags::FlagId};

/// Decides, per request, whether to bypass memoization entirely.
///
/// Must be a pure function of the request. The default never skips.
#[derive(Clone)]
pub struct SkipPredicate(Arc<dyn Fn(&Request) -> bool + Send + Sync>);

impl SkipPredicate {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn never() -> Self {
        Self::new(|_| false)
    }

    pub fn should_skip(&self, request: &Request) -> bool {
        (self.0)(request)
    }
}

impl Default for SkipPredicate {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for SkipPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SkipPredicate(..)")
    }
}

/// Configuration for [`Memoizer`](super::Memoizer).
///
/// `preload_all` and `preload` can be read from JSON; the skip predicate is
/// code and is set with [`skip_when`](Self::skip_when).
///
/// # Examples
///
/// ```
/// use flagscope::memoizer::MemoizerOptions;
///
/// let options = MemoizerOptions::from_json(r#"{"preload": ["search", "stats"]}"#)
///     .unwrap()
///     .skip_when(|req| req.headers().get("bypass") == Some("1"));
///
/// assert!(!options.preloads_all());
/// assert_eq!(options.preload_names().len(), 2);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoizerOptions {
    preload_all: bool,
    preload: BTreeSet<FlagId>,
    #[serde(skip)]
    skip_when: SkipPredicate,
}

impl MemoizerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the data part of the options.
    ///
    /// # Errors
    ///
    /// Unknown keys and malformed values are rejected.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Preload every flag the backend knows about before the handler runs.
    #[must_use]
    pub fn preload_all(mut self, preload_all: bool) -> Self {
        self.preload_all = preload_all;
        self
    }

    /// Preload these flags before the handler runs. Adds to earlier calls.
    #[must_use]
    pub fn preload<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<FlagId>,
    {
        self.preload.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn skip_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skip_when = SkipPredicate::new(predicate);
        self
    }

    pub fn preloads_all(&self) -> bool {
        self.preload_all
    }

    pub fn preload_names(&self) -> &BTreeSet<FlagId> {
        &self.preload
    }

    pub fn should_skip(&self, request: &Request) -> bool {
        self.skip_when.should_skip(request)
    }
}
