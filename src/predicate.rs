//! Record filters for callers that select which paths to act on.

use regex::Regex;

use crate::errors::{FilerError, Result};
use crate::record::Record;

/// A boolean test over records.
pub trait PathPredicate: Send + Sync {
    /// Whether `record` is selected.  `None` is never selected.
    fn matches(&self, record: Option<&Record>) -> bool;
}

/// Selects records whose full path matches any of a set of regular
/// expressions.  Patterns are anchored: the whole path must match.
#[derive(Debug, Clone)]
pub struct RegexPathPredicate {
    patterns: Vec<Regex>,
}

impl RegexPathPredicate {
    /// Compile `regexes`.  An invalid pattern is a configuration error.
    pub fn new<I, S>(regexes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = regexes
            .into_iter()
            .map(|re| {
                let re = re.as_ref();
                Regex::new(&format!("^(?:{re})$"))
                    .map_err(|e| FilerError::Config(format!("invalid path pattern {re:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl PathPredicate for RegexPathPredicate {
    fn matches(&self, record: Option<&Record>) -> bool {
        let Some(record) = record else {
            return false;
        };
        let path = record.path();
        self.patterns.iter().any(|p| p.is_match(&path))
    }
}
