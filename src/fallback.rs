//! Ordered fallback chains: labelled attempts tried in sequence until one
//! succeeds.
use futures::future::BoxFuture;
use std::fmt::Display;
use tracing::warn;

/// Every attempt of a chain failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Label of the last attempt tried.
    pub label: String,
    /// Error returned by the last attempt.
    pub error: E,
    pub attempts: usize,
}

pub struct FallbackChain<'a, T, E> {
    first: (String, BoxFuture<'a, Result<T, E>>),
    rest: Vec<(String, BoxFuture<'a, Result<T, E>>)>,
}

impl<'a, T, E: Display> FallbackChain<'a, T, E> {
    pub fn new(label: impl Into<String>, attempt: BoxFuture<'a, Result<T, E>>) -> Self {
        Self {
            first: (label.into(), attempt),
            rest: Vec::new(),
        }
    }

    pub fn or_else(mut self, label: impl Into<String>, attempt: BoxFuture<'a, Result<T, E>>) -> Self {
        self.rest.push((label.into(), attempt));
        self
    }

    /// Poll each attempt in order. Attempts after the first success are
    /// dropped without being polled.
    pub async fn run(self) -> Result<T, Exhausted<E>> {
        let attempts = 1 + self.rest.len();
        let (mut label, first) = self.first;
        let mut error = match first.await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        for (next_label, attempt) in self.rest {
            warn!(step = %label, error = %error, "attempt failed; trying next");
            match attempt.await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    label = next_label;
                    error = err;
                }
            }
        }
        Err(Exhausted {
            label,
            error,
            attempts,
        })
    }
}
