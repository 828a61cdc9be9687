use std::time::Duration;

/// Provides a mechanism for managing attempting to complete an operation
/// and retrying the operation, with a backoff, if it fails.
///
/// This iterator provides an infinite stream of back off durations, where
/// the duration increases an exponential factor up to some maximum delay.
/// Upon reaching the maximum delay, that value will be returned from then
/// on. Use [Iterator::take] to bound the number of attempts.
///
/// The delay is meant for [std::thread::sleep]; do NOT use this with
/// asynchronous code.
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let curr = self.curr;
        let new_next = self.curr * self.factor;

        self.curr = if new_next > self.max {
            self.max
        } else {
            new_next
        };

        Some(curr)
    }
}

/// Retry a fallible function once per delay yielded by an iterator of
/// [Duration] values, until it returns [Ok].
pub trait Retry: Iterator<Item = Duration> + Sized {
    /// Run `f` until it returns [Ok] or the iterator is exhausted, in which
    /// case the last [Err] is returned; `None` only if the iterator was empty.
    ///
    /// - `sleep` is called after every failed attempt but the last, with the
    /// error and the delay to wait before the next attempt, so that the
    /// failure can be logged.
    fn retry<F, S, T, E>(self, mut f: F, sleep: S) -> Option<Result<T, E>>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&E, Duration),
    {
        let mut last_err = None;
        let mut iter = self.peekable();

        while let Some(delay) = iter.next() {
            match f() {
                Ok(v) => return Some(Ok(v)),
                Err(e) => {
                    if iter.peek().is_some() {
                        sleep(&e, delay);
                    }
                    last_err = Some(Err(e));
                }
            }
        }
        last_err
    }
}

impl<I: Iterator<Item = Duration>> Retry for I {}
