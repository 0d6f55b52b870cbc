//! Umbrella error type over the per-component failure sets.
//!
//! Every component keeps its own closed error enum (the caller of a single
//! component matches on that); application glue that mixes components can
//! bubble everything as a [`FoundationError`] via `?`.

use core::fmt;

use crate::apptimer::TimerError;
use crate::button::ButtonError;
use crate::logging::RecordError;
use crate::pm::PmError;
use crate::pubsub::PubSubError;
use crate::retry::RetryError;
use crate::ringbuf::RingBufError;

#[cfg(feature = "std")]
use crate::jobqueue::JobError;

/// Any component failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "foundation errors must be handled, not silently discarded"]
pub enum FoundationError {
    Timer(TimerError),
    #[cfg(feature = "std")]
    Job(JobError),
    PubSub(PubSubError),
    RingBuf(RingBufError),
    Record(RecordError),
    Button(ButtonError),
    Retry(RetryError),
    Pm(PmError),
}

/// Result alias for mixed-component call chains.
pub type FoundationResult<T> = Result<T, FoundationError>;

impl fmt::Display for FoundationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer(e) => write!(f, "apptimer: {}", e),
            #[cfg(feature = "std")]
            Self::Job(e) => write!(f, "jobqueue: {}", e),
            Self::PubSub(e) => write!(f, "pubsub: {}", e),
            Self::RingBuf(e) => write!(f, "ringbuf: {}", e),
            Self::Record(e) => write!(f, "log record: {}", e),
            Self::Button(e) => write!(f, "button: {}", e),
            Self::Retry(e) => write!(f, "retry: {}", e),
            Self::Pm(e) => write!(f, "pm: {}", e),
        }
    }
}

impl From<TimerError> for FoundationError {
    fn from(err: TimerError) -> Self {
        Self::Timer(err)
    }
}

#[cfg(feature = "std")]
impl From<JobError> for FoundationError {
    fn from(err: JobError) -> Self {
        Self::Job(err)
    }
}

impl From<PubSubError> for FoundationError {
    fn from(err: PubSubError) -> Self {
        Self::PubSub(err)
    }
}

impl From<RingBufError> for FoundationError {
    fn from(err: RingBufError) -> Self {
        Self::RingBuf(err)
    }
}

impl From<RecordError> for FoundationError {
    fn from(err: RecordError) -> Self {
        Self::Record(err)
    }
}

impl From<ButtonError> for FoundationError {
    fn from(err: ButtonError) -> Self {
        Self::Button(err)
    }
}

impl From<RetryError> for FoundationError {
    fn from(err: RetryError) -> Self {
        Self::Retry(err)
    }
}

impl From<PmError> for FoundationError {
    fn from(err: PmError) -> Self {
        Self::Pm(err)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FoundationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_compose_with_question_mark() {
        fn mixed() -> FoundationResult<()> {
            Err(RetryError::Exhausted)?;
            Ok(())
        }
        assert_eq!(mixed(), Err(FoundationError::Retry(RetryError::Exhausted)));
    }

    #[test]
    fn display_names_the_component() {
        let err = FoundationError::PubSub(PubSubError::NoExistTopic);
        assert_eq!(err.to_string(), "pubsub: no such topic");
    }
}
