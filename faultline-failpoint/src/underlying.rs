//! Optional delegate held by the hijacked wrappers.

/// The stream a wrapper delegates to.
///
/// A wrapper may be built without a stream (a request with no body, a
/// response writer that was already taken). The detached case is a typed
/// variant so the no-op path is a match arm rather than a null check.
#[derive(Debug)]
pub enum Underlying<T> {
    /// A live stream.
    Attached(T),
    /// No stream: reads see end-of-stream, writes accept nothing.
    Detached,
}

impl<T> Underlying<T> {
    /// Whether a stream is attached.
    pub fn is_attached(&self) -> bool {
        matches!(self, Underlying::Attached(_))
    }

    /// Borrow the stream, if attached.
    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Underlying::Attached(inner) => Some(inner),
            Underlying::Detached => None,
        }
    }

    /// Mutably borrow the stream, if attached.
    pub fn as_mut(&mut self) -> Option<&mut T> {
        match self {
            Underlying::Attached(inner) => Some(inner),
            Underlying::Detached => None,
        }
    }

    /// Take the stream out, leaving the wrapper detached.
    pub fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, Underlying::Detached) {
            Underlying::Attached(inner) => Some(inner),
            Underlying::Detached => None,
        }
    }

    /// Consume the wrapper state and return the stream.
    pub fn into_inner(self) -> Option<T> {
        match self {
            Underlying::Attached(inner) => Some(inner),
            Underlying::Detached => None,
        }
    }
}

impl<T> From<Option<T>> for Underlying<T> {
    fn from(inner: Option<T>) -> Self {
        match inner {
            Some(inner) => Underlying::Attached(inner),
            None => Underlying::Detached,
        }
    }
}
