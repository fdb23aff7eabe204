use crate::core::{schedule_dispose, CellId, Runtime};

/// Keeps an effect subscribed while the instance is in existence.
///
/// Dropping a `Subscription` detaches its effect from everything it reads.
/// Without a runtime at hand the detach is deferred to the next time the
/// runtime is entered; [`dispose`](Self::dispose) performs it on the spot.
#[must_use]
pub struct Subscription(Option<CellId>);

impl Subscription {
    pub(crate) fn new(id: CellId) -> Self {
        Self(Some(id))
    }

    /// Detaches the effect immediately.
    pub fn dispose(mut self, rt: &mut Runtime) {
        if let Some(id) = self.0.take() {
            rt.raw_mut().dispose(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> Option<CellId> {
        self.0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(id) = self.0.take() {
            schedule_dispose(id);
        }
    }
}
