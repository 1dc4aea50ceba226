use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use dashboard_logging::dash_debug;
use tokio_util::sync::CancellationToken;

use crate::sync::lock;
use crate::RequestError;

/// Monotonically increasing number identifying one request of a class.
pub type RequestToken = u64;

/// Logical operation class; tokens are sequenced independently per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestClass(&'static str);

impl RequestClass {
    pub const SEARCH: Self = Self("search");
    pub const RESULT: Self = Self("result");

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

/// How an issued request ended, from the point of view of its class.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled<T> {
    /// Still the latest request of its class and it succeeded.
    Current { token: RequestToken, value: T },
    /// Still the latest request of its class and it failed for a reason the
    /// user should see.
    Failed {
        token: RequestToken,
        error: RequestError,
    },
    /// Superseded by a newer request; the response was dropped.
    Stale { token: RequestToken },
    /// Cancelled by us while still current.
    Aborted { token: RequestToken },
}

impl<T> Settled<T> {
    pub fn token(&self) -> RequestToken {
        match self {
            Settled::Current { token, .. }
            | Settled::Failed { token, .. }
            | Settled::Stale { token }
            | Settled::Aborted { token } => *token,
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, Settled::Current { .. })
    }
}

#[derive(Default)]
struct Slot {
    latest: RequestToken,
    cancel: CancellationToken,
}

/// Issues cancellable requests and drops responses that are no longer the
/// latest of their class.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    slots: Arc<Mutex<HashMap<RequestClass, Slot>>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `executor` as the newest request of `class`.
    ///
    /// The previous outstanding request of the class is signalled through its
    /// cancellation token. Executors are expected to honour the token they are
    /// handed; one that does not still has its result discarded as stale.
    pub async fn issue<T, F, Fut>(&self, class: RequestClass, executor: F) -> Settled<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let (token, cancel) = self.begin(class);
        let result = executor(cancel).await;
        self.settle(class, token, result)
    }

    /// Signals the outstanding request of `class` and invalidates its token so
    /// a late response is treated as stale. Returns false if the class never
    /// issued anything.
    pub fn cancel(&self, class: RequestClass) -> bool {
        let mut slots = lock(&self.slots);
        match slots.get_mut(&class) {
            Some(slot) => {
                slot.cancel.cancel();
                slot.latest += 1;
                true
            }
            None => false,
        }
    }

    /// Cancels the outstanding request of every class.
    pub fn cancel_all(&self) {
        let mut slots = lock(&self.slots);
        for slot in slots.values_mut() {
            slot.cancel.cancel();
            slot.latest += 1;
        }
    }

    pub fn latest(&self, class: RequestClass) -> Option<RequestToken> {
        lock(&self.slots).get(&class).map(|slot| slot.latest)
    }

    pub fn is_latest(&self, class: RequestClass, token: RequestToken) -> bool {
        self.latest(class) == Some(token)
    }

    fn begin(&self, class: RequestClass) -> (RequestToken, CancellationToken) {
        let mut slots = lock(&self.slots);
        let slot = slots.entry(class).or_default();
        slot.cancel.cancel();
        slot.latest += 1;
        slot.cancel = CancellationToken::new();
        (slot.latest, slot.cancel.clone())
    }

    fn settle<T>(
        &self,
        class: RequestClass,
        token: RequestToken,
        result: Result<T, RequestError>,
    ) -> Settled<T> {
        if !self.is_latest(class, token) {
            dash_debug!("dropping stale {} response token={}", class.name(), token);
            return Settled::Stale { token };
        }
        match result {
            Ok(value) => Settled::Current { token, value },
            Err(error) if error.is_aborted() => {
                dash_debug!("{} request token={} aborted", class.name(), token);
                Settled::Aborted { token }
            }
            Err(error) => Settled::Failed { token, error },
        }
    }
}
