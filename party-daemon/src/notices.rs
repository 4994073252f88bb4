//! Per-user notice backlog, drained by the `notices` request.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use party_core::{Notifier, PartyNotice, UserId};

#[derive(Debug)]
pub struct NoticeBoard {
    backlog: usize,
    pending: Mutex<HashMap<UserId, VecDeque<PartyNotice>>>,
}

impl NoticeBoard {
    pub fn new(backlog: usize) -> Self {
        Self {
            backlog: backlog.max(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, VecDeque<PartyNotice>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes every pending notice for `user`, oldest first.
    pub fn drain(&self, user: &UserId) -> Vec<PartyNotice> {
        self.lock()
            .remove(user)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn pending(&self, user: &UserId) -> usize {
        self.lock().get(user).map_or(0, VecDeque::len)
    }

    /// Drops anything still queued for a user who went away.
    pub fn forget(&self, user: &UserId) {
        self.lock().remove(user);
    }
}

impl Notifier for NoticeBoard {
    fn notify(&self, user: &UserId, notice: &PartyNotice) {
        let mut pending = self.lock();
        let queue = pending.entry(*user).or_default();
        if queue.len() == self.backlog {
            queue.pop_front();
            tracing::debug!(user = %user, backlog = self.backlog, "notice backlog full, dropped oldest");
        }
        queue.push_back(notice.clone());
    }
}
