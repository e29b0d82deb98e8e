//! The session's message view: an ordered, session-stable snapshot numbered
//! 1..N, with session-local deletion marks layered on top of whatever the
//! adapter reported at login.

use crate::adapter::MessageSummary;
use crate::error::Error;

#[derive(Debug, Clone)]
pub struct MessageEntry {
    /// 1-based position, dense and fixed for the session's lifetime.
    pub number: usize,
    pub size: u64,
    pub uid: String,
    pub deleted: bool,
}

#[derive(Debug, Default)]
pub struct MessageView {
    entries: Vec<MessageEntry>,
}

impl MessageView {
    pub fn from_summaries(summaries: Vec<MessageSummary>) -> Self {
        let entries = summaries
            .into_iter()
            .enumerate()
            .map(|(i, s)| MessageEntry {
                number: i + 1,
                size: s.size,
                uid: s.uid,
                deleted: false,
            })
            .collect();
        MessageView { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, number: usize) -> Option<&MessageEntry> {
        if number == 0 {
            return None;
        }
        self.entries.get(number - 1)
    }

    /// Zero-based index into the adapter's original `list_messages` order,
    /// for messages that are still visible for retrieval (not deleted).
    pub fn active_index(&self, number: usize) -> Result<usize, Error> {
        match self.get(number) {
            Some(entry) if !entry.deleted => Ok(number - 1),
            _ => Err(Error::OutOfRange),
        }
    }

    pub fn mark_deleted(&mut self, number: usize) -> Result<(), Error> {
        match self.entries.get_mut(number.wrapping_sub(1)) {
            Some(entry) if number >= 1 && !entry.deleted => {
                entry.deleted = true;
                Ok(())
            }
            Some(_) if number >= 1 => Err(Error::OutOfRange),
            _ => Err(Error::OutOfRange),
        }
    }

    pub fn reset_deletions(&mut self) {
        for entry in &mut self.entries {
            entry.deleted = false;
        }
    }

    /// `(count, total-octets)` over non-deleted messages, for `STAT`.
    pub fn stat(&self) -> (usize, u64) {
        self.entries
            .iter()
            .filter(|e| !e.deleted)
            .fold((0usize, 0u64), |(count, size), e| (count + 1, size + e.size))
    }

    pub fn active(&self) -> impl Iterator<Item = &MessageEntry> {
        self.entries.iter().filter(|e| !e.deleted)
    }

    pub fn deleted_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|e| e.deleted)
            .map(|e| e.number - 1)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn view(sizes: &[u64]) -> MessageView {
        MessageView::from_summaries(
            sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| MessageSummary {
                    uid: format!("uid-{}", i),
                    size,
                })
                .collect(),
        )
    }

    #[test]
    fn numbering_is_dense_from_one() {
        let v = view(&[10, 20, 30]);
        assert_eq!(v.get(1).unwrap().number, 1);
        assert_eq!(v.get(3).unwrap().number, 3);
        assert!(v.get(0).is_none());
        assert!(v.get(4).is_none());
    }

    #[test]
    fn stat_excludes_deleted() {
        let mut v = view(&[10, 20, 30]);
        assert_eq!(v.stat(), (3, 60));
        v.mark_deleted(2).unwrap();
        assert_eq!(v.stat(), (2, 40));
    }

    #[test]
    fn dele_twice_is_out_of_range() {
        let mut v = view(&[10]);
        v.mark_deleted(1).unwrap();
        assert!(matches!(v.mark_deleted(1), Err(Error::OutOfRange)));
    }

    #[test]
    fn rset_restores_stat() {
        let mut v = view(&[10, 20]);
        let before = v.stat();
        v.mark_deleted(1).unwrap();
        v.mark_deleted(2).unwrap();
        v.reset_deletions();
        assert_eq!(v.stat(), before);
    }

    #[test]
    fn deleted_message_drops_out_of_active_listing_and_retrieval() {
        let mut v = view(&[10, 20]);
        v.mark_deleted(1).unwrap();
        assert!(matches!(v.active_index(1), Err(Error::OutOfRange)));
        assert_eq!(v.active().map(|e| e.number).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn empty_mailbox_stat_is_zero() {
        let v = view(&[]);
        assert_eq!(v.stat(), (0, 0));
    }
}
