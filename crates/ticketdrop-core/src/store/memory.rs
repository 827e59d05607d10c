use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::{StoreError, TicketEvent, TicketFilter, TicketStore, UpdateFn, edit_copy};
use crate::model::{Ticket, TicketId};

/// In-process store with one lock per ticket.
///
/// The id map is only write-locked to insert; updates to different tickets
/// take different mutexes and never contend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tickets: RwLock<HashMap<TicketId, Arc<Mutex<Ticket>>>>,
    events: Mutex<Vec<TicketEvent>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &TicketId) -> Result<Arc<Mutex<Ticket>>, StoreError> {
        self.tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn snapshot(&self) -> Vec<Ticket> {
        let slots: Vec<_> = self
            .tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slots
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }
}

impl TicketStore for MemoryStore {
    fn insert(&self, ticket: Ticket) -> Result<(), StoreError> {
        let mut tickets = self.tickets.write().unwrap_or_else(PoisonError::into_inner);
        if tickets.contains_key(&ticket.id) {
            return Err(StoreError::AlreadyExists(ticket.id));
        }
        tickets.insert(ticket.id.clone(), Arc::new(Mutex::new(ticket)));
        Ok(())
    }

    fn get(&self, id: &TicketId) -> Result<Ticket, StoreError> {
        let slot = self.slot(id)?;
        let ticket = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ticket.clone())
    }

    fn update(&self, id: &TicketId, apply: &mut UpdateFn<'_>) -> Result<Ticket, StoreError> {
        let slot = self.slot(id)?;
        let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let next = edit_copy(&current, apply)?;
        *current = next.clone();
        Ok(next)
    }

    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, StoreError> {
        let mut tickets: Vec<Ticket> = self
            .snapshot()
            .into_iter()
            .filter(|ticket| filter.matches(ticket))
            .collect();
        tickets.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = filter.limit {
            tickets.truncate(limit);
        }
        Ok(tickets)
    }

    fn pull(&self, since: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError> {
        let mut tickets: Vec<Ticket> = self
            .snapshot()
            .into_iter()
            .filter(|ticket| ticket.updated_at > since)
            .collect();
        tickets.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tickets)
    }

    fn max_sequence(&self, date: NaiveDate) -> Result<u16, StoreError> {
        let probe = TicketId::new(date, 1);
        let prefix = probe.date_prefix();
        Ok(self
            .tickets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|id| id.date_prefix() == prefix)
            .map(TicketId::sequence)
            .max()
            .unwrap_or(0))
    }

    fn append_event(&self, event: &TicketEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    fn history(&self, id: &TicketId) -> Result<Vec<TicketEvent>, StoreError> {
        Ok(self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| &event.ticket_id == id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stage;
    use crate::store::test_support::{exercise_store, ticket};
    use std::thread;

    #[test]
    fn memory_store_honours_contract() {
        exercise_store(&MemoryStore::new());
    }

    #[test]
    fn concurrent_updates_on_different_tickets_all_land() {
        let store = Arc::new(MemoryStore::new());
        for seq in 1..=8 {
            store.insert(ticket(seq)).unwrap();
        }

        let handles: Vec<_> = (1..=8)
            .map(|seq| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let id = ticket(seq).id;
                    for n in 0..50 {
                        store
                            .update(&id, &mut |t| {
                                t.notes = format!("note {n}");
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for t in store.list(&TicketFilter::default()).unwrap() {
            assert_eq!(t.notes, "note 49");
            assert_eq!(t.stage, Stage::Pending);
        }
    }

    #[test]
    fn failed_closure_leaves_record_untouched() {
        let store = MemoryStore::new();
        store.insert(ticket(1)).unwrap();
        let id = ticket(1).id;
        let err = store
            .update(&id, &mut |t| {
                t.notes = "half".into();
                Err(StoreError::Aborted)
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Aborted));
        assert!(store.get(&id).unwrap().notes.is_empty());
    }
}
