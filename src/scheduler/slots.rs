/// Fixed pool of execution slots, each either free or occupied by the
/// index of a job in the scheduler's job list.
///
/// The pool only tracks occupancy; deciding when an occupant is done and
/// the slot can be reclaimed is the scheduler's job.
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<Option<usize>>,
}

impl SlotPool {
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    /// Returns the total number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Lowest-numbered free slot, if any
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Occupy `slot` with a job index. Returns false if the slot is taken
    /// or the job already holds another slot.
    pub fn occupy(&mut self, slot: usize, job_ix: usize) -> bool {
        if self.slots[slot].is_some() || self.holds_job(job_ix) {
            return false;
        }
        self.slots[slot] = Some(job_ix);
        true
    }

    pub fn release(&mut self, slot: usize) {
        self.slots[slot] = None;
    }

    pub fn occupant(&self, slot: usize) -> Option<usize> {
        self.slots[slot]
    }

    /// Iterate `(slot, job_ix)` over occupied slots
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, job)| job.map(|job_ix| (slot, job_ix)))
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether the given job index currently occupies any slot
    pub fn holds_job(&self, job_ix: usize) -> bool {
        self.slots.iter().any(|slot| *slot == Some(job_ix))
    }

    /// Rewrite occupant indices after the job list shrank. `map[old]` is
    /// the job's new index, or None if it was removed.
    pub fn remap(&mut self, map: &[Option<usize>]) {
        for slot in &mut self.slots {
            if let Some(job_ix) = *slot {
                *slot = map.get(job_ix).copied().flatten();
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
    }
}
