use std::collections::{BTreeMap, HashMap, VecDeque};

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Width of one wheel slot in milliseconds.
const GRANULARITY: u64 = 100;

/// Number of slots; deadlines beyond `GRANULARITY * SLOT_COUNT` from the
/// cursor wait in the sorted long-range bucket until the wheel turns far
/// enough.
const SLOT_COUNT: usize = 512;

/// Handle for a timer class created with [`TimerWheel::add_class`].
///
/// A class groups timers that share one logical callback: all link
/// validity timers are one class, all HELLO generation timers another.
/// The dispatcher switches on the class of a [`Firing`] and uses the token
/// to find the object the timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(u32);

#[derive(Debug)]
struct ClassDef {
    name: &'static str,
    periodic: bool,
    jitter_pct: u8,
}

/// A due timer popped from the wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing {
    pub class: ClassId,
    pub token: u64,
    pub deadline: u64,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    deadline: u64,
    period: u64,
    seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct SlotEntry {
    deadline: u64,
    seq: u64,
    class: ClassId,
    token: u64,
}

/// Hashed timing wheel.
///
/// Slot membership is only an index; the authoritative armed state lives
/// in a map keyed by (class, token). Stopping or re-arming a timer bumps
/// its sequence number, so stale slot entries are skipped when they come
/// up. This is what makes self-cancellation safe: a callback that stops a
/// timer which is already sitting in the due queue simply invalidates it.
///
/// `poll` hands out at most one due timer per call so the caller can run
/// its dispatch between pops. Timers with identical deadlines fire in
/// registration order. Periodic timers re-arm from their previous
/// deadline, not from `now`, preserving the average period; jitter
/// subtracts a random fraction of the period from each new deadline.
pub struct TimerWheel {
    classes: Vec<ClassDef>,
    armed: HashMap<(u32, u64), Armed>,
    slots: Vec<Vec<SlotEntry>>,
    long_range: BTreeMap<(u64, u64), SlotEntry>,
    pending: VecDeque<SlotEntry>,
    cursor: u64,
    next_seq: u64,
    rng: StdRng,
}

impl Default for TimerWheel {
    fn default() -> Self {
        TimerWheel::new()
    }
}

impl TimerWheel {
    pub fn new() -> TimerWheel {
        TimerWheel {
            classes: Vec::new(),
            armed: HashMap::new(),
            slots: (0..SLOT_COUNT).map(|_| Vec::new()).collect(),
            long_range: BTreeMap::new(),
            pending: VecDeque::new(),
            cursor: 0,
            next_seq: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Register a timer class. `jitter_pct` is the maximum percentage of
    /// the period subtracted from each deadline (0 disables jitter).
    pub fn add_class(&mut self, name: &'static str, periodic: bool, jitter_pct: u8) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassDef {
            name,
            periodic,
            jitter_pct: jitter_pct.min(99),
        });
        id
    }

    pub fn class_name(&self, class: ClassId) -> &'static str {
        self.classes[class.0 as usize].name
    }

    fn horizon_end(&self) -> u64 {
        self.cursor + GRANULARITY * SLOT_COUNT as u64
    }

    fn jitter(&mut self, class: ClassId, interval: u64) -> u64 {
        let pct = self.classes[class.0 as usize].jitter_pct;
        if pct == 0 || interval == 0 {
            return 0;
        }
        let max = interval * pct as u64 / 100;
        if max == 0 {
            0
        } else {
            self.rng.gen_range(0..=max)
        }
    }

    fn enqueue(&mut self, entry: SlotEntry) {
        if entry.deadline >= self.horizon_end() {
            self.long_range
                .insert((entry.deadline, entry.seq), entry);
        } else {
            let slot = (entry.deadline / GRANULARITY) as usize % SLOT_COUNT;
            self.slots[slot].push(entry);
        }
    }

    /// Arm (or re-arm) the timer identified by (class, token) to fire
    /// `rel_time` milliseconds after `now`. For periodic classes
    /// `rel_time` also becomes the period.
    pub fn set(&mut self, now: u64, class: ClassId, token: u64, rel_time: u64) {
        let jitter = self.jitter(class, rel_time);
        let deadline = now + rel_time.saturating_sub(jitter);
        let seq = self.next_seq;
        self.next_seq += 1;

        self.armed.insert(
            (class.0, token),
            Armed {
                deadline,
                period: rel_time,
                seq,
            },
        );
        self.enqueue(SlotEntry {
            deadline,
            seq,
            class,
            token,
        });
    }

    /// Disarm a timer. Stopping a timer that is not armed is a no-op.
    pub fn stop(&mut self, class: ClassId, token: u64) {
        self.armed.remove(&(class.0, token));
    }

    pub fn is_active(&self, class: ClassId, token: u64) -> bool {
        self.armed.contains_key(&(class.0, token))
    }

    /// Absolute deadline of an armed timer.
    pub fn deadline(&self, class: ClassId, token: u64) -> Option<u64> {
        self.armed.get(&(class.0, token)).map(|a| a.deadline)
    }

    /// Earliest armed deadline, for event-loop pacing.
    pub fn next_deadline(&self) -> Option<u64> {
        self.armed.values().map(|a| a.deadline).min()
    }

    /// Sweep slots the cursor has passed and stage due entries in
    /// deadline/registration order.
    fn advance(&mut self, now: u64) {
        if now < self.cursor && self.pending.is_empty() {
            return;
        }

        let mut due: Vec<SlotEntry> = Vec::new();

        // long-range entries that became due while the wheel was idle
        while let Some((&key, _)) = self.long_range.iter().next() {
            if key.0 > now {
                break;
            }
            let (_, entry) = self.long_range.remove_entry(&key).unwrap();
            due.push(entry);
        }

        if now >= self.cursor {
            let first = self.cursor / GRANULARITY;
            let last = now / GRANULARITY;
            let span = (last - first + 1).min(SLOT_COUNT as u64);
            for step in 0..span {
                let slot = ((first + step) as usize) % SLOT_COUNT;
                let bucket = &mut self.slots[slot];
                let mut i = 0;
                while i < bucket.len() {
                    if bucket[i].deadline <= now {
                        due.push(bucket.swap_remove(i));
                    } else {
                        i += 1;
                    }
                }
            }
            self.cursor = now + 1;

            // pull long-range entries that moved inside the new horizon
            let horizon = self.horizon_end();
            let inside: Vec<(u64, u64)> = self
                .long_range
                .range(..(horizon, 0))
                .map(|(&k, _)| k)
                .collect();
            for key in inside {
                let entry = self.long_range.remove(&key).unwrap();
                let slot = (entry.deadline / GRANULARITY) as usize % SLOT_COUNT;
                self.slots[slot].push(entry);
            }
        }

        due.sort_by_key(|e| (e.deadline, e.seq));
        self.pending.extend(due);
    }

    /// Pop one due timer, if any. Periodic timers are re-armed from their
    /// previous deadline before the firing is handed out, so a `stop`
    /// issued by the dispatched callback cancels the re-arm as well.
    pub fn poll(&mut self, now: u64) -> Option<Firing> {
        self.advance(now);

        while let Some(entry) = self.pending.pop_front() {
            let valid = self
                .armed
                .get(&(entry.class.0, entry.token))
                .map(|a| a.seq == entry.seq)
                .unwrap_or(false);
            if !valid {
                continue;
            }

            let periodic = self.classes[entry.class.0 as usize].periodic;
            if periodic {
                let period = self.armed[&(entry.class.0, entry.token)].period;
                let jitter = self.jitter(entry.class, period);
                let deadline = entry.deadline + period.saturating_sub(jitter).max(1);
                let seq = self.next_seq;
                self.next_seq += 1;
                self.armed.insert(
                    (entry.class.0, entry.token),
                    Armed {
                        deadline,
                        period,
                        seq,
                    },
                );
                self.enqueue(SlotEntry {
                    deadline,
                    seq,
                    class: entry.class,
                    token: entry.token,
                });
            } else {
                self.armed.remove(&(entry.class.0, entry.token));
            }

            return Some(Firing {
                class: entry.class,
                token: entry.token,
                deadline: entry.deadline,
            });
        }
        None
    }
}
