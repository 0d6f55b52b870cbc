//! Hierarchical software timer wheel.
//!
//! Maps a 32-bit tick counter onto six cascading wheels of 64 buckets each.
//! Arming a timer places it in the bucket selected by the most significant
//! bit in which its deadline differs from the current tick; as time advances
//! past a wheel-window boundary, the matching bucket of the higher wheel is
//! pulled apart and its timers drop into lower wheels. Insertion, removal
//! and expiry are all O(1) amortised, which keeps the wheel responsive with
//! thousands of armed timers on a single scheduler thread.
//!
//! Expiry callbacks run synchronously inside [`TimerWheel::advance`], which
//! must therefore never be called from interrupt context. The wheel is
//! handed back to the callback so it can stop or restart timers; a restart
//! observes its new deadline immediately.
//!
//! # Usage
//!
//! ```
//! use ember_foundation::apptimer::TimerWheel;
//!
//! fn expired(wheel: &mut TimerWheel<u32>, _id: ember_foundation::apptimer::TimerId,
//!            fired: &mut u32) {
//!     *fired += 1;
//! }
//!
//! let mut wheel: TimerWheel<u32> = TimerWheel::new();
//! let id = wheel.create(false, expired).unwrap();
//! wheel.start(id, 10, 0).unwrap();
//! wheel.advance(10);
//! assert_eq!(wheel.count(), 0);
//! ```

use core::fmt;

/// Bits of tick resolved per wheel; each wheel has `2^6 = 64` buckets.
pub const BITS_PER_WHEEL: u32 = 6;

/// Buckets per wheel.
pub const BUCKETS_PER_WHEEL: usize = 1 << BITS_PER_WHEEL;

/// Wheels needed to cover the full 32-bit tick range.
pub const NUM_WHEELS: usize = 6;

/// Longest admissible timeout: half the tick range, so that "deadline in the
/// future" stays decidable under wrap-around.
pub const MAX_TIMEOUT: u32 = (1 << 31) - 1;

/// Sentinel for the intrusive bucket links.
const NONE: u16 = u16::MAX;

/// Failures surfaced by the timer wheel API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "timer errors must be handled"]
pub enum TimerError {
    /// Resource failure: the timer pool is exhausted.
    Error,
    /// Unknown handle, or an operation illegal for the timer's state.
    InvalidParam,
    /// `start` on a timer that is already armed.
    AlreadyStarted,
    /// Timeout beyond [`MAX_TIMEOUT`].
    TimeLimitExceeded,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "timer pool exhausted"),
            Self::InvalidParam => write!(f, "invalid timer handle or state"),
            Self::AlreadyStarted => write!(f, "timer already started"),
            Self::TimeLimitExceeded => write!(f, "timeout exceeds MAX_TIMEOUT"),
        }
    }
}

/// Handle to a timer slot. Unique for the lifetime of the wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u32);

/// Expiry callback. Receives the wheel so it may stop/restart timers, the
/// firing timer's id, and the context supplied to `start`.
pub type TimerCallback<C, const CAP: usize> = fn(&mut TimerWheel<C, CAP>, TimerId, &mut C);

struct TimerSlot<C, const CAP: usize> {
    id: TimerId,
    repeat: bool,
    callback: TimerCallback<C, CAP>,
    /// Reload value for repeating timers; the last `start` timeout.
    period: u32,
    /// Absolute expiry tick, meaningful while armed.
    deadline: u32,
    armed: bool,
    context: Option<C>,
    /// FIFO links within the bucket, as pool indices.
    next: u16,
    prev: u16,
    wheel: u8,
    bucket: u8,
}

#[derive(Clone, Copy)]
struct Bucket {
    head: u16,
    tail: u16,
}

impl Bucket {
    const EMPTY: Self = Self {
        head: NONE,
        tail: NONE,
    };
}

/// Cascading-bucket timer wheel over a `u32` tick counter.
///
/// `C` is the per-arming context type; `CAP` bounds the timer pool
/// (`CAP <= 65534`, pool indices are 16-bit).
pub struct TimerWheel<C, const CAP: usize = 16> {
    now: u32,
    slots: [Option<TimerSlot<C, CAP>>; CAP],
    buckets: [[Bucket; BUCKETS_PER_WHEEL]; NUM_WHEELS],
    /// One occupancy bit per bucket, so `advance` can skip empty runs.
    occupancy: [u64; NUM_WHEELS],
    armed: usize,
    next_id: u32,
    update_alarm: Option<fn(u32)>,
}

impl<C, const CAP: usize> Default for TimerWheel<C, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, const CAP: usize> TimerWheel<C, CAP> {
    /// Create a wheel with no hardware-alarm hint sink.
    pub fn new() -> Self {
        Self {
            now: 0,
            slots: core::array::from_fn(|_| None),
            buckets: [[Bucket::EMPTY; BUCKETS_PER_WHEEL]; NUM_WHEELS],
            occupancy: [0; NUM_WHEELS],
            armed: 0,
            next_id: 1,
            update_alarm: None,
        }
    }

    /// Create a wheel that reports ticks-until-next-expiry to `update_alarm`
    /// after every mutation. A report of 0 means no timer is armed.
    pub fn with_alarm(update_alarm: fn(u32)) -> Self {
        let mut wheel = Self::new();
        wheel.update_alarm = Some(update_alarm);
        wheel
    }

    /// Current absolute tick.
    pub fn current_tick(&self) -> u32 {
        self.now
    }

    /// Number of armed timers.
    pub fn count(&self) -> usize {
        self.armed
    }

    /// Ticks until the earliest armed deadline, `None` when nothing is armed.
    pub fn next_expiry(&self) -> Option<u32> {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.armed)
            .map(|slot| slot.deadline.wrapping_sub(self.now))
            .min()
    }

    /// Allocate an idle timer.
    ///
    /// Fails with [`TimerError::Error`] when the pool is exhausted.
    pub fn create(
        &mut self,
        repeat: bool,
        callback: TimerCallback<C, CAP>,
    ) -> Result<TimerId, TimerError> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(TimerError::Error)?;

        let id = TimerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        self.slots[index] = Some(TimerSlot {
            id,
            repeat,
            callback,
            period: 0,
            deadline: 0,
            armed: false,
            context: None,
            next: NONE,
            prev: NONE,
            wheel: 0,
            bucket: 0,
        });

        Ok(id)
    }

    /// Release an idle timer slot.
    ///
    /// Fails with [`TimerError::InvalidParam`] when the handle is unknown or
    /// the timer is still armed.
    pub fn destroy(&mut self, id: TimerId) -> Result<(), TimerError> {
        let index = self.index_of(id).ok_or(TimerError::InvalidParam)?;
        if self.slots[index].as_ref().is_some_and(|s| s.armed) {
            return Err(TimerError::InvalidParam);
        }
        self.slots[index] = None;
        Ok(())
    }

    /// Arm a timer to expire `timeout` ticks from now, carrying `context`.
    ///
    /// A zero timeout is clamped to one tick: a deadline equal to the
    /// current tick could never be reached by the forward scan.
    pub fn start(&mut self, id: TimerId, timeout: u32, context: C) -> Result<(), TimerError> {
        if timeout > MAX_TIMEOUT {
            return Err(TimerError::TimeLimitExceeded);
        }
        let index = self.index_of(id).ok_or(TimerError::InvalidParam)?;

        let timeout = timeout.max(1);
        let deadline = self.now.wrapping_add(timeout);
        {
            let slot = self.slots[index].as_mut().unwrap();
            if slot.armed {
                return Err(TimerError::AlreadyStarted);
            }
            slot.period = timeout;
            slot.deadline = deadline;
            slot.armed = true;
            slot.context = Some(context);
        }
        self.link(index);
        self.armed += 1;
        self.notify_alarm();
        Ok(())
    }

    /// Disarm a timer. Stopping an already-idle timer is a no-op.
    pub fn stop(&mut self, id: TimerId) -> Result<(), TimerError> {
        let index = self.index_of(id).ok_or(TimerError::InvalidParam)?;
        if self.slots[index].as_ref().is_some_and(|s| s.armed) {
            self.unlink(index);
            let slot = self.slots[index].as_mut().unwrap();
            slot.armed = false;
            slot.context = None;
            self.armed -= 1;
            self.notify_alarm();
        }
        Ok(())
    }

    /// Advance the tick counter by `elapsed` and run every expiry reached.
    ///
    /// Timers fire in increasing deadline order, FIFO within a bucket.
    /// Repeating timers re-arm at `old_deadline + period`; no drift
    /// compensation beyond that. Must not be called from interrupt context.
    pub fn advance(&mut self, elapsed: u32) {
        let target = self.now.wrapping_add(elapsed);

        while self.now != target {
            if self.armed == 0 {
                self.now = target;
                break;
            }

            let dist = target.wrapping_sub(self.now);

            // Nothing can expire for a while: hop to one block short of the
            // earliest deadline instead of walking empty buckets.
            if let Some(next) = self.next_expiry() {
                if next > BUCKETS_PER_WHEEL as u32 {
                    let hop = (next - BUCKETS_PER_WHEEL as u32).min(dist);
                    if hop > 0 {
                        let old = self.now;
                        self.now = old.wrapping_add(hop);
                        self.cascade_after_hop(old);
                        continue;
                    }
                }
            }

            let index = self.now & (BUCKETS_PER_WHEEL as u32 - 1);
            let pre_boundary = (BUCKETS_PER_WHEEL as u32 - 1 - index).min(dist);

            if pre_boundary > 0 {
                if let Some(hit) = self.first_occupied(index + 1, index + pre_boundary) {
                    self.now = self.now.wrapping_add(hit - index);
                    self.fire_current_bucket(hit as usize);
                    continue;
                }
                self.now = self.now.wrapping_add(pre_boundary);
                if pre_boundary == dist {
                    break;
                }
            }

            // Boundary tick: the lowest wheel wrapped, pull the matching
            // buckets of the higher wheels down before draining slot 0.
            self.now = self.now.wrapping_add(1);
            self.cascade();
            if self.occupancy[0] & 1 != 0 {
                self.fire_current_bucket(0);
            }
        }

        self.notify_alarm();
    }

    fn index_of(&self, id: TimerId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.id == id))
    }

    /// Wheel and bucket for a deadline, judged from the current tick.
    fn position_for(&self, deadline: u32) -> (usize, usize) {
        let delta = deadline.wrapping_sub(self.now);
        if delta == 0 {
            // Due now; lands in the lowest wheel's current slot, which the
            // caller drains immediately.
            return (0, (deadline & (BUCKETS_PER_WHEEL as u32 - 1)) as usize);
        }
        let level = ((31 - delta.leading_zeros()) / BITS_PER_WHEEL) as usize;
        let bucket = ((deadline >> (level as u32 * BITS_PER_WHEEL)) & (BUCKETS_PER_WHEEL as u32 - 1))
            as usize;
        (level, bucket)
    }

    /// Append slot `index` to the bucket its deadline selects.
    fn link(&mut self, index: usize) {
        let deadline = self.slots[index].as_ref().unwrap().deadline;
        let (wheel, bucket) = self.position_for(deadline);

        let tail = self.buckets[wheel][bucket].tail;
        {
            let slot = self.slots[index].as_mut().unwrap();
            slot.wheel = wheel as u8;
            slot.bucket = bucket as u8;
            slot.prev = tail;
            slot.next = NONE;
        }

        if tail == NONE {
            self.buckets[wheel][bucket].head = index as u16;
        } else {
            self.slots[tail as usize].as_mut().unwrap().next = index as u16;
        }
        self.buckets[wheel][bucket].tail = index as u16;
        self.occupancy[wheel] |= 1u64 << bucket;
    }

    /// Remove slot `index` from its bucket list.
    fn unlink(&mut self, index: usize) {
        let (wheel, bucket, prev, next) = {
            let slot = self.slots[index].as_ref().unwrap();
            (
                slot.wheel as usize,
                slot.bucket as usize,
                slot.prev,
                slot.next,
            )
        };

        if prev == NONE {
            self.buckets[wheel][bucket].head = next;
        } else {
            self.slots[prev as usize].as_mut().unwrap().next = next;
        }
        if next == NONE {
            self.buckets[wheel][bucket].tail = prev;
        } else {
            self.slots[next as usize].as_mut().unwrap().prev = prev;
        }

        if self.buckets[wheel][bucket].head == NONE {
            self.occupancy[wheel] &= !(1u64 << bucket);
        }

        let slot = self.slots[index].as_mut().unwrap();
        slot.next = NONE;
        slot.prev = NONE;
    }

    /// First occupied wheel-0 bucket in `lo..=hi`, if any.
    fn first_occupied(&self, lo: u32, hi: u32) -> Option<u32> {
        debug_assert!(lo >= 1 && hi < BUCKETS_PER_WHEEL as u32 && lo <= hi);
        let width = hi - lo + 1;
        let mask = ((1u64 << width) - 1) << lo;
        let hits = self.occupancy[0] & mask;
        (hits != 0).then(|| hits.trailing_zeros())
    }

    /// After a multi-block hop, re-seat every wheel whose window changed.
    /// Timers whose bucket now covers the current tick drop into lower
    /// wheels; everything with a farther deadline stays put.
    fn cascade_after_hop(&mut self, old: u32) {
        for level in (1..NUM_WHEELS).rev() {
            let shift = BITS_PER_WHEEL * level as u32;
            if self.now >> shift == old >> shift {
                continue;
            }
            let bucket = ((self.now >> shift) & (BUCKETS_PER_WHEEL as u32 - 1)) as usize;
            loop {
                let head = self.buckets[level][bucket].head;
                if head == NONE {
                    break;
                }
                self.unlink(head as usize);
                self.link(head as usize);
            }
        }
    }

    /// Pull higher-wheel buckets down at every window boundary the current
    /// tick just crossed. Highest wheel first, so its timers can land in the
    /// buckets the lower cascades are about to drain.
    fn cascade(&mut self) {
        for level in (1..NUM_WHEELS).rev() {
            let shift = BITS_PER_WHEEL * level as u32;
            if self.now & ((1u32 << shift) - 1) != 0 {
                continue;
            }
            let bucket = ((self.now >> shift) & (BUCKETS_PER_WHEEL as u32 - 1)) as usize;

            log::trace!("apptimer: cascade wheel {} bucket {}", level, bucket);
            loop {
                let head = self.buckets[level][bucket].head;
                if head == NONE {
                    break;
                }
                self.unlink(head as usize);
                self.link(head as usize);
            }
        }
    }

    /// Fire every timer in wheel-0 bucket `bucket`; they all expire at the
    /// current tick. The list head is re-read after each callback because
    /// callbacks may stop or start timers in this very bucket's list.
    fn fire_current_bucket(&mut self, bucket: usize) {
        loop {
            let head = self.buckets[0][bucket].head;
            if head == NONE {
                break;
            }
            let index = head as usize;
            self.unlink(index);

            let (id, callback, repeat, mut context) = {
                let slot = self.slots[index].as_mut().unwrap();
                debug_assert_eq!(slot.deadline, self.now);
                (slot.id, slot.callback, slot.repeat, slot.context.take())
            };

            if repeat {
                // Re-arm before the callback so it observes the timer as
                // armed and may stop it.
                let slot = self.slots[index].as_mut().unwrap();
                slot.deadline = slot.deadline.wrapping_add(slot.period.max(1));
                self.link(index);
            } else {
                let slot = self.slots[index].as_mut().unwrap();
                slot.armed = false;
                self.armed -= 1;
            }

            log::trace!("apptimer: timer {:?} expired at {}", id, self.now);
            if let Some(ctx) = context.as_mut() {
                callback(self, id, ctx);
            }

            // Hand the context back unless the callback rearranged things:
            // a stopped timer dropped it, a restarted one brought its own.
            if repeat {
                if let Some(slot) = self.index_of(id).and_then(|i| self.slots[i].as_mut()) {
                    if slot.armed && slot.context.is_none() {
                        slot.context = context;
                    }
                }
            }
        }
    }

    fn notify_alarm(&self) {
        if let Some(update_alarm) = self.update_alarm {
            update_alarm(self.next_expiry().unwrap_or(0));
        }
    }
}
