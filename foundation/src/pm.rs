//! Power-management hook registry.
//!
//! Independent subsystems register entry/exit callbacks per power mode; a
//! mode transition runs every entry hook for the mode in descending
//! priority order, calls the board's transition hook, then runs the exit
//! hooks in the same order (not reversed). The whole transaction is
//! serialised by one mutex.
//!
//! The slot table is kept compact (no gaps) and per-mode sorted by
//! descending priority: registration shifts later entries right, removal
//! shifts them left.
//!
//! Hooks must not register or unregister callbacks from inside
//! [`Pm::enter`]; the transaction lock is held for its whole duration and
//! the attempt would deadlock.
//!
//! # Usage
//!
//! ```
//! use ember_foundation::pm::{Pm, PmMode};
//!
//! fn board(_mode: PmMode, _duration_ms: u32) -> i32 { 0 }
//!
//! let quiesce = |_mode: PmMode| { /* flush, park DMA, ... */ };
//! let pm: Pm = Pm::new(board);
//! pm.register_entry_callback(PmMode::Sleep, 10, &quiesce).unwrap();
//! assert_eq!(pm.enter(PmMode::Sleep, 1000), 0);
//! ```

use core::fmt;

use spin::Mutex;

/// Power modes, from light sleep to shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmMode {
    Sleep,
    DeepSleep,
    Ship,
    SoftReset,
    HardReset,
    Shutdown,
}

/// Failures surfaced by the registry API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "pm errors must be handled"]
pub enum PmError {
    /// Reserved for null-argument misuse in bindings; not produced by the
    /// safe API.
    InvalidParam,
    /// Slot table full.
    NoSpace,
    /// Unregister did not find the entry.
    NoEntry,
    /// Exact duplicate registration.
    Exist,
}

impl fmt::Display for PmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid pm argument"),
            Self::NoSpace => write!(f, "pm slot table full"),
            Self::NoEntry => write!(f, "pm callback not registered"),
            Self::Exist => write!(f, "pm callback already registered"),
        }
    }
}

/// Mode-transition hook. Captures its context; the reference must stay
/// valid until unregistered.
pub type PmHook<'a> = &'a (dyn Fn(PmMode) + Sync);

/// Platform hook performing the actual transition. Returns 0 on successful
/// resumption, negative on failure. Called under the registry mutex.
pub type BoardHook = fn(PmMode, u32) -> i32;

#[derive(Clone, Copy)]
struct Slot<'a> {
    mode: PmMode,
    priority: i8,
    on_exit: bool,
    hook: PmHook<'a>,
}

/// The process-wide hook registry; the application owns exactly one.
///
/// `CAP` bounds the total number of registered hooks across all modes.
pub struct Pm<'a, const CAP: usize = 8> {
    slots: Mutex<[Option<Slot<'a>>; CAP]>,
    board: BoardHook,
}

fn default_board(_mode: PmMode, _duration_ms: u32) -> i32 {
    0
}

impl<'a, const CAP: usize> Default for Pm<'a, CAP> {
    /// Registry with a no-op board hook, for targets where the transition
    /// is handled entirely by the hooks.
    fn default() -> Self {
        Self::new(default_board)
    }
}

impl<'a, const CAP: usize> Pm<'a, CAP> {
    pub const fn new(board: BoardHook) -> Self {
        Self {
            slots: Mutex::new([None; CAP]),
            board,
        }
    }

    /// Register a hook run before the board enters `mode`.
    pub fn register_entry_callback(
        &self,
        mode: PmMode,
        priority: i8,
        hook: PmHook<'a>,
    ) -> Result<(), PmError> {
        self.register(mode, priority, hook, false)
    }

    /// Register a hook run after the board returns from `mode`.
    pub fn register_exit_callback(
        &self,
        mode: PmMode,
        priority: i8,
        hook: PmHook<'a>,
    ) -> Result<(), PmError> {
        self.register(mode, priority, hook, true)
    }

    pub fn unregister_entry_callback(
        &self,
        mode: PmMode,
        priority: i8,
        hook: PmHook<'a>,
    ) -> Result<(), PmError> {
        self.unregister(mode, priority, hook, false)
    }

    pub fn unregister_exit_callback(
        &self,
        mode: PmMode,
        priority: i8,
        hook: PmHook<'a>,
    ) -> Result<(), PmError> {
        self.unregister(mode, priority, hook, true)
    }

    /// Run the `mode` transition: entry hooks in descending priority, the
    /// board hook, then exit hooks in the same order. Returns the board's
    /// result.
    pub fn enter(&self, mode: PmMode, duration_ms: u32) -> i32 {
        let slots = self.slots.lock();

        for slot in slots.iter().flatten() {
            if slot.mode == mode && !slot.on_exit {
                (slot.hook)(mode);
            }
        }

        log::debug!("pm: entering {:?} for {} ms", mode, duration_ms);
        let rc = (self.board)(mode, duration_ms);

        for slot in slots.iter().flatten() {
            if slot.mode == mode && slot.on_exit {
                (slot.hook)(mode);
            }
        }

        rc
    }

    /// Number of hooks registered for `mode` (entry and exit).
    pub fn count(&self, mode: PmMode) -> usize {
        self.slots
            .lock()
            .iter()
            .flatten()
            .filter(|slot| slot.mode == mode)
            .count()
    }

    fn register(
        &self,
        mode: PmMode,
        priority: i8,
        hook: PmHook<'a>,
        on_exit: bool,
    ) -> Result<(), PmError> {
        let mut slots = self.slots.lock();

        if slots.iter().all(|slot| slot.is_some()) {
            return Err(PmError::NoSpace);
        }

        let mut insert_at = None;
        for (at, entry) in slots.iter().enumerate() {
            match entry {
                // Compactness guarantees no occupied slot after this one.
                None => {
                    insert_at = Some(at);
                    break;
                }
                Some(slot) if slot.mode != mode => continue,
                Some(slot)
                    if slot.priority == priority
                        && slot.on_exit == on_exit
                        && hook_eq(slot.hook, hook) =>
                {
                    return Err(PmError::Exist);
                }
                Some(slot) if slot.priority < priority => {
                    insert_at = Some(at);
                    break;
                }
                Some(_) => continue,
            }
        }

        let at = insert_at.ok_or(PmError::NoSpace)?;
        // Shift the tail right into the free space.
        for from in (at..CAP - 1).rev() {
            if slots[from].is_some() {
                slots[from + 1] = slots[from];
            }
        }
        slots[at] = Some(Slot {
            mode,
            priority,
            on_exit,
            hook,
        });
        Ok(())
    }

    fn unregister(
        &self,
        mode: PmMode,
        priority: i8,
        hook: PmHook<'a>,
        on_exit: bool,
    ) -> Result<(), PmError> {
        let mut slots = self.slots.lock();

        let at = slots
            .iter()
            .position(|entry| {
                entry.is_some_and(|slot| {
                    slot.mode == mode
                        && slot.priority == priority
                        && slot.on_exit == on_exit
                        && hook_eq(slot.hook, hook)
                })
            })
            .ok_or(PmError::NoEntry)?;

        for from in at..CAP - 1 {
            slots[from] = slots[from + 1];
        }
        slots[CAP - 1] = None;
        Ok(())
    }
}

fn hook_eq(a: PmHook<'_>, b: PmHook<'_>) -> bool {
    // Compare the data pointers only; vtable identity is not stable.
    core::ptr::eq(a as *const _ as *const (), b as *const _ as *const ())
}
