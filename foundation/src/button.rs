//! Debouncing button state machine.
//!
//! The raw input level is sampled every `sampling_period_ms` and shifted
//! into a history register. The register, masked to
//! `debounce_duration / sampling_period + 1` bits, classifies the input:
//! a `0…01…1` pattern is a debounced press, the inverse `1…10…0` a release,
//! all-ones a held button. Time-based events derive from those edges:
//! HOLDING once the press has lasted `repeat_delay_ms`, repeat pulses every
//! `repeat_rate_ms` thereafter, and click counting across releases within
//! `click_window_ms`.
//!
//! Events are delivered on the caller's `step` context through the single
//! event callback, carrying the running click and repeat counts. One `step`
//! call produces at most one callback.
//!
//! # Usage
//!
//! ```
//! use core::cell::Cell;
//! use ember_foundation::button::{Button, ButtonState, Level};
//!
//! let level = Cell::new(Level::Low);
//! let mut button = Button::new(|| level.get(), |event, clicks, _repeats| {
//!     if event == ButtonState::Pressed {
//!         assert_eq!(clicks, 1);
//!     }
//! });
//!
//! level.set(Level::High);
//! for t in (0..=100).step_by(10) {
//!     button.step(t).unwrap();
//! }
//! assert_eq!(button.state(), ButtonState::Pressed);
//! ```

use core::fmt;

/// Failures surfaced by the button API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "button errors must be handled"]
pub enum ButtonError {
    Unknown,
    /// Reserved for null-argument misuse in bindings; not produced by the
    /// safe API.
    InvalidParam,
    /// Parameter combination that cannot classify anything.
    IncorrectParam,
    /// `step` while disabled.
    Disabled,
}

impl fmt::Display for ButtonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown button failure"),
            Self::InvalidParam => write!(f, "invalid button argument"),
            Self::IncorrectParam => write!(f, "inconsistent button parameters"),
            Self::Disabled => write!(f, "button disabled"),
        }
    }
}

/// Raw logical input level. `High` is pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Debounced state, also used as the event tag in callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Unknown,
    Pressed,
    Released,
    Holding,
}

/// Sampling and classification tunables, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonParam {
    /// Interval between input samples.
    pub sampling_period_ms: u16,
    /// Time the level must be stable to count as an edge.
    pub debounce_duration_ms: u16,
    /// Press duration before HOLDING fires; 0 disables hold detection.
    pub repeat_delay_ms: u16,
    /// Interval between repeat pulses after HOLDING; 0 disables repeats.
    pub repeat_rate_ms: u16,
    /// A press within this window of the last release extends the click
    /// chain; the count flushes when the window lapses.
    pub click_window_ms: u16,
    /// Longest believable gap between `step` calls; a larger gap discards
    /// the missed interval instead of replaying thousands of samples.
    pub sampling_timeout_ms: u16,
}

impl Default for ButtonParam {
    fn default() -> Self {
        Self {
            sampling_period_ms: 10,
            debounce_duration_ms: 30,
            repeat_delay_ms: 300,
            repeat_rate_ms: 100,
            click_window_ms: 500,
            sampling_timeout_ms: 1000,
        }
    }
}

impl ButtonParam {
    /// History bits needed to see a full debounce interval.
    fn window_bits(&self) -> u32 {
        (self.debounce_duration_ms / self.sampling_period_ms) as u32
    }

    fn validate(&self) -> Result<(), ButtonError> {
        if self.sampling_period_ms == 0 {
            return Err(ButtonError::IncorrectParam);
        }
        let bits = self.window_bits();
        // The pattern needs at least one stable bit and must fit the
        // register together with the transition bit.
        if bits < 1 || bits > 30 {
            return Err(ButtonError::IncorrectParam);
        }
        if self.sampling_timeout_ms < self.sampling_period_ms {
            return Err(ButtonError::IncorrectParam);
        }
        Ok(())
    }
}

/// Debounced input channel.
///
/// `G` samples the raw level, `F` receives `(event, clicks, repeats)`.
pub struct Button<G, F>
where
    G: FnMut() -> Level,
    F: FnMut(ButtonState, u16, u16),
{
    get_level: G,
    callback: F,
    param: ButtonParam,
    enabled: bool,

    history: u32,
    state: ButtonState,
    pressed: bool,
    holding: bool,
    clicks: u16,
    repeats: u16,
    time_pressed: u32,
    time_released: u32,
    last_repeat: u32,
    last_sample: u32,
    started: bool,
}

impl<G, F> Button<G, F>
where
    G: FnMut() -> Level,
    F: FnMut(ButtonState, u16, u16),
{
    /// Create an enabled button with default parameters.
    pub fn new(get_level: G, callback: F) -> Self {
        Self {
            get_level,
            callback,
            param: ButtonParam::default(),
            enabled: true,
            history: 0,
            state: ButtonState::Unknown,
            pressed: false,
            holding: false,
            clicks: 0,
            repeats: 0,
            time_pressed: 0,
            time_released: 0,
            last_repeat: 0,
            last_sample: 0,
            started: false,
        }
    }

    /// Replace the tunables after validating them.
    pub fn set_param(&mut self, param: ButtonParam) -> Result<(), ButtonError> {
        param.validate()?;
        self.param = param;
        Ok(())
    }

    pub fn get_param(&self) -> ButtonParam {
        self.param
    }

    /// Resume evaluation. Runtime state restarts clean; parameters and the
    /// callback are preserved.
    pub fn enable(&mut self) -> Result<(), ButtonError> {
        self.enabled = true;
        self.history = 0;
        self.pressed = false;
        self.holding = false;
        self.clicks = 0;
        self.repeats = 0;
        self.state = ButtonState::Unknown;
        self.started = false;
        Ok(())
    }

    /// Halt evaluation without losing configuration.
    pub fn disable(&mut self) -> Result<(), ButtonError> {
        self.enabled = false;
        Ok(())
    }

    /// Last delivered state.
    pub fn state(&self) -> ButtonState {
        self.state
    }

    /// Clicks accumulated in the currently open click chain.
    pub fn clicks(&self) -> u16 {
        self.clicks
    }

    /// Repeat pulses delivered during the current hold.
    pub fn repeats(&self) -> u16 {
        self.repeats
    }

    /// True while the machine still has work pending: a press in progress,
    /// an unsettled history, or an open click window.
    pub fn busy(&self) -> bool {
        let mask = (1u32 << (self.param.window_bits() + 1)) - 1;
        self.pressed || (self.history & mask) != 0 || self.clicks > 0
    }

    /// Advance the machine to absolute time `now_ms`, sampling the input at
    /// every elapsed sampling period.
    pub fn step(&mut self, now_ms: u32) -> Result<ButtonState, ButtonError> {
        if !self.enabled {
            return Err(ButtonError::Disabled);
        }

        let period = self.param.sampling_period_ms as u32;
        if !self.started {
            self.started = true;
            // Process the very first sample right away.
            self.last_sample = now_ms.wrapping_sub(period);
        }

        if now_ms.wrapping_sub(self.last_sample) > self.param.sampling_timeout_ms as u32 {
            log::debug!("button: sampling gap too large, catching up");
            self.last_sample = now_ms.wrapping_sub(period);
        }

        while now_ms.wrapping_sub(self.last_sample) >= period {
            self.last_sample = self.last_sample.wrapping_add(period);
            let t = self.last_sample;
            if self.process_sample(t) {
                // At most one callback per step; leftover time is caught up
                // by the next call.
                break;
            }
        }

        Ok(self.state)
    }

    /// [`step`](Self::step) with a relative elapsed time.
    pub fn step_delta(&mut self, delta_ms: u32) -> Result<ButtonState, ButtonError> {
        let base = if self.started { self.last_sample } else { 0 };
        self.step(base.wrapping_add(delta_ms))
    }

    /// Shift in one sample and classify. Returns true when a callback was
    /// delivered.
    fn process_sample(&mut self, t: u32) -> bool {
        let bits = self.param.window_bits();
        let mask = (1u32 << (bits + 1)) - 1;
        let pressed_pattern = (1u32 << bits) - 1;
        let released_pattern = 1u32 << bits;

        let level = (self.get_level)();
        self.history = (self.history << 1) | (level == Level::High) as u32;
        let window = self.history & mask;

        if window == pressed_pattern && !self.pressed {
            self.pressed = true;
            self.time_pressed = t;
            // A press within the click window extends the chain.
            let in_window = self.clicks > 0
                && t.wrapping_sub(self.time_released) <= self.param.click_window_ms as u32;
            self.clicks = if in_window { self.clicks + 1 } else { 1 };
            self.emit(ButtonState::Pressed, t);
            return true;
        }

        if window == released_pattern && self.pressed {
            self.pressed = false;
            self.holding = false;
            self.repeats = 0;
            self.time_released = t;
            self.emit(ButtonState::Released, t);
            return true;
        }

        if self.pressed && window == mask {
            let delay = self.param.repeat_delay_ms as u32;
            if !self.holding && delay > 0 && t.wrapping_sub(self.time_pressed) >= delay {
                self.holding = true;
                self.repeats = 1;
                self.last_repeat = t;
                self.emit(ButtonState::Holding, t);
                return true;
            }
            let rate = self.param.repeat_rate_ms as u32;
            if self.holding && rate > 0 && t.wrapping_sub(self.last_repeat) >= rate {
                self.last_repeat = t;
                self.repeats = self.repeats.saturating_add(1);
                self.emit(ButtonState::Holding, t);
                return true;
            }
        }

        // Click chain flush: window lapsed with no new press.
        if !self.pressed
            && self.clicks > 0
            && t.wrapping_sub(self.time_released) > self.param.click_window_ms as u32
        {
            let clicks = self.clicks;
            self.clicks = 0;
            (self.callback)(self.state, clicks, self.repeats);
            return true;
        }

        false
    }

    fn emit(&mut self, event: ButtonState, t: u32) {
        log::trace!("button: {:?} at {} ms", event, t);
        self.state = event;
        (self.callback)(event, self.clicks, self.repeats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type EventLog = Rc<RefCell<Vec<(ButtonState, u16, u16)>>>;

    fn rig() -> (Rc<Cell<Level>>, EventLog, Button<impl FnMut() -> Level, impl FnMut(ButtonState, u16, u16)>) {
        let level = Rc::new(Cell::new(Level::Low));
        let events: EventLog = Rc::new(RefCell::new(Vec::new()));

        let sampled = level.clone();
        let sink = events.clone();
        let button = Button::new(
            move || sampled.get(),
            move |event, clicks, repeats| sink.borrow_mut().push((event, clicks, repeats)),
        );
        (level, events, button)
    }

    /// Default params: 10 ms sampling, 30 ms debounce -> 3 stable samples.
    fn run(button: &mut Button<impl FnMut() -> Level, impl FnMut(ButtonState, u16, u16)>,
           from_ms: u32, to_ms: u32) {
        let mut t = from_ms;
        while t <= to_ms {
            button.step(t).unwrap();
            t += 10;
        }
    }

    #[test]
    fn debounced_press_and_release() {
        let (level, events, mut button) = rig();

        run(&mut button, 0, 20);
        assert_eq!(button.state(), ButtonState::Unknown);

        level.set(Level::High);
        run(&mut button, 30, 60);
        assert_eq!(button.state(), ButtonState::Pressed);

        level.set(Level::Low);
        run(&mut button, 70, 100);
        assert_eq!(button.state(), ButtonState::Released);

        let log = events.borrow();
        assert_eq!(log[0].0, ButtonState::Pressed);
        assert_eq!(log[1].0, ButtonState::Released);
    }

    #[test]
    fn glitch_shorter_than_debounce_ignored() {
        let (level, events, mut button) = rig();

        run(&mut button, 0, 20);
        // Two high samples, then low again: never a stable press.
        level.set(Level::High);
        run(&mut button, 30, 40);
        level.set(Level::Low);
        run(&mut button, 50, 200);

        assert!(events.borrow().is_empty());
        assert_eq!(button.state(), ButtonState::Unknown);
    }

    #[test]
    fn single_click_flushes_after_window() {
        let (level, events, mut button) = rig();

        level.set(Level::High);
        run(&mut button, 0, 40);
        level.set(Level::Low);
        run(&mut button, 50, 80);
        assert_eq!(button.clicks(), 1);
        assert!(button.busy());

        // Let the 500 ms click window lapse.
        run(&mut button, 90, 700);
        assert_eq!(button.clicks(), 0);

        let log = events.borrow();
        // Pressed, Released, then the click flush carrying the count.
        assert_eq!(log.len(), 3);
        assert_eq!(log[2], (ButtonState::Released, 1, 0));
        drop(log);
        assert!(!button.busy());
    }

    #[test]
    fn double_click_counts_two() {
        let (level, events, mut button) = rig();

        for _ in 0..2 {
            level.set(Level::High);
            let t0 = button_time(&button);
            run(&mut button, t0 + 10, t0 + 40);
            level.set(Level::Low);
            let t1 = button_time(&button);
            run(&mut button, t1 + 10, t1 + 40);
        }
        assert_eq!(button.clicks(), 2);

        let t = button_time(&button);
        run(&mut button, t + 10, t + 600);
        let log = events.borrow();
        let flush = log.last().unwrap();
        assert_eq!(flush.1, 2);
        assert_eq!(button.clicks(), 0);
    }

    fn button_time(button: &Button<impl FnMut() -> Level, impl FnMut(ButtonState, u16, u16)>) -> u32 {
        button.last_sample
    }

    #[test]
    fn holding_and_repeat_pulses() {
        let (level, events, mut button) = rig();

        level.set(Level::High);
        // Press debounces at 30 ms; hold past repeat_delay (300 ms) and two
        // repeat periods (100 ms each).
        run(&mut button, 0, 540);

        let log = events.borrow();
        assert_eq!(log[0].0, ButtonState::Pressed);
        assert_eq!(log[1].0, ButtonState::Holding);
        assert!(button.repeats() >= 3, "repeats = {}", button.repeats());
        assert_eq!(button.state(), ButtonState::Holding);
        drop(log);

        // Release clears the repeat counter.
        level.set(Level::Low);
        run(&mut button, 550, 580);
        assert_eq!(button.repeats(), 0);
        assert_eq!(button.state(), ButtonState::Released);
    }

    #[test]
    fn disable_gates_stepping() {
        let (level, events, mut button) = rig();

        button.disable().unwrap();
        assert_eq!(button.step(0), Err(ButtonError::Disabled));

        button.enable().unwrap();
        level.set(Level::High);
        run(&mut button, 0, 40);
        assert_eq!(button.state(), ButtonState::Pressed);
        assert!(!events.borrow().is_empty());
    }

    #[test]
    fn param_validation() {
        let (_, _, mut button) = rig();

        assert_eq!(
            button.set_param(ButtonParam {
                sampling_period_ms: 0,
                ..Default::default()
            }),
            Err(ButtonError::IncorrectParam)
        );
        assert_eq!(
            button.set_param(ButtonParam {
                sampling_period_ms: 10,
                debounce_duration_ms: 5,
                ..Default::default()
            }),
            Err(ButtonError::IncorrectParam)
        );
        assert_eq!(
            button.set_param(ButtonParam {
                sampling_timeout_ms: 5,
                ..Default::default()
            }),
            Err(ButtonError::IncorrectParam)
        );

        let custom = ButtonParam {
            sampling_period_ms: 5,
            debounce_duration_ms: 20,
            ..Default::default()
        };
        button.set_param(custom).unwrap();
        assert_eq!(button.get_param(), custom);
    }

    #[test]
    fn step_delta_advances_relative() {
        let (level, _, mut button) = rig();

        level.set(Level::High);
        for _ in 0..5 {
            button.step_delta(10).unwrap();
        }
        assert_eq!(button.state(), ButtonState::Pressed);
    }

    #[test]
    fn stale_gap_discards_missed_interval() {
        let (level, events, mut button) = rig();

        run(&mut button, 0, 20);
        // A huge gap: only one sample is processed, not thousands.
        level.set(Level::High);
        button.step(100_000).unwrap();
        assert!(events.borrow().is_empty());
        assert_ne!(button.state(), ButtonState::Pressed);
    }
}
