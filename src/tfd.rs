//! Three-finger drag.
//!
//! Three fingers landing on the touchpad and staying (or moving) press a
//! virtual left button; the drag then follows finger motion. Lifting the
//! fingers opens a drag-lock window during which putting three fingers back
//! resumes the drag without releasing the button.
//!
//! The machine itself is side-effect free: every event returns the actions
//! for the caller (the touchpad dispatcher) to perform, which keeps it
//! testable without a live pipeline.

/// How long to wait after three fingers are detected, to see whether the
/// user is transitioning to four or more.
pub const DRAG3_WAIT_FOR_FINGERS: u64 = 50_000;
/// The interval between three fingers touching and the button press, if the
/// fingers remain stationary.
pub const DRAG3_INITIAL_DELAY: u64 = 350_000;
/// The window during which a drag can be continued by reapplying three
/// fingers.
pub const DRAG3_WAIT_FOR_RESUME: u64 = 720_000;

/// Motion below this is noise (mm).
const MOVE_THRESHOLD: f64 = 0.1;
/// Inside [`TfdState::PossibleDrag`] the threshold is coarser, matching tap
/// detection.
const MOVE_THRESHOLD_POSSIBLE_DRAG: f64 = 1.3;
/// Cumulative centroid movement that breaks the drag-lock pin (mm).
const UNPIN_DISTANCE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TfdState {
    Idle,
    PossibleDrag,
    Drag,
    AwaitResume,
    PossibleResume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TfdEvent {
    /// The touch centroid moved past the current motion threshold.
    Motion,
    TouchCountIncrease,
    TouchCountDecrease,
    /// A physical button press was queued by the clickpad.
    Button,
    Tap,
    Timeout,
    ResumeTimeout,
}

/// Side effects requested by a state transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TfdAction {
    /// Press the virtual drag button (left).
    ButtonPress,
    /// Release the virtual drag button.
    ButtonRelease,
    /// Arm the finger-count/press-delay timer at the given absolute time.
    SetTimer(u64),
    CancelTimer,
    /// Arm the drag-lock resume timer at the given absolute time.
    SetResumeTimer(u64),
    CancelResumeTimer,
}

/// Touchpad state snapshot accompanying each event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Touches {
    /// Number of active (non-palm) touches.
    pub count: u32,
    /// Average position of the active touches, in mm.
    pub centroid: (f64, f64),
}

#[derive(Debug)]
pub struct ThreeFingerDrag {
    state: TfdState,
    pinned: Option<(f64, f64)>,
}

impl Default for ThreeFingerDrag {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreeFingerDrag {
    pub fn new() -> Self {
        Self {
            state: TfdState::Idle,
            pinned: None,
        }
    }

    #[inline]
    pub fn state(&self) -> TfdState {
        self.state
    }

    /// The motion threshold (in mm) the caller should apply before reporting
    /// [`TfdEvent::Motion`].
    pub fn motion_threshold(&self) -> f64 {
        match self.state {
            TfdState::PossibleDrag => MOVE_THRESHOLD_POSSIBLE_DRAG,
            _ => MOVE_THRESHOLD,
        }
    }

    fn log_bug(&self, event: TfdEvent, touches: Touches) {
        log::error!(
            "bug: invalid TFD event {:?} with {} fingers in state {:?}",
            event,
            touches.count,
            self.state,
        );
    }

    fn pin(&mut self, touches: Touches) {
        self.pinned = Some(touches.centroid);
    }

    fn should_unpin(&self, touches: Touches) -> bool {
        let Some((px, py)) = self.pinned else {
            return true;
        };
        let (dx, dy) = (touches.centroid.0 - px, touches.centroid.1 - py);
        dx.hypot(dy) >= UNPIN_DISTANCE
    }

    /// Feeds one event into the machine. Returns the actions the caller must
    /// perform, in order.
    pub fn handle_event(&mut self, event: TfdEvent, time: u64, touches: Touches) -> Vec<TfdAction> {
        let previous = self.state;
        let mut actions = Vec::new();

        match self.state {
            TfdState::Idle => self.idle_handle_event(event, time, touches, &mut actions),
            TfdState::PossibleDrag => {
                self.possible_drag_handle_event(event, time, touches, &mut actions)
            }
            TfdState::Drag => self.drag_handle_event(event, time, touches, &mut actions),
            TfdState::AwaitResume => {
                self.await_resume_handle_event(event, time, touches, &mut actions)
            }
            TfdState::PossibleResume => {
                self.possible_resume_handle_event(event, time, touches, &mut actions)
            }
        }

        if previous != self.state {
            log::debug!(
                "tfd: state {:?} -> {:?} -> {:?}",
                previous,
                event,
                self.state,
            );
        }

        actions
    }

    fn idle_handle_event(
        &mut self,
        event: TfdEvent,
        time: u64,
        touches: Touches,
        actions: &mut Vec<TfdAction>,
    ) {
        match event {
            TfdEvent::TouchCountIncrease | TfdEvent::TouchCountDecrease => {
                if touches.count == 3 {
                    self.state = TfdState::PossibleDrag;
                    actions.push(TfdAction::SetTimer(time + DRAG3_INITIAL_DELAY));
                }
            }
            TfdEvent::Motion => {}
            TfdEvent::Timeout | TfdEvent::ResumeTimeout => self.log_bug(event, touches),
            TfdEvent::Tap | TfdEvent::Button => {}
        }
    }

    /// The button press is delayed while the fingers remain stationary.
    fn possible_drag_handle_event(
        &mut self,
        event: TfdEvent,
        _time: u64,
        touches: Touches,
        actions: &mut Vec<TfdAction>,
    ) {
        match event {
            TfdEvent::TouchCountIncrease | TfdEvent::TouchCountDecrease => {
                if touches.count == 3 {
                    self.log_bug(event, touches);
                } else {
                    self.state = TfdState::Idle;
                    actions.push(TfdAction::CancelTimer);
                }
            }
            TfdEvent::Motion => {
                if touches.count == 3 {
                    // Motion commits the drag before the delay runs out.
                    self.state = TfdState::Drag;
                    actions.push(TfdAction::ButtonPress);
                    actions.push(TfdAction::CancelTimer);
                } else {
                    self.log_bug(event, touches);
                }
            }
            TfdEvent::ResumeTimeout => {}
            TfdEvent::Timeout => {
                // The fingers stayed put through the initial delay.
                self.state = TfdState::Drag;
                actions.push(TfdAction::ButtonPress);
            }
            TfdEvent::Tap | TfdEvent::Button => {}
        }
    }

    fn drag_handle_event(
        &mut self,
        event: TfdEvent,
        time: u64,
        touches: Touches,
        actions: &mut Vec<TfdAction>,
    ) {
        match event {
            TfdEvent::TouchCountIncrease | TfdEvent::TouchCountDecrease => {
                match touches.count {
                    0 | 1 => {
                        // Removing all (or all but one) fingers opens the
                        // drag-lock window.
                        self.pin(touches);
                        actions.push(TfdAction::SetResumeTimer(time + DRAG3_WAIT_FOR_RESUME));
                        self.state = TfdState::AwaitResume;
                    }
                    _ => {}
                }
            }
            TfdEvent::Motion => {}
            TfdEvent::ResumeTimeout | TfdEvent::Timeout => self.log_bug(event, touches),
            TfdEvent::Tap => {}
            TfdEvent::Button => {
                self.pinned = None;
                self.state = TfdState::Idle;
                actions.push(TfdAction::CancelResumeTimer);
                actions.push(TfdAction::ButtonRelease);
            }
        }
    }

    /// Drag-lock: a small window during which three fingers resume the drag.
    fn await_resume_handle_event(
        &mut self,
        event: TfdEvent,
        time: u64,
        touches: Touches,
        actions: &mut Vec<TfdAction>,
    ) {
        match event {
            TfdEvent::TouchCountDecrease => {
                // Fewer fingers do not concern us here, as long as an
                // increase past three invariably leaves the state.
            }
            TfdEvent::TouchCountIncrease => match touches.count {
                0 => self.log_bug(event, touches),
                1..=3 => {
                    // Might be a transition towards three fingers; give the
                    // remaining fingers a moment to land.
                    self.pin(touches);
                    actions.push(TfdAction::SetTimer(time + DRAG3_WAIT_FOR_FINGERS));
                    self.state = TfdState::PossibleResume;
                }
                _ => {
                    self.pinned = None;
                    self.state = TfdState::Idle;
                    actions.push(TfdAction::CancelResumeTimer);
                    actions.push(TfdAction::ButtonRelease);
                }
            },
            TfdEvent::Motion => match touches.count {
                1 | 2 => {
                    if self.should_unpin(touches) {
                        self.pinned = None;
                        self.state = TfdState::Idle;
                        actions.push(TfdAction::CancelResumeTimer);
                        actions.push(TfdAction::ButtonRelease);
                    }
                }
                _ => self.log_bug(event, touches),
            },
            TfdEvent::ResumeTimeout => {
                // The drag was not resumed.
                self.pinned = None;
                self.state = TfdState::Idle;
                actions.push(TfdAction::ButtonRelease);
            }
            TfdEvent::Timeout => self.log_bug(event, touches),
            TfdEvent::Tap | TfdEvent::Button => {
                self.pinned = None;
                self.state = TfdState::Idle;
                actions.push(TfdAction::CancelResumeTimer);
                actions.push(TfdAction::ButtonRelease);
            }
        }
    }

    /// Fingers have landed again, but this may be a transitory phase towards
    /// two or four fingers, which must not resume the drag.
    fn possible_resume_handle_event(
        &mut self,
        event: TfdEvent,
        _time: u64,
        touches: Touches,
        actions: &mut Vec<TfdAction>,
    ) {
        match event {
            TfdEvent::TouchCountIncrease => {
                if touches.count > 3 {
                    self.pinned = None;
                    self.state = TfdState::Idle;
                    actions.push(TfdAction::CancelResumeTimer);
                    actions.push(TfdAction::CancelTimer);
                    actions.push(TfdAction::ButtonRelease);
                }
            }
            TfdEvent::Motion => {
                if touches.count == 3 {
                    // Moving with three fingers is an unambiguous resume.
                    self.pinned = None;
                    self.state = TfdState::Drag;
                    actions.push(TfdAction::CancelResumeTimer);
                    actions.push(TfdAction::CancelTimer);
                }
            }
            TfdEvent::ResumeTimeout => {
                self.pinned = None;
                actions.push(TfdAction::CancelTimer);
                if touches.count == 3 {
                    self.state = TfdState::Drag;
                } else {
                    self.state = TfdState::Idle;
                    actions.push(TfdAction::ButtonRelease);
                }
            }
            TfdEvent::TouchCountDecrease | TfdEvent::Timeout => {
                // A decrease forces the same evaluation as the timer.
                if event == TfdEvent::TouchCountDecrease {
                    actions.push(TfdAction::CancelTimer);
                }
                match touches.count {
                    0..=2 => {
                        // Still pinned, the resume window keeps running.
                        self.state = TfdState::AwaitResume;
                    }
                    3 => {
                        self.pinned = None;
                        self.state = TfdState::Drag;
                        actions.push(TfdAction::CancelResumeTimer);
                    }
                    _ => {
                        self.pinned = None;
                        self.state = TfdState::Idle;
                        actions.push(TfdAction::CancelResumeTimer);
                        actions.push(TfdAction::ButtonRelease);
                    }
                }
            }
            TfdEvent::Tap | TfdEvent::Button => {
                self.pinned = None;
                self.state = TfdState::Idle;
                actions.push(TfdAction::CancelResumeTimer);
                actions.push(TfdAction::CancelTimer);
                actions.push(TfdAction::ButtonRelease);
            }
        }
    }
}
