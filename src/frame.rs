//! SYN_REPORT-terminated event frames.

use std::{cell::RefCell, fmt, rc::Rc};

use smallvec::SmallVec;

use crate::event::{Event, InputEvent, Usage};

/// Error returned by the fallible [`EvdevFrame`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Appending would exceed the frame's fixed capacity.
    ///
    /// The frame is left unchanged when this is returned.
    #[error("event frame capacity exceeded")]
    Overflow,
}

/// A frame that is shared between the pipeline's queues and the plugin
/// currently processing it.
///
/// The pipeline is single-threaded; a plugin callback holds the only mutable
/// borrow for its duration.
pub type FrameHandle = Rc<RefCell<EvdevFrame>>;

/// A SYN_REPORT-terminated set of input events.
///
/// A frame always has a count of >= 1 (the SYN_REPORT) and a fixed maximum
/// size given in [`EvdevFrame::new`]; it cannot be resized afterwards.
/// Appending a SYN_REPORT replaces the existing terminator instead of growing
/// the frame.
///
/// The timestamp is monotonic microseconds and applies to the whole frame.
#[derive(Clone)]
pub struct EvdevFrame {
    max_size: usize,
    time: u64,
    /// Payload events plus the trailing SYN_REPORT terminator.
    events: SmallVec<[Event; 16]>,
}

impl EvdevFrame {
    /// Allocates an empty frame holding at most `max_size` events (including
    /// the terminator slot).
    pub fn new(max_size: usize) -> Self {
        debug_assert!(max_size >= 1);
        let mut events = SmallVec::new();
        events.push(Event::syn_report());
        Self {
            max_size,
            time: 0,
            events,
        }
    }

    /// Whether the frame holds no events besides the terminator.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.len() == 1
    }

    /// Number of events in the frame, including the terminator slot.
    #[inline]
    pub fn count(&self) -> usize {
        self.events.len()
    }

    /// Borrows the events of this frame, including the trailing SYN_REPORT.
    #[inline]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Borrows the events of this frame without the trailing SYN_REPORT.
    #[inline]
    pub fn payload(&self) -> &[Event] {
        &self.events[..self.events.len() - 1]
    }

    /// Sets the timestamp for all events in this event frame.
    #[inline]
    pub fn set_time(&mut self, time: u64) {
        self.time = time;
    }

    #[inline]
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Drops all events, leaving only the terminator. The timestamp is kept.
    pub fn reset(&mut self) {
        self.events.clear();
        self.events.push(Event::syn_report());
    }

    /// Appends events to the event frame.
    ///
    /// If any of the given events is a SYN_REPORT, that event is the last one
    /// appended even if the slice continues past it (roughly equivalent to a
    /// `\0` inside a string). The frame stays terminated with a single
    /// SYN_REPORT; appending SYN_REPORTs does not increase the count.
    ///
    /// Fails with [`FrameError::Overflow`] if the events do not fit, in which
    /// case the frame is unchanged.
    pub fn append(&mut self, events: &[Event]) -> Result<(), FrameError> {
        let nevents = events
            .iter()
            .position(Event::is_syn_report)
            .unwrap_or(events.len());

        if nevents > 0 {
            if self.count() + nevents > self.max_size {
                return Err(FrameError::Overflow);
            }

            let terminator = self.events.len() - 1;
            self.events
                .insert_from_slice(terminator, &events[..nevents]);
        }

        Ok(())
    }

    /// Appends a single event.
    #[inline]
    pub fn append_one(&mut self, usage: Usage, value: i32) -> Result<(), FrameError> {
        self.append(&[Event::new(usage, value)])
    }

    /// Appends a kernel-format event.
    ///
    /// A SYN_REPORT event with a nonzero timestamp becomes the frame's
    /// timestamp; all other events leave the frame time as-is.
    pub fn append_input_event(&mut self, event: &InputEvent) -> Result<(), FrameError> {
        self.append(&[Event::from(*event)])?;

        let time = event.time();
        if event.usage() == Usage::SYN_REPORT && time != 0 {
            self.set_time(time);
        }

        Ok(())
    }

    /// Behaves like [`EvdevFrame::append`] but resets the frame before
    /// appending. On overflow the frame is left as-is.
    pub fn set(&mut self, events: &[Event]) -> Result<(), FrameError> {
        let nevents = events
            .iter()
            .position(Event::is_syn_report)
            .unwrap_or(events.len());
        if nevents > self.max_size - 1 {
            return Err(FrameError::Overflow);
        }

        self.reset();
        self.append(events)
    }

    /// Converts the frame back to kernel-format events, terminator included,
    /// all stamped with the frame time.
    pub fn to_input_events(&self) -> Vec<InputEvent> {
        self.events
            .iter()
            .map(|ev| ev.to_input_event(self.time))
            .collect()
    }

    /// Builds a frame from kernel-format events, stopping at the first
    /// SYN_REPORT. The frame time comes from the terminating SYN_REPORT.
    pub fn from_input_events(
        max_size: usize,
        events: &[InputEvent],
    ) -> Result<Self, FrameError> {
        let mut frame = Self::new(max_size);
        for event in events {
            frame.append_input_event(event)?;
            if event.usage() == Usage::SYN_REPORT {
                break;
            }
        }
        Ok(frame)
    }

    /// Wraps the frame for handing it to the pipeline.
    #[inline]
    pub fn into_handle(self) -> FrameHandle {
        Rc::new(RefCell::new(self))
    }
}

impl fmt::Debug for EvdevFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvdevFrame")
            .field("time", &self.time)
            .field("events", &self.payload())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::event::EventType;

    use super::*;

    fn ev(usage: Usage, value: i32) -> Event {
        Event::new(usage, value)
    }

    #[test]
    fn starts_terminated() {
        let frame = EvdevFrame::new(8);
        assert!(frame.is_empty());
        assert_eq!(frame.count(), 1);
        assert_eq!(frame.events(), &[Event::syn_report()]);
        assert_eq!(frame.time(), 0);
    }

    #[test]
    fn append_keeps_terminator_last() {
        let mut frame = EvdevFrame::new(8);
        frame
            .append(&[ev(Usage::BTN_LEFT, 1), ev(Usage::REL_X, -2)])
            .unwrap();
        assert_eq!(frame.count(), 3);
        assert_eq!(
            frame.events(),
            &[
                ev(Usage::BTN_LEFT, 1),
                ev(Usage::REL_X, -2),
                Event::syn_report(),
            ]
        );

        // Appending a SYN_REPORT replaces the terminator instead of growing.
        frame.append(&[Event::syn_report()]).unwrap();
        assert_eq!(frame.count(), 3);
    }

    #[test]
    fn append_truncates_at_syn_report() {
        let mut frame = EvdevFrame::new(8);
        frame
            .append(&[
                ev(Usage::BTN_LEFT, 1),
                Event::syn_report(),
                ev(Usage::BTN_RIGHT, 1),
            ])
            .unwrap();
        assert_eq!(frame.payload(), &[ev(Usage::BTN_LEFT, 1)]);
    }

    #[test]
    fn overflow_leaves_frame_unchanged() {
        let mut frame = EvdevFrame::new(3);
        frame.append(&[ev(Usage::REL_X, 1)]).unwrap();

        let before = frame.events().to_vec();
        assert_eq!(
            frame.append(&[ev(Usage::REL_Y, 1), ev(Usage::REL_WHEEL, 1)]),
            Err(FrameError::Overflow)
        );
        assert_eq!(frame.events(), &before[..]);

        // `set` is atomic too.
        assert_eq!(
            frame.set(&[
                ev(Usage::REL_X, 1),
                ev(Usage::REL_Y, 1),
                ev(Usage::REL_WHEEL, 1),
            ]),
            Err(FrameError::Overflow)
        );
        assert_eq!(frame.events(), &before[..]);
    }

    #[test]
    fn set_resets_first() {
        let mut frame = EvdevFrame::new(8);
        frame.append(&[ev(Usage::BTN_LEFT, 1)]).unwrap();
        frame.set(&[ev(Usage::BTN_RIGHT, 1)]).unwrap();
        assert_eq!(frame.payload(), &[ev(Usage::BTN_RIGHT, 1)]);
    }

    #[test]
    fn reset_keeps_capacity_usable() {
        let mut frame = EvdevFrame::new(2);
        frame.append_one(Usage::REL_X, 5).unwrap();
        frame.reset();
        assert!(frame.is_empty());
        frame.append_one(Usage::REL_Y, 6).unwrap();
        assert_eq!(frame.payload(), &[ev(Usage::REL_Y, 6)]);
    }

    #[test]
    fn clones_are_independent() {
        let mut frame = EvdevFrame::new(8);
        frame.append_one(Usage::BTN_LEFT, 1).unwrap();
        frame.set_time(100);

        let mut clone = frame.clone();
        clone.append_one(Usage::BTN_LEFT, 0).unwrap();
        clone.set_time(200);

        assert_eq!(frame.count(), 2);
        assert_eq!(frame.time(), 100);
        assert_eq!(clone.count(), 3);
        assert_eq!(clone.time(), 200);
    }

    #[test]
    fn input_event_round_trip() {
        let raw = [
            InputEvent::new(EventType::ABS, 0x18, 1024).with_time(5_000),
            InputEvent::new(EventType::KEY, 0x14b, 1).with_time(5_000),
            InputEvent::new(EventType::SYN, 0, 0).with_time(5_000),
        ];

        let frame = EvdevFrame::from_input_events(64, &raw).unwrap();
        assert_eq!(frame.time(), 5_000);
        assert_eq!(frame.count(), 3);
        assert_eq!(frame.to_input_events(), raw);
    }

    #[test]
    fn only_syn_report_events_carry_the_frame_time() {
        let mut frame = EvdevFrame::new(8);

        // Plain events never touch the frame's timestamp.
        frame
            .append_input_event(&InputEvent::new(EventType::REL, 0, 1).with_time(77))
            .unwrap();
        assert_eq!(frame.time(), 0);

        frame
            .append_input_event(&InputEvent::new(EventType::SYN, 0, 0).with_time(99))
            .unwrap();
        assert_eq!(frame.time(), 99);

        // A SYN_REPORT stamped 0 keeps the prior timestamp.
        frame
            .append_input_event(&InputEvent::new(EventType::SYN, 0, 0))
            .unwrap();
        assert_eq!(frame.time(), 99);
    }

    #[test]
    fn overflowing_input_event_leaves_the_time_alone() {
        let mut frame = EvdevFrame::new(2);
        frame
            .append_input_event(&InputEvent::new(EventType::SYN, 0, 0).with_time(50))
            .unwrap();
        frame.append_one(Usage::REL_X, 1).unwrap();

        // The frame is full; a failed append must not mutate anything, the
        // timestamp included.
        assert_eq!(
            frame.append_input_event(&InputEvent::new(EventType::REL, 1, 1).with_time(60)),
            Err(FrameError::Overflow)
        );
        assert_eq!(frame.time(), 50);
        assert_eq!(frame.payload(), &[ev(Usage::REL_X, 1)]);
    }

    #[test]
    fn at_most_one_syn_report() {
        let mut frame = EvdevFrame::new(16);
        frame.append(&[ev(Usage::BTN_LEFT, 1)]).unwrap();
        frame.append(&[Event::syn_report()]).unwrap();
        frame.append(&[ev(Usage::BTN_LEFT, 0)]).unwrap();

        let syns = frame
            .events()
            .iter()
            .filter(|ev| ev.is_syn_report())
            .count();
        assert_eq!(syns, 1);
        assert!(frame.events().last().unwrap().is_syn_report());
    }
}
