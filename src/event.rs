//! Event usages and the events that make up a frame.
//!
//! The pipeline never passes raw `(type, code)` integer pairs around. Both are
//! packed into a [`Usage`], a 32-bit value with the event type in the upper and
//! the event code in the lower 16 bits. An [`Event`] pairs a [`Usage`] with its
//! signed 32-bit value; a SYN_REPORT-terminated sequence of events forms an
//! [`EvdevFrame`][crate::frame::EvdevFrame].
//!
//! [`InputEvent`] is the `#[repr(C)]` kernel wire format. Conversions between
//! it and [`Event`] are bit-exact; the kernel timestamp becomes the frame
//! timestamp (monotonic microseconds).

pub(crate) mod codes;

use std::fmt;

use crate::raw::input_event;

pub use codes::{Abs, EventType, Key, Misc, Rel, Switch, Syn, UnknownVariant};

/// Converts a kernel `timeval` to monotonic microseconds.
fn tv2us(tv: &libc::timeval) -> u64 {
    tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64
}

fn us2tv(us: u64) -> libc::timeval {
    libc::timeval {
        tv_sec: (us / 1_000_000) as _,
        tv_usec: (us % 1_000_000) as _,
    }
}

/// A packed `(event type, event code)` pair.
///
/// This is an enum-like wrapper so the compiler helps us a bit: a [`Usage`]
/// cannot accidentally be mixed up with a bare code or a random integer.
/// Equality is integer equality. The named constants cover the codes the
/// pipeline uses; any other `(type, code)` pair is still representable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Usage(u32);

macro_rules! usage_consts {
    ( $( $name:ident = ($ty:ident, $code:expr); )* ) => {
        impl Usage {
            $(
                pub const $name: Self = Self::new(EventType::$ty, $code);
            )*
        }
    };
}

usage_consts! {
    SYN_REPORT = (SYN, 0);

    BTN_LEFT = (KEY, 0x110);
    BTN_RIGHT = (KEY, 0x111);
    BTN_MIDDLE = (KEY, 0x112);
    BTN_SIDE = (KEY, 0x113);
    BTN_EXTRA = (KEY, 0x114);
    BTN_FORWARD = (KEY, 0x115);
    BTN_BACK = (KEY, 0x116);
    BTN_TASK = (KEY, 0x117);

    BTN_0 = (KEY, 0x100);
    BTN_1 = (KEY, 0x101);
    BTN_2 = (KEY, 0x102);

    BTN_TOOL_PEN = (KEY, 0x140);
    BTN_TOOL_RUBBER = (KEY, 0x141);
    BTN_TOOL_BRUSH = (KEY, 0x142);
    BTN_TOOL_PENCIL = (KEY, 0x143);
    BTN_TOOL_AIRBRUSH = (KEY, 0x144);
    BTN_TOOL_FINGER = (KEY, 0x145);
    BTN_TOOL_MOUSE = (KEY, 0x146);
    BTN_TOOL_LENS = (KEY, 0x147);
    BTN_STYLUS3 = (KEY, 0x149);
    BTN_TOUCH = (KEY, 0x14a);
    BTN_STYLUS = (KEY, 0x14b);
    BTN_STYLUS2 = (KEY, 0x14c);
    BTN_TOOL_DOUBLETAP = (KEY, 0x14d);
    BTN_TOOL_TRIPLETAP = (KEY, 0x14e);
    BTN_TOOL_QUADTAP = (KEY, 0x14f);

    REL_X = (REL, 0x00);
    REL_Y = (REL, 0x01);
    REL_HWHEEL = (REL, 0x06);
    REL_DIAL = (REL, 0x07);
    REL_WHEEL = (REL, 0x08);
    REL_WHEEL_HI_RES = (REL, 0x0b);
    REL_HWHEEL_HI_RES = (REL, 0x0c);

    ABS_X = (ABS, 0x00);
    ABS_Y = (ABS, 0x01);
    ABS_Z = (ABS, 0x02);
    ABS_WHEEL = (ABS, 0x08);
    ABS_PRESSURE = (ABS, 0x18);
    ABS_DISTANCE = (ABS, 0x19);
    ABS_TILT_X = (ABS, 0x1a);
    ABS_TILT_Y = (ABS, 0x1b);
    ABS_MISC = (ABS, 0x28);

    MSC_SERIAL = (MSC, 0x00);
    MSC_SCAN = (MSC, 0x04);
    MSC_TIMESTAMP = (MSC, 0x05);

    SW_LID = (SW, 0x00);
    SW_TABLET_MODE = (SW, 0x01);
}

impl Usage {
    /// Creates a [`Usage`] from an event type and a raw code within that type.
    #[inline]
    pub const fn new(ty: EventType, code: u16) -> Self {
        Self((ty.0 as u32) << 16 | code as u32)
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the [`EventType`] encoded in the upper 16 bits.
    #[inline]
    pub const fn event_type(self) -> EventType {
        EventType((self.0 >> 16) as u16)
    }

    /// Returns the event code encoded in the lower 16 bits.
    #[inline]
    pub const fn code(self) -> u16 {
        self.0 as u16
    }

    #[inline]
    pub fn from_key(key: Key) -> Self {
        Self::new(EventType::KEY, key.raw())
    }

    #[inline]
    pub fn from_rel(rel: Rel) -> Self {
        Self::new(EventType::REL, rel.raw())
    }

    #[inline]
    pub fn from_abs(abs: Abs) -> Self {
        Self::new(EventType::ABS, abs.raw())
    }

    /// Whether this usage is a pointer button (`BTN_LEFT`..`BTN_TASK` or the
    /// `BTN_0` block).
    pub fn is_button(self) -> bool {
        self.event_type() == EventType::KEY
            && matches!(self.code(), 0x100..=0x109 | 0x110..=0x117)
    }
}

impl fmt::Debug for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.event_type() {
            EventType::SYN => Syn(self.code()).fmt(f),
            EventType::KEY => Key(self.code()).fmt(f),
            EventType::REL => Rel(self.code()).fmt(f),
            EventType::ABS => Abs(self.code()).fmt(f),
            EventType::SW => Switch(self.code()).fmt(f),
            EventType::MSC => Misc(self.code()).fmt(f),
            _ => write!(f, "Usage({:#010x})", self.0),
        }
    }
}

/// A single input event: a [`Usage`] and its value.
///
/// The value is interpreted by usage: button state 0/1, relative delta,
/// absolute position, switch state, and so on.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub usage: Usage,
    pub value: i32,
}

impl Event {
    #[inline]
    pub const fn new(usage: Usage, value: i32) -> Self {
        Self { usage, value }
    }

    /// The frame terminator.
    #[inline]
    pub const fn syn_report() -> Self {
        Self::new(Usage::SYN_REPORT, 0)
    }

    #[inline]
    pub fn is_syn_report(&self) -> bool {
        self.usage == Usage::SYN_REPORT
    }

    /// Converts to the kernel wire format, stamping the given frame time.
    pub fn to_input_event(&self, time: u64) -> InputEvent {
        InputEvent(input_event {
            time: us2tv(time),
            type_: self.usage.event_type().raw(),
            code: self.usage.code(),
            value: self.value,
        })
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} = {}", self.usage, self.value)
    }
}

/// An input event in the kernel's wire format.
///
/// This is what a device node `read(2)` yields, one per 24 bytes (on 64-bit).
/// The pipeline converts these into [`Event`]s on entry and back on exit;
/// both directions are bit-exact for every legal type/code/value triple.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct InputEvent(pub(crate) input_event);

impl InputEvent {
    /// Creates an [`InputEvent`] from raw values with a timestamp of 0.
    #[inline]
    pub const fn new(ty: EventType, raw_code: u16, raw_value: i32) -> Self {
        Self(input_event {
            time: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            type_: ty.0,
            code: raw_code,
            value: raw_value,
        })
    }

    /// Returns a copy of `self` with the timestamp set to the given monotonic
    /// microsecond value.
    #[inline]
    pub fn with_time(mut self, time: u64) -> Self {
        self.0.time = us2tv(time);
        self
    }

    /// Returns the timestamp in monotonic microseconds.
    #[inline]
    pub fn time(&self) -> u64 {
        tv2us(&self.0.time)
    }

    #[inline]
    pub fn event_type(&self) -> EventType {
        EventType(self.0.type_)
    }

    #[inline]
    pub fn raw_code(&self) -> u16 {
        self.0.code
    }

    #[inline]
    pub fn raw_value(&self) -> i32 {
        self.0.value
    }

    /// Returns the [`Usage`] this event encodes.
    #[inline]
    pub fn usage(&self) -> Usage {
        Usage::new(self.event_type(), self.raw_code())
    }
}

impl From<InputEvent> for Event {
    #[inline]
    fn from(ev: InputEvent) -> Self {
        Event::new(ev.usage(), ev.raw_value())
    }
}

impl fmt::Debug for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputEvent")
            .field("time", &self.time())
            .field("usage", &self.usage())
            .field("value", &self.raw_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_packing() {
        let usage = Usage::new(EventType::KEY, 0x110);
        assert_eq!(usage.raw(), 0x1 << 16 | 0x110);
        assert_eq!(usage, Usage::BTN_LEFT);
        assert_eq!(usage.event_type(), EventType::KEY);
        assert_eq!(usage.code(), 0x110);

        assert_eq!(Usage::SYN_REPORT.raw(), 0);
        assert_eq!(Usage::ABS_X.raw(), 0x3 << 16);
        assert_eq!(Usage::REL_WHEEL.raw(), 0x2 << 16 | 8);
    }

    #[test]
    fn is_button() {
        assert!(Usage::BTN_LEFT.is_button());
        assert!(Usage::BTN_TASK.is_button());
        assert!(Usage::BTN_0.is_button());
        assert!(!Usage::BTN_TOOL_PEN.is_button());
        assert!(!Usage::BTN_TOUCH.is_button());
        assert!(!Usage::REL_X.is_button());
        // same code as BTN_LEFT, different type
        assert!(!Usage::new(EventType::ABS, 0x110).is_button());
    }

    #[test]
    fn input_event_round_trip() {
        for (ty, code, value) in [
            (EventType::SYN, 0, 0),
            (EventType::KEY, 0x110, 1),
            (EventType::REL, 8, -3),
            (EventType::ABS, 0x18, i32::MAX),
            (EventType::MSC, 4, i32::MIN),
            (EventType::from_raw(0x7fff), 0xffff, -1),
        ] {
            let raw = InputEvent::new(ty, code, value).with_time(1_234_567);
            let ev = Event::from(raw);
            assert_eq!(ev.to_input_event(1_234_567), raw);
        }
    }

    #[test]
    fn timestamps() {
        let ev = InputEvent::new(EventType::KEY, 0x110, 1).with_time(2_000_001);
        assert_eq!(ev.0.time.tv_sec, 2);
        assert_eq!(ev.0.time.tv_usec, 1);
        assert_eq!(ev.time(), 2_000_001);
    }
}
