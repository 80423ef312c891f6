//! Event types, codes, axis and button identifiers, etc.
//!
//! Mostly ported from `linux/input-event-codes.h`. This is not the full kernel
//! vocabulary, only the codes the pipeline and its plugins refer to by name;
//! unknown codes still round-trip through [`Usage`][super::Usage] unharmed.

use std::{error::Error, fmt, io, str::FromStr};

ffi_enum! {
    /// Types of input events.
    pub enum EventType: u16 {
        /// Synchronization event, delimits event frames.
        SYN = 0x00,
        /// A key or button press/release.
        KEY = 0x01,
        /// A relative axis movement.
        REL = 0x02,
        /// An absolute axis change.
        ABS = 0x03,
        /// A miscellaneous event.
        MSC = 0x04,
        /// A switch changed state.
        SW  = 0x05,
        /// An LED changed state.
        LED = 0x11,
        /// A sound started or stopped playing.
        SND = 0x12,
        /// The autorepeat settings have changed.
        REP = 0x14,
        /// Force-feedback control.
        FF  = 0x15,
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "EV_{name}"),
            None => write!(f, "EventType({:#x})", self.0),
        }
    }
}

impl EventType {
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }
}

ffi_enum! {
    /// Synchronization event codes.
    ///
    /// The *value* of a `SYN` event is unspecified; only its position in the
    /// event stream and its code matter.
    pub enum Syn: u16 {
        /// Marks the end of a group of events belonging together.
        REPORT = 0,
        CONFIG = 1,
        /// Unused. Used to be used for the legacy ("type A") multitouch protocol.
        MT_REPORT = 2,
        /// Indicates that one or more events were dropped due to overflow.
        DROPPED = 3,
    }
}

impl fmt::Debug for Syn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "SYN_{name}"),
            None => write!(f, "Syn({:#x})", self.0),
        }
    }
}

impl Syn {
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }
}

/// Error returned by [`FromStr`] implementations when no matching variant was found.
///
/// Indicates that the supplied string does not refer to a known code constant.
#[derive(Debug, PartialEq, Eq)]
pub struct UnknownVariant {
    _p: (),
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown variant name")
    }
}
impl Error for UnknownVariant {}
impl From<UnknownVariant> for io::Error {
    fn from(value: UnknownVariant) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value)
    }
}

ffi_enum! {
    /// An *evdev* key or button identifier.
    ///
    /// This type has associated constants mimicking the preprocessor constants
    /// defined in `linux/input.h`, limited to the codes the pipeline cares
    /// about. [`Key`]s use the name of the constant when formatting with
    /// `Debug`, if a matching constant exists.
    pub enum Key: u16 {
        KEY_RESERVED = 0,
        KEY_ESC      = 1,
        KEY_MICMUTE  = 248,

        BTN_0 = 0x100,
        BTN_1 = 0x101,
        BTN_2 = 0x102,
        BTN_3 = 0x103,
        BTN_4 = 0x104,
        BTN_5 = 0x105,
        BTN_6 = 0x106,
        BTN_7 = 0x107,
        BTN_8 = 0x108,
        BTN_9 = 0x109,

        BTN_LEFT    = 0x110,
        BTN_RIGHT   = 0x111,
        BTN_MIDDLE  = 0x112,
        BTN_SIDE    = 0x113,
        BTN_EXTRA   = 0x114,
        BTN_FORWARD = 0x115,
        BTN_BACK    = 0x116,
        BTN_TASK    = 0x117,

        BTN_TOOL_PEN       = 0x140,
        BTN_TOOL_RUBBER    = 0x141,
        BTN_TOOL_BRUSH     = 0x142,
        BTN_TOOL_PENCIL    = 0x143,
        BTN_TOOL_AIRBRUSH  = 0x144,
        BTN_TOOL_FINGER    = 0x145,
        BTN_TOOL_MOUSE     = 0x146,
        BTN_TOOL_LENS      = 0x147,
        BTN_TOOL_QUINTTAP  = 0x148,
        BTN_STYLUS3        = 0x149,
        BTN_TOUCH          = 0x14a,
        BTN_STYLUS         = 0x14b,
        BTN_STYLUS2        = 0x14c,
        BTN_TOOL_DOUBLETAP = 0x14d,
        BTN_TOOL_TRIPLETAP = 0x14e,
        BTN_TOOL_QUADTAP   = 0x14f,

        KEY_MAX = 0x2ff,
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Key({:#x})", self.0),
        }
    }
}

impl FromStr for Key {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_variant_name(s).ok_or(UnknownVariant { _p: () })
    }
}

impl Key {
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }
}

ffi_enum! {
    /// A relative axis identifier.
    pub enum Rel: u16 {
        X             = 0x00,
        Y             = 0x01,
        Z             = 0x02,
        RX            = 0x03,
        RY            = 0x04,
        RZ            = 0x05,
        HWHEEL        = 0x06,
        DIAL          = 0x07,
        WHEEL         = 0x08,
        MISC          = 0x09,
        WHEEL_HI_RES  = 0x0b,
        HWHEEL_HI_RES = 0x0c,
        MAX           = 0x0f,
    }
}

impl fmt::Debug for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "REL_{name}"),
            None => write!(f, "Rel({:#x})", self.0),
        }
    }
}

impl Rel {
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }
}

ffi_enum! {
    /// An absolute axis identifier.
    pub enum Abs: u16 {
        X        = 0x00,
        Y        = 0x01,
        Z        = 0x02,
        RX       = 0x03,
        RY       = 0x04,
        RZ       = 0x05,
        THROTTLE = 0x06,
        RUDDER   = 0x07,
        WHEEL    = 0x08,
        PRESSURE = 0x18,
        DISTANCE = 0x19,
        TILT_X   = 0x1a,
        TILT_Y   = 0x1b,
        MISC     = 0x28,

        MT_SLOT        = 0x2f,
        MT_TOUCH_MAJOR = 0x30,
        MT_TOUCH_MINOR = 0x31,
        MT_ORIENTATION = 0x34,
        MT_POSITION_X  = 0x35,
        MT_POSITION_Y  = 0x36,
        MT_TOOL_TYPE   = 0x37,
        MT_TRACKING_ID = 0x39,
        MT_PRESSURE    = 0x3a,
        MT_DISTANCE    = 0x3b,

        MAX = 0x3f,
    }
}

impl fmt::Debug for Abs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "ABS_{name}"),
            None => write!(f, "Abs({:#x})", self.0),
        }
    }
}

impl Abs {
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }
}

ffi_enum! {
    /// A switch identifier.
    pub enum Switch: u16 {
        LID         = 0x00,
        TABLET_MODE = 0x01,
        MAX         = 0x10,
    }
}

impl fmt::Debug for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "SW_{name}"),
            None => write!(f, "Switch({:#x})", self.0),
        }
    }
}

impl Switch {
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }
}

ffi_enum! {
    /// A miscellaneous event code.
    pub enum Misc: u16 {
        SERIAL    = 0x00,
        SCAN      = 0x04,
        TIMESTAMP = 0x05,
        MAX       = 0x07,
    }
}

impl fmt::Debug for Misc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "MSC_{name}"),
            None => write!(f, "Misc({:#x})", self.0),
        }
    }
}

impl Misc {
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }
}
