use std::fmt::{self, LowerHex};

/// Input device identity: bus type plus vendor/product/version numbers.
///
/// Virtual devices and devices exported by other subsystems often leave all
/// of this zeroed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InputId {
    bus: Bus,
    vendor: u16,
    product: u16,
    version: u16,
}

impl InputId {
    /// Creates an [`InputId`] from its components.
    #[inline]
    pub const fn new(bus: Bus, vendor: u16, product: u16, version: u16) -> Self {
        Self {
            bus,
            vendor,
            product,
            version,
        }
    }

    /// Returns the bus type this device is attached to the system with.
    ///
    /// This is often left as `0` for virtual devices.
    #[inline]
    pub fn bus(&self) -> Bus {
        self.bus
    }

    /// Returns the vendor ID.
    #[inline]
    pub fn vendor(&self) -> u16 {
        self.vendor
    }

    /// Returns the product ID.
    #[inline]
    pub fn product(&self) -> u16 {
        self.product
    }

    /// The device or transport version.
    #[inline]
    pub fn version(&self) -> u16 {
        self.version
    }
}

impl Default for InputId {
    fn default() -> Self {
        Self::new(Bus(0), 0, 0, 0)
    }
}

impl fmt::Debug for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Hex<T: LowerHex>(T);
        impl<T: LowerHex> fmt::Debug for Hex<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#06x}", self.0)
            }
        }

        f.debug_struct("InputId")
            .field("bustype", &self.bus())
            .field("vendor", &Hex(self.vendor()))
            .field("product", &Hex(self.product()))
            .field("version", &Hex(self.version()))
            .finish()
    }
}

ffi_enum! {
    /// Bus types that devices can be attached to the system with.
    pub enum Bus: u16 {
        PCI         = 0x01,
        ISAPNP      = 0x02,
        USB         = 0x03,
        HIL         = 0x04,
        BLUETOOTH   = 0x05,
        VIRTUAL     = 0x06,
        ISA         = 0x10,
        I8042       = 0x11,
        XTKBD       = 0x12,
        RS232       = 0x13,
        GAMEPORT    = 0x14,
        PARPORT     = 0x15,
        AMIGA       = 0x16,
        ADB         = 0x17,
        I2C         = 0x18,
        HOST        = 0x19,
        GSC         = 0x1A,
        ATARI       = 0x1B,
        SPI         = 0x1C,
        RMI         = 0x1D,
        CEC         = 0x1E,
        INTEL_ISHTP = 0x1F,
        AMD_SFH     = 0x20,
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_name() {
            Some(name) => write!(f, "BUS_{name}"),
            None => write!(f, "Bus({:#x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_debug() {
        assert_eq!(format!("{:?}", Bus::USB), "BUS_USB");
        assert_eq!(format!("{:?}", Bus(0xffff)), "Bus(0xffff)");
    }
}
