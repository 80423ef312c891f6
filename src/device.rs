//! Device handles shared between the discovery layer, the pipeline, and
//! plugins.
//!
//! Devices are created by whoever owns the event sources (via
//! [`DeviceBuilder`]) and announced to the pipeline with
//! [`PluginSystem::device_new`][crate::system::PluginSystem::device_new].
//! The lifecycle is strictly monotonic:
//! `device_new` → (`device_added` | `device_ignored`) → `device_removed`.
//!
//! A [`Device`] is a cheap clone; plugins hold strong references while they
//! track the device and drop them from their `device_removed` callback.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    rc::Rc,
};

use bitflags::bitflags;

use crate::{
    abs_info::AbsInfo,
    event::{Abs, Usage},
    input_id::InputId,
};

bitflags! {
    /// Coarse device classification, mirroring what the device dispatchers
    /// select on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceCapability: u32 {
        const POINTER     = 1 << 0;
        const KEYBOARD    = 1 << 1;
        const TOUCH       = 1 << 2;
        const TABLET_TOOL = 1 << 3;
        const TABLET_PAD  = 1 << 4;
        const GESTURE     = 1 << 5;
        const SWITCH      = 1 << 6;
    }
}

/// Quirk tags consumed by the pipeline. These arrive as opaque strings from
/// the external quirks database.
pub mod quirks {
    /// The hardware bounces and the kernel already debounces it.
    pub const MODEL_BOUNCING_KEYS: &str = "ModelBouncingKeys";
    /// The tablet needs the proximity-timer workaround unconditionally.
    pub const MODEL_FORCED_PROXIMITY_TIMER: &str = "ModelForcedProximityTimer";
}

/// Stable identifier of a device within one [`PluginSystem`].
///
/// Plugins key their per-device records by this instead of holding cyclic
/// references into the pipeline.
///
/// [`PluginSystem`]: crate::system::PluginSystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) u32);

struct DeviceInner {
    /// Assigned by the plugin system when the device is announced.
    id: Cell<u32>,
    name: String,
    sysname: String,
    input_id: InputId,
    capabilities: DeviceCapability,
    usages: RefCell<HashSet<Usage>>,
    absinfo: RefCell<HashMap<Abs, AbsInfo>>,
    udev_properties: BTreeMap<String, String>,
    quirks: HashSet<String>,
    /// Set once the device is fully added; usages and absinfo are frozen
    /// from then on.
    sealed: Cell<bool>,
}

/// An opaque, shared reference to an input device known to the system.
#[derive(Clone)]
pub struct Device {
    inner: Rc<DeviceInner>,
}

impl Device {
    /// The per-system id. Only valid after the device has been announced.
    #[inline]
    pub fn id(&self) -> DeviceId {
        DeviceId(self.inner.id.get())
    }

    pub(crate) fn assign_id(&self, id: DeviceId) {
        self.inner.id.set(id.0);
    }

    pub(crate) fn seal(&self) {
        self.inner.sealed.set(true);
    }

    /// The human-readable device name (what the kernel reports).
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The stable system name (e.g. `event3`).
    #[inline]
    pub fn sysname(&self) -> &str {
        &self.inner.sysname
    }

    #[inline]
    pub fn input_id(&self) -> InputId {
        self.inner.input_id
    }

    #[inline]
    pub fn capabilities(&self) -> DeviceCapability {
        self.inner.capabilities
    }

    #[inline]
    pub fn has_capability(&self, cap: DeviceCapability) -> bool {
        self.inner.capabilities.contains(cap)
    }

    pub fn has_usage(&self, usage: Usage) -> bool {
        self.inner.usages.borrow().contains(&usage)
    }

    /// All enabled usages, in no particular order.
    pub fn usages(&self) -> Vec<Usage> {
        self.inner.usages.borrow().iter().copied().collect()
    }

    /// Enables an event usage on the device.
    ///
    /// Only allowed before the device is fully added; afterwards this logs a
    /// bug and does nothing.
    pub fn enable_usage(&self, usage: Usage) {
        if self.inner.sealed.get() {
            log::error!(
                "bug: {}: attempt to enable {usage:?} after the device was added",
                self.name(),
            );
            return;
        }
        self.inner.usages.borrow_mut().insert(usage);
    }

    /// Disables an event usage on the device. Same sealing rule as
    /// [`Device::enable_usage`].
    pub fn disable_usage(&self, usage: Usage) {
        if self.inner.sealed.get() {
            log::error!(
                "bug: {}: attempt to disable {usage:?} after the device was added",
                self.name(),
            );
            return;
        }
        self.inner.usages.borrow_mut().remove(&usage);
    }

    pub fn abs_info(&self, abs: Abs) -> Option<AbsInfo> {
        self.inner.absinfo.borrow().get(&abs).copied()
    }

    /// All axes with absinfo, in code order.
    pub fn abs_axes(&self) -> Vec<(Abs, AbsInfo)> {
        let mut axes: Vec<_> = self
            .inner
            .absinfo
            .borrow()
            .iter()
            .map(|(abs, info)| (*abs, *info))
            .collect();
        axes.sort_by_key(|(abs, _)| abs.raw());
        axes
    }

    /// Overrides the absinfo of an axis. Same sealing rule as
    /// [`Device::enable_usage`].
    pub fn set_abs_info(&self, abs: Abs, info: AbsInfo) {
        if self.inner.sealed.get() {
            log::error!(
                "bug: {}: attempt to change {abs:?} absinfo after the device was added",
                self.name(),
            );
            return;
        }
        self.inner.absinfo.borrow_mut().insert(abs, info);
        self.inner
            .usages
            .borrow_mut()
            .insert(Usage::from_abs(abs));
    }

    /// Looks up a udev-style property.
    pub fn udev_property(&self, key: &str) -> Option<&str> {
        self.inner.udev_properties.get(key).map(String::as_str)
    }

    /// Whether a udev property is set to a true boolean value.
    pub fn udev_bool_property(&self, key: &str) -> bool {
        matches!(self.udev_property(key), Some("1"))
    }

    /// All udev-style properties, sorted by key.
    pub fn udev_properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .udev_properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the quirks database tagged this device with the given flag.
    pub fn has_quirk(&self, tag: &str) -> bool {
        self.inner.quirks.contains(tag)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id.get())
            .field("sysname", &self.sysname())
            .field("name", &self.name())
            .field("input_id", &self.input_id())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Builds a [`Device`] for announcing to the pipeline.
///
/// This is the entry point for the discovery layer (and the test suite).
#[derive(Debug)]
pub struct DeviceBuilder {
    name: String,
    sysname: String,
    input_id: InputId,
    capabilities: DeviceCapability,
    usages: HashSet<Usage>,
    absinfo: HashMap<Abs, AbsInfo>,
    udev_properties: BTreeMap<String, String>,
    quirks: HashSet<String>,
}

impl DeviceBuilder {
    pub fn new(name: &str, sysname: &str) -> Self {
        Self {
            name: name.to_owned(),
            sysname: sysname.to_owned(),
            input_id: InputId::default(),
            capabilities: DeviceCapability::empty(),
            usages: HashSet::new(),
            absinfo: HashMap::new(),
            udev_properties: BTreeMap::new(),
            quirks: HashSet::new(),
        }
    }

    pub fn input_id(mut self, id: InputId) -> Self {
        self.input_id = id;
        self
    }

    pub fn capability(mut self, cap: DeviceCapability) -> Self {
        self.capabilities |= cap;
        self
    }

    pub fn usage(mut self, usage: Usage) -> Self {
        self.usages.insert(usage);
        self
    }

    pub fn abs_axis(mut self, abs: Abs, info: AbsInfo) -> Self {
        self.absinfo.insert(abs, info);
        self.usages.insert(Usage::from_abs(abs));
        self
    }

    pub fn udev_property(mut self, key: &str, value: &str) -> Self {
        self.udev_properties.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn quirk(mut self, tag: &str) -> Self {
        self.quirks.insert(tag.to_owned());
        self
    }

    pub fn build(self) -> Device {
        Device {
            inner: Rc::new(DeviceInner {
                id: Cell::new(u32::MAX),
                name: self.name,
                sysname: self.sysname,
                input_id: self.input_id,
                capabilities: self.capabilities,
                usages: RefCell::new(self.usages),
                absinfo: RefCell::new(self.absinfo),
                udev_properties: self.udev_properties,
                quirks: self.quirks,
                sealed: Cell::new(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealing_freezes_usages() {
        let device = DeviceBuilder::new("test mouse", "event7")
            .capability(DeviceCapability::POINTER)
            .usage(Usage::BTN_LEFT)
            .build();

        device.enable_usage(Usage::REL_WHEEL_HI_RES);
        assert!(device.has_usage(Usage::REL_WHEEL_HI_RES));

        device.seal();
        device.enable_usage(Usage::REL_DIAL);
        assert!(!device.has_usage(Usage::REL_DIAL));
        device.disable_usage(Usage::BTN_LEFT);
        assert!(device.has_usage(Usage::BTN_LEFT));
    }

    #[test]
    fn udev_bool_properties() {
        let device = DeviceBuilder::new("touchpad", "event4")
            .udev_property("ID_INPUT_TOUCHPAD", "1")
            .udev_property("ID_INPUT_MOUSE", "0")
            .build();

        assert!(device.udev_bool_property("ID_INPUT_TOUCHPAD"));
        assert!(!device.udev_bool_property("ID_INPUT_MOUSE"));
        assert!(!device.udev_bool_property("ID_INPUT_TABLET"));
    }
}
