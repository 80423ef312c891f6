//! Disambiguation for tablets that report two tool bits at once.
//!
//! Kernel tools are supposed to be mutually exclusive, but firmware bugs can
//! leave two bits set. Two shapes seen in the wild:
//!
//! - BTN_TOOL_PEN on proximity in, followed by BTN_TOOL_RUBBER later: force a
//!   prox-out of the pen and trigger prox-in for the eraser.
//! - BTN_TOOL_RUBBER on proximity in, but BTN_TOOL_PEN when the tip goes
//!   down: ignore BTN_TOOL_PEN.
//!
//! In both cases the eraser is what the user is holding, so we bias towards
//! it.

use bitflags::bitflags;

use crate::{
    device::{Device, DeviceCapability},
    event::Usage,
    frame::EvdevFrame,
    plugin::{Plugin, PluginContext},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct ToolsSeen: u8 {
        const PEN_DOWN    = 1 << 0;
        const PEN_UP      = 1 << 1;
        const ERASER_DOWN = 1 << 2;
        const ERASER_UP   = 1 << 3;
        const DOUBLE      = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct ToolFilter: u8 {
        const PEN_IN_PROX        = 1 << 0;
        const PEN_OUT_OF_PROX    = 1 << 1;
        const ERASER_IN_PROX     = 1 << 2;
        const ERASER_OUT_OF_PROX = 1 << 3;
    }
}

#[derive(Debug)]
struct DoubleToolDevice {
    device: Device,
    ignore_pen: bool,
    tools_seen: ToolsSeen,
    pen_value: i32,
    eraser_value: i32,
}

/// Copies a frame, stripping both tool bits and appending the ones requested
/// by `filter`.
fn filter_frame(frame: &EvdevFrame, filter: ToolFilter) -> EvdevFrame {
    let mut out = EvdevFrame::new(frame.count() + 2);
    out.set_time(frame.time());

    for event in frame.payload() {
        match event.usage {
            Usage::BTN_TOOL_PEN | Usage::BTN_TOOL_RUBBER => {}
            _ => {
                let _ = out.append(std::slice::from_ref(event));
            }
        }
    }

    if filter.intersects(ToolFilter::PEN_IN_PROX | ToolFilter::PEN_OUT_OF_PROX) {
        let value = filter.contains(ToolFilter::PEN_IN_PROX) as i32;
        let _ = out.append_one(Usage::BTN_TOOL_PEN, value);
    }
    if filter.intersects(ToolFilter::ERASER_IN_PROX | ToolFilter::ERASER_OUT_OF_PROX) {
        let value = filter.contains(ToolFilter::ERASER_IN_PROX) as i32;
        let _ = out.append_one(Usage::BTN_TOOL_RUBBER, value);
    }

    out
}

impl DoubleToolDevice {
    /// Returns false once the device has proven itself well-behaved and the
    /// record should be dropped.
    fn handle_frame(&mut self, ctx: &mut PluginContext, frame: &mut EvdevFrame) -> bool {
        let mut eraser_toggled = false;
        let mut pen_toggled = false;

        for event in frame.payload() {
            match event.usage {
                Usage::BTN_TOOL_RUBBER => {
                    eraser_toggled = true;
                    self.eraser_value = event.value;
                }
                Usage::BTN_TOOL_PEN => {
                    pen_toggled = true;
                    self.pen_value = event.value;
                }
                _ => {}
            }
        }

        let eraser_is_down = self.eraser_value != 0;
        let pen_is_down = self.pen_value != 0;

        if !self.tools_seen.contains(ToolsSeen::DOUBLE) {
            if eraser_toggled {
                self.tools_seen |= if eraser_is_down {
                    ToolsSeen::ERASER_DOWN
                } else {
                    ToolsSeen::ERASER_UP
                };
            }
            if pen_toggled {
                self.tools_seen |= if pen_is_down {
                    ToolsSeen::PEN_DOWN
                } else {
                    ToolsSeen::PEN_UP
                };
            }

            // All four tool events without a doubled-up tool: the device is
            // sane, stop watching it.
            let clean = ToolsSeen::PEN_DOWN
                | ToolsSeen::PEN_UP
                | ToolsSeen::ERASER_DOWN
                | ToolsSeen::ERASER_UP;
            if self.tools_seen.contains(clean) {
                log::debug!(
                    "{}: device is fine, unregistering device",
                    self.device.name(),
                );
                return false;
            }
        }

        // Eraser bit after the pen bit.
        if eraser_toggled {
            if eraser_is_down && pen_is_down {
                if !pen_toggled {
                    let pen_out = filter_frame(frame, ToolFilter::PEN_OUT_OF_PROX);
                    ctx.prepend_frame(&self.device, pen_out);
                }

                let eraser_in = filter_frame(frame, ToolFilter::ERASER_IN_PROX);
                ctx.prepend_frame(&self.device, eraser_in);
                self.ignore_pen = true;
                self.tools_seen |= ToolsSeen::DOUBLE;

                frame.reset();
                return true;
            } else if !eraser_is_down {
                let eraser_out = filter_frame(frame, ToolFilter::ERASER_OUT_OF_PROX);
                ctx.prepend_frame(&self.device, eraser_out);

                // Only revert back to the pen if the pen was actually toggled
                // in this frame, otherwise it's just still set from before.
                if pen_toggled && pen_is_down {
                    let pen_in = filter_frame(frame, ToolFilter::PEN_IN_PROX);
                    ctx.prepend_frame(&self.device, pen_in);
                }

                self.ignore_pen = false;

                frame.reset();
                return true;
            }
        }

        // Pen bit after the eraser bit.
        if pen_toggled && eraser_is_down {
            self.ignore_pen = true;
        }

        if self.ignore_pen {
            let stripped = filter_frame(frame, ToolFilter::empty());
            let _ = frame.set(stripped.events());
            self.tools_seen |= ToolsSeen::DOUBLE;
        } else if pen_is_down {
            let normalized = filter_frame(frame, ToolFilter::PEN_IN_PROX);
            let _ = frame.set(normalized.events());
        }

        true
    }
}

/// Biases tablets with contradictory tool bits towards the eraser.
#[derive(Debug, Default)]
pub struct DoubleToolPlugin {
    devices: Vec<DoubleToolDevice>,
}

impl DoubleToolPlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Plugin for DoubleToolPlugin {
    fn device_added(&mut self, ctx: &mut PluginContext, device: &Device) {
        if !device.has_capability(DeviceCapability::TABLET_TOOL) {
            return;
        }

        ctx.enable_frame_events(device, true);
        self.devices.push(DoubleToolDevice {
            device: device.clone(),
            ignore_pen: false,
            tools_seen: ToolsSeen::default(),
            pen_value: 0,
            eraser_value: 0,
        });
    }

    fn device_removed(&mut self, _: &mut PluginContext, device: &Device) {
        self.devices.retain(|rec| rec.device != *device);
    }

    fn evdev_frame(&mut self, ctx: &mut PluginContext, device: &Device, frame: &mut EvdevFrame) {
        if let Some(idx) = self.devices.iter().position(|rec| rec.device == *device) {
            if !self.devices[idx].handle_frame(ctx, frame) {
                self.devices.swap_remove(idx);
                ctx.enable_frame_events(device, false);
            }
        }
    }
}
