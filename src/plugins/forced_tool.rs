//! Handling for tablets that never set BTN_TOOL_PEN.
//!
//! Such tablets only report axis data. When an axis event arrives while no
//! tool bit is set, a pen-in-proximity event is forced into the frame.

use bitflags::bitflags;

use crate::{
    device::{Device, DeviceCapability},
    event::Usage,
    frame::EvdevFrame,
    plugin::{Plugin, PluginContext},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct ToolState: u8 {
        const PEN      = 1 << 0;
        const RUBBER   = 1 << 1;
        const BRUSH    = 1 << 2;
        const PENCIL   = 1 << 3;
        const AIRBRUSH = 1 << 4;
        const MOUSE    = 1 << 5;
        const LENS     = 1 << 6;
    }
}

fn tool_bit(usage: Usage) -> Option<ToolState> {
    match usage {
        Usage::BTN_TOOL_PEN => Some(ToolState::PEN),
        Usage::BTN_TOOL_RUBBER => Some(ToolState::RUBBER),
        Usage::BTN_TOOL_BRUSH => Some(ToolState::BRUSH),
        Usage::BTN_TOOL_PENCIL => Some(ToolState::PENCIL),
        Usage::BTN_TOOL_AIRBRUSH => Some(ToolState::AIRBRUSH),
        Usage::BTN_TOOL_MOUSE => Some(ToolState::MOUSE),
        Usage::BTN_TOOL_LENS => Some(ToolState::LENS),
        _ => None,
    }
}

#[derive(Debug)]
struct ForcedToolDevice {
    device: Device,
    tool_state: ToolState,
}

impl ForcedToolDevice {
    fn handle_frame(&mut self, frame: &mut EvdevFrame) {
        let mut axis_change = false;

        for event in frame.payload() {
            if let Some(bit) = tool_bit(event.usage) {
                self.tool_state.set(bit, event.value == 1);
                // The frame announces a tool itself, nothing to do.
                return;
            }

            match event.usage {
                Usage::ABS_X
                | Usage::ABS_Y
                | Usage::ABS_Z // rotation
                // not ABS_DISTANCE!
                | Usage::ABS_PRESSURE
                | Usage::ABS_TILT_X
                | Usage::ABS_TILT_Y
                | Usage::ABS_WHEEL // slider
                | Usage::REL_WHEEL => {
                    // No early return here, the BTN_TOOL updates may come
                    // after the axis events.
                    axis_change = true;
                }
                _ => {}
            }
        }

        if !axis_change || !self.tool_state.is_empty() {
            return;
        }

        // An axis event means the stylus is definitely in proximity; force a
        // BTN_TOOL_PEN. Pure button events are left alone.
        let _ = frame.append_one(Usage::BTN_TOOL_PEN, 1);
    }
}

/// Synthesizes pen proximity for tablets that report axes without tool bits.
#[derive(Debug, Default)]
pub struct ForcedToolPlugin {
    devices: Vec<ForcedToolDevice>,
}

impl ForcedToolPlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Plugin for ForcedToolPlugin {
    fn device_added(&mut self, ctx: &mut PluginContext, device: &Device) {
        if !device.has_capability(DeviceCapability::TABLET_TOOL) {
            return;
        }

        ctx.enable_frame_events(device, true);
        self.devices.push(ForcedToolDevice {
            device: device.clone(),
            tool_state: ToolState::default(),
        });
    }

    fn device_removed(&mut self, _: &mut PluginContext, device: &Device) {
        self.devices.retain(|rec| rec.device != *device);
    }

    fn evdev_frame(&mut self, _: &mut PluginContext, device: &Device, frame: &mut EvdevFrame) {
        if let Some(rec) = self.devices.iter_mut().find(|rec| rec.device == *device) {
            rec.handle_frame(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use crate::{device::DeviceBuilder, system::PluginSystem};

    use super::*;

    struct Harness {
        system: PluginSystem,
        device: Device,
        emitted: Rc<RefCell<Vec<Vec<(Usage, i32)>>>>,
    }

    impl Harness {
        fn new() -> Self {
            let emitted = Rc::new(RefCell::new(Vec::new()));
            let sink = {
                let emitted = emitted.clone();
                move |_: &Device, frame: &EvdevFrame| {
                    emitted.borrow_mut().push(
                        frame
                            .payload()
                            .iter()
                            .map(|ev| (ev.usage, ev.value))
                            .collect(),
                    );
                }
            };

            let mut system = PluginSystem::new();
            system.set_sink(sink);
            system.register("tablet-forced-tool", ForcedToolPlugin::new());

            let device = DeviceBuilder::new("test tablet", "event2")
                .capability(DeviceCapability::TABLET_TOOL)
                .usage(Usage::ABS_X)
                .usage(Usage::ABS_Y)
                .build();
            system.device_new(&device);
            system.device_added(&device);

            Self {
                system,
                device,
                emitted,
            }
        }

        fn frame(&mut self, events: &[(Usage, i32)], time_ms: u64) {
            let mut frame = EvdevFrame::new(64);
            for (usage, value) in events {
                frame.append_one(*usage, *value).unwrap();
            }
            frame.set_time(time_ms * 1000);
            self.system.dispatch(&self.device, frame);
        }

        fn emitted(&self) -> Vec<Vec<(Usage, i32)>> {
            self.emitted.borrow().clone()
        }
    }

    #[test]
    fn axis_without_tool_forces_pen() {
        // A frame with only an ABS_X change on a device that never set a
        // tool bit.
        let mut h = Harness::new();
        h.frame(&[(Usage::ABS_X, 500)], 0);

        assert_eq!(
            h.emitted(),
            vec![vec![(Usage::ABS_X, 500), (Usage::BTN_TOOL_PEN, 1)]]
        );
    }

    #[test]
    fn announced_tools_are_respected() {
        let mut h = Harness::new();
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 1)], 0);
        h.frame(&[(Usage::ABS_X, 500)], 10);

        // The eraser is in proximity, no pen is synthesized.
        assert_eq!(
            h.emitted(),
            vec![
                vec![(Usage::BTN_TOOL_RUBBER, 1)],
                vec![(Usage::ABS_X, 500)],
            ]
        );

        // After the eraser leaves, axis events force the pen again.
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 0)], 20);
        h.frame(&[(Usage::ABS_Y, 300)], 30);
        assert_eq!(
            h.emitted().last().unwrap(),
            &vec![(Usage::ABS_Y, 300), (Usage::BTN_TOOL_PEN, 1)]
        );
    }

    #[test]
    fn distance_and_buttons_do_not_force_a_tool() {
        let mut h = Harness::new();
        h.frame(&[(Usage::ABS_DISTANCE, 10)], 0);
        h.frame(&[(Usage::BTN_STYLUS, 1)], 10);

        assert_eq!(
            h.emitted(),
            vec![
                vec![(Usage::ABS_DISTANCE, 10)],
                vec![(Usage::BTN_STYLUS, 1)],
            ]
        );
    }
}
