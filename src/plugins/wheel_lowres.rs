//! High-resolution scroll emulation for wheels that only report clicks.
//!
//! One wheel click is 120 hi-res units.

use crate::{
    device::Device,
    event::Usage,
    frame::EvdevFrame,
    plugin::{Plugin, PluginContext},
};

const WHEEL_CLICK_HI_RES: i32 = 120;

/// Emulates `REL_WHEEL_HI_RES`/`REL_HWHEEL_HI_RES` on devices that predate
/// them.
#[derive(Debug, Default)]
pub struct WheelLowresPlugin {
    _priv: (),
}

impl WheelLowresPlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Plugin for WheelLowresPlugin {
    fn device_new(&mut self, ctx: &mut PluginContext, device: &Device) {
        if device.has_usage(Usage::REL_WHEEL_HI_RES) || device.has_usage(Usage::REL_HWHEEL_HI_RES)
        {
            return;
        }

        let has_wheel = device.has_usage(Usage::REL_WHEEL);
        let has_hwheel = device.has_usage(Usage::REL_HWHEEL);
        if !has_wheel && !has_hwheel {
            return;
        }

        log::info!("{}: emulating high-resolution scroll wheel events", device.name());

        if has_wheel {
            device.enable_usage(Usage::REL_WHEEL_HI_RES);
        }
        if has_hwheel {
            device.enable_usage(Usage::REL_HWHEEL_HI_RES);
        }

        ctx.enable_frame_events(device, true);
    }

    fn evdev_frame(&mut self, _: &mut PluginContext, _: &Device, frame: &mut EvdevFrame) {
        let mut filtered = EvdevFrame::new(frame.count() + 2);
        for event in frame.payload() {
            match event.usage {
                // A device with the hi-res axes disabled via quirks may still
                // send hi-res events; since we re-enabled the axes above,
                // keeping them would duplicate every scroll.
                Usage::REL_WHEEL_HI_RES | Usage::REL_HWHEEL_HI_RES => {}
                Usage::REL_WHEEL => {
                    let _ = filtered.append(std::slice::from_ref(event));
                    let _ = filtered
                        .append_one(Usage::REL_WHEEL_HI_RES, event.value * WHEEL_CLICK_HI_RES);
                }
                Usage::REL_HWHEEL => {
                    let _ = filtered.append(std::slice::from_ref(event));
                    let _ = filtered
                        .append_one(Usage::REL_HWHEEL_HI_RES, event.value * WHEEL_CLICK_HI_RES);
                }
                _ => {
                    let _ = filtered.append(std::slice::from_ref(event));
                }
            }
        }

        let _ = frame.set(filtered.events());
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use crate::{
        device::{DeviceBuilder, DeviceCapability},
        event::Event,
        system::PluginSystem,
    };

    use super::*;

    fn harness(
        native_hi_res: bool,
    ) -> (
        PluginSystem,
        Device,
        Rc<RefCell<Vec<Vec<(Usage, i32)>>>>,
    ) {
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
        system.register("mouse-wheel-lowres", WheelLowresPlugin::new());

        let mut builder = DeviceBuilder::new("test mouse", "event0")
            .capability(DeviceCapability::POINTER)
            .usage(Usage::REL_WHEEL);
        if native_hi_res {
            builder = builder.usage(Usage::REL_WHEEL_HI_RES);
        }
        let device = builder.build();
        system.device_new(&device);
        system.device_added(&device);

        (system, device, emitted)
    }

    fn wheel_frame(events: &[(Usage, i32)]) -> EvdevFrame {
        let mut frame = EvdevFrame::new(64);
        for (usage, value) in events {
            frame.append_one(*usage, *value).unwrap();
        }
        frame.set_time(1000);
        frame
    }

    #[test]
    fn lowres_clicks_gain_hi_res_events() {
        let (mut system, device, emitted) = harness(false);
        assert!(device.has_usage(Usage::REL_WHEEL_HI_RES));

        system.dispatch(&device, wheel_frame(&[(Usage::REL_WHEEL, -2)]));
        assert_eq!(
            *emitted.borrow(),
            vec![vec![
                (Usage::REL_WHEEL, -2),
                (Usage::REL_WHEEL_HI_RES, -240),
            ]]
        );
    }

    #[test]
    fn stray_hi_res_events_are_filtered() {
        let (mut system, device, emitted) = harness(false);
        system.dispatch(
            &device,
            wheel_frame(&[(Usage::REL_WHEEL, 1), (Usage::REL_WHEEL_HI_RES, 120)]),
        );

        assert_eq!(
            *emitted.borrow(),
            vec![vec![(Usage::REL_WHEEL, 1), (Usage::REL_WHEEL_HI_RES, 120)]]
        );
    }

    #[test]
    fn native_hi_res_devices_are_left_alone() {
        let (mut system, device, emitted) = harness(true);

        let mut frame = EvdevFrame::new(8);
        frame
            .append(&[
                Event::new(Usage::REL_WHEEL, 1),
                Event::new(Usage::REL_WHEEL_HI_RES, 120),
            ])
            .unwrap();
        frame.set_time(1000);
        system.dispatch(&device, frame);

        assert_eq!(
            *emitted.borrow(),
            vec![vec![(Usage::REL_WHEEL, 1), (Usage::REL_WHEEL_HI_RES, 120)]]
        );
    }
}
