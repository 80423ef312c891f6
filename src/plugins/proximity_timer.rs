//! Proximity-out recovery for tablets that never send BTN_TOOL_PEN 0.
//!
//! Some tablets set BTN_TOOL_PEN once and leave it set even when the pen
//! leaves the detectable range, so the pen looks in-proximity forever. Such
//! tablets send events every couple of milliseconds while the pen is actually
//! in range: a timer armed on proximity-in and pushed out by activity detects
//! the silence and synthesizes the missing prox-out. The next event while the
//! forced-out latch is set synthesizes the matching prox-in.
//!
//! A tablet that ever sends a real BTN_TOOL_PEN 0, or that announces a
//! non-pen tool, is trustworthy and stops being watched.

use bitflags::bitflags;

use crate::{
    device::{Device, DeviceCapability},
    event::Usage,
    frame::EvdevFrame,
    plugin::{Plugin, PluginContext, TimerToken},
};

/// The tablet sends events every ~2ms, 50ms is plenty to detect
/// out-of-range.
const FORCED_PROXOUT_TIMEOUT: u64 = 50_000;

/// Timeout for test harnesses, to stop false positives caused by the forced
/// proximity code while a test is stepping slowly.
pub const FORCED_PROXOUT_TIMEOUT_FOR_TESTING: u64 = 150_000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct ButtonState: u8 {
        const STYLUS  = 1 << 0;
        const STYLUS2 = 1 << 1;
        const STYLUS3 = 1 << 2;
        const TOUCH   = 1 << 3;
    }
}

#[derive(Debug)]
struct ProximityTimerDevice {
    device: Device,
    proximity_out_forced: bool,
    last_event_time: u64,
    pen_state: bool,
    button_state: ButtonState,
    timeout: u64,
}

impl ProximityTimerDevice {
    fn set_timer(&self, ctx: &mut PluginContext, time: u64) {
        ctx.set_timer(TimerToken(self.device.id().0), time + self.timeout);
    }

    fn cancel_timer(&self, ctx: &mut PluginContext) {
        ctx.cancel_timer(TimerToken(self.device.id().0));
    }

    /// Returns false when the device proved trustworthy and the record
    /// should be dropped.
    fn handle_frame(&mut self, ctx: &mut PluginContext, frame: &mut EvdevFrame) -> bool {
        let time = frame.time();

        // First event after adding the device: by definition the pen is in
        // proximity if we hear anything at all.
        if self.last_event_time == 0 {
            self.set_timer(ctx, time);
        }
        self.last_event_time = time;

        let mut pen_toggled = false;

        for event in frame.payload() {
            match event.usage {
                Usage::BTN_STYLUS => self.button_state.set(ButtonState::STYLUS, event.value != 0),
                Usage::BTN_STYLUS2 => {
                    self.button_state.set(ButtonState::STYLUS2, event.value != 0)
                }
                Usage::BTN_STYLUS3 => {
                    self.button_state.set(ButtonState::STYLUS3, event.value != 0)
                }
                Usage::BTN_TOUCH => self.button_state.set(ButtonState::TOUCH, event.value != 0),
                Usage::BTN_TOOL_PEN => {
                    pen_toggled = true;
                    self.pen_state = event.value == 1;
                }
                // The proximity timeout is only needed for BTN_TOOL_PEN;
                // devices that require it don't do other tools.
                Usage::BTN_TOOL_RUBBER
                | Usage::BTN_TOOL_BRUSH
                | Usage::BTN_TOOL_PENCIL
                | Usage::BTN_TOOL_AIRBRUSH
                | Usage::BTN_TOOL_FINGER
                | Usage::BTN_TOOL_MOUSE
                | Usage::BTN_TOOL_LENS => return false,
                _ => {}
            }
        }

        if pen_toggled {
            if self.pen_state {
                self.set_timer(ctx, time);
            } else {
                // A real BTN_TOOL_PEN 0: the tablet gives us the right
                // events after all.
                log::debug!(
                    "{}: proximity out timer unloaded",
                    self.device.name(),
                );
                return false;
            }
        } else if self.proximity_out_forced {
            log::debug!("{}: forcing proximity in", self.device.name());
            let mut prox_in = EvdevFrame::new(2);
            let _ = prox_in.append_one(Usage::BTN_TOOL_PEN, 1);
            prox_in.set_time(time);
            ctx.prepend_frame(&self.device, prox_in);

            self.proximity_out_forced = false;
            self.set_timer(ctx, time);
        }

        true
    }

    fn handle_timeout(&mut self, ctx: &mut PluginContext, now: u64) {
        // A held stylus button means the pen is clearly still around.
        if !self.button_state.is_empty() {
            self.set_timer(ctx, now);
            return;
        }

        if self.last_event_time > now.saturating_sub(self.timeout) {
            self.set_timer(ctx, self.last_event_time);
            return;
        }

        log::debug!(
            "{}: forcing proximity out after timeout",
            self.device.name(),
        );
        let mut prox_out = EvdevFrame::new(2);
        let _ = prox_out.append_one(Usage::BTN_TOOL_PEN, 0);
        prox_out.set_time(now);
        ctx.prepend_frame(&self.device, prox_out);

        self.proximity_out_forced = true;
    }
}

/// Synthesizes proximity-out after idle for tablets that never report it.
#[derive(Debug)]
pub struct ProximityTimerPlugin {
    devices: Vec<ProximityTimerDevice>,
    timeout: u64,
}

impl Default for ProximityTimerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ProximityTimerPlugin {
    pub fn new() -> Self {
        Self::with_timeout(FORCED_PROXOUT_TIMEOUT)
    }

    /// Like [`ProximityTimerPlugin::new`] with a custom idle timeout.
    pub fn with_timeout(timeout: u64) -> Self {
        Self {
            devices: Vec::new(),
            timeout,
        }
    }
}

impl Plugin for ProximityTimerPlugin {
    fn device_added(&mut self, ctx: &mut PluginContext, device: &Device) {
        if !device.has_capability(DeviceCapability::TABLET_TOOL) {
            return;
        }

        ctx.enable_frame_events(device, true);
        self.devices.push(ProximityTimerDevice {
            device: device.clone(),
            proximity_out_forced: false,
            last_event_time: 0,
            pen_state: false,
            button_state: ButtonState::default(),
            timeout: self.timeout,
        });
    }

    fn device_removed(&mut self, ctx: &mut PluginContext, device: &Device) {
        if let Some(idx) = self.devices.iter().position(|rec| rec.device == *device) {
            let rec = self.devices.swap_remove(idx);
            rec.cancel_timer(ctx);
        }
    }

    fn evdev_frame(&mut self, ctx: &mut PluginContext, device: &Device, frame: &mut EvdevFrame) {
        if let Some(idx) = self.devices.iter().position(|rec| rec.device == *device) {
            if !self.devices[idx].handle_frame(ctx, frame) {
                let rec = self.devices.swap_remove(idx);
                rec.cancel_timer(ctx);
                ctx.enable_frame_events(device, false);
            }
        }
    }

    fn timer_expired(&mut self, ctx: &mut PluginContext, timer: TimerToken, now: u64) {
        if let Some(rec) = self
            .devices
            .iter_mut()
            .find(|rec| rec.device.id().0 == timer.0)
        {
            rec.handle_timeout(ctx, now);
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
        emitted: Rc<RefCell<Vec<(Vec<(Usage, i32)>, u64)>>>,
    }

    impl Harness {
        fn new() -> Self {
            let emitted = Rc::new(RefCell::new(Vec::new()));
            let sink = {
                let emitted = emitted.clone();
                move |_: &Device, frame: &EvdevFrame| {
                    emitted.borrow_mut().push((
                        frame
                            .payload()
                            .iter()
                            .map(|ev| (ev.usage, ev.value))
                            .collect(),
                        frame.time() / 1000,
                    ));
                }
            };

            let mut system = PluginSystem::new();
            system.set_sink(sink);
            system.register("tablet-proximity-timer", ProximityTimerPlugin::new());

            let device = DeviceBuilder::new("test tablet", "event3")
                .capability(DeviceCapability::TABLET_TOOL)
                .usage(Usage::BTN_TOOL_PEN)
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

        fn emitted(&self) -> Vec<(Vec<(Usage, i32)>, u64)> {
            self.emitted.borrow().clone()
        }
    }

    #[test]
    fn idle_pen_is_forced_out_of_proximity() {
        // Pen-in @0 followed by silence.
        let mut h = Harness::new();
        h.frame(&[(Usage::BTN_TOOL_PEN, 1), (Usage::ABS_X, 10)], 0);
        h.system.flush_timers(50_000);

        assert_eq!(
            h.emitted().last().unwrap(),
            &(vec![(Usage::BTN_TOOL_PEN, 0)], 50)
        );
    }

    #[test]
    fn activity_pushes_the_timer_out() {
        let mut h = Harness::new();
        h.frame(&[(Usage::BTN_TOOL_PEN, 1)], 0);
        h.frame(&[(Usage::ABS_X, 11)], 40);
        // The timer armed at 0 expires at 50, but the device was active at
        // 40, so it gets pushed out to 90.
        h.system.flush_timers(60_000);
        assert_eq!(h.emitted().len(), 2);

        h.system.flush_timers(90_000);
        assert_eq!(
            h.emitted().last().unwrap(),
            &(vec![(Usage::BTN_TOOL_PEN, 0)], 90)
        );
    }

    #[test]
    fn held_buttons_defer_proximity_out() {
        // Property: no spurious prox-out while any tool button is held.
        let mut h = Harness::new();
        h.frame(&[(Usage::BTN_TOOL_PEN, 1)], 0);
        h.frame(&[(Usage::BTN_STYLUS, 1)], 10);

        h.system.flush_timers(200_000);
        h.system.flush_timers(400_000);
        assert_eq!(h.emitted().len(), 2);

        // Releasing the button re-starts the countdown.
        h.frame(&[(Usage::BTN_STYLUS, 0)], 500);
        h.system.flush_timers(600_000);
        assert_eq!(
            h.emitted().last().unwrap(),
            &(vec![(Usage::BTN_TOOL_PEN, 0)], 600)
        );
    }

    #[test]
    fn next_event_after_forced_out_forces_proximity_in() {
        let mut h = Harness::new();
        h.frame(&[(Usage::BTN_TOOL_PEN, 1)], 0);
        h.system.flush_timers(50_000);

        h.frame(&[(Usage::ABS_X, 12)], 80);
        let emitted = h.emitted();
        let n = emitted.len();
        // The prox-in frame is prepended ahead of the axis frame.
        assert_eq!(emitted[n - 2], (vec![(Usage::BTN_TOOL_PEN, 1)], 80));
        assert_eq!(emitted[n - 1], (vec![(Usage::ABS_X, 12)], 80));
    }

    #[test]
    fn real_proximity_out_unloads_the_device() {
        let mut h = Harness::new();
        h.frame(&[(Usage::BTN_TOOL_PEN, 1)], 0);
        h.frame(&[(Usage::BTN_TOOL_PEN, 0)], 10);

        h.system.flush_timers(200_000);
        // Both frames passed through, no synthesized prox-out.
        assert_eq!(
            h.emitted(),
            vec![
                (vec![(Usage::BTN_TOOL_PEN, 1)], 0),
                (vec![(Usage::BTN_TOOL_PEN, 0)], 10),
            ]
        );
    }

    #[test]
    fn non_pen_tools_unload_the_device() {
        let mut h = Harness::new();
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 1)], 0);
        h.system.flush_timers(200_000);

        // No prox-out: the timer armed by the first event was cancelled when
        // the eraser bit unloaded the device.
        assert_eq!(h.emitted(), vec![(vec![(Usage::BTN_TOOL_RUBBER, 1)], 0)]);
    }
}
