//! Eraser-button virtualization.
//!
//! If the physical eraser is configured away, paper over pen prox-out /
//! eraser prox-in sequences and send a pen button event instead. The window
//! between the pen leaving and the eraser entering proximity is bridged by a
//! timer; within it the tool change is considered a flip of the pen.

use std::fmt;

use bitflags::bitflags;

use crate::{
    device::{Device, DeviceCapability},
    event::Usage,
    frame::EvdevFrame,
    plugin::{EraserButtonMode, Plugin, PluginContext, TimerToken, ToolConfig},
};

const ERASER_BUTTON_DELAY: u64 = 30_000;

/// Timeout used by test harnesses; real hardware flips tools faster than a
/// test can keep up with.
pub const ERASER_BUTTON_DELAY_FOR_TESTING: u64 = 150_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameDisposition {
    Discard,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EraserButtonState {
    Neutral,
    PenPendingEraser,
    ButtonHeldDown,
    ButtonReleased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EraserButtonEvent {
    PenEnteringProx,
    PenLeavingProx,
    EraserEnteringProx,
    EraserLeavingProx,
    Timeout,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct EraserFilter: u16 {
        const PEN_IN_PROX        = 1 << 0;
        const PEN_OUT_OF_PROX    = 1 << 1;
        const BUTTON_DOWN        = 1 << 2;
        const BUTTON_UP          = 1 << 3;
        const SKIP_BTN_TOUCH     = 1 << 4;
    }
}

struct EraserButtonDevice {
    device: Device,
    pen_in_prox: bool,
    eraser_in_prox: bool,
    /// Payload of the last frame that was forwarded unmodified; replayed when
    /// a synthesized event needs axis data and the triggering frame only has
    /// garbage.
    last_frame: EvdevFrame,
    /// Time of the pen prox-out that armed the pending-eraser timer.
    pen_out_time: u64,
    mode: EraserButtonMode,
    button: Usage,
    delay: u64,
    state: EraserButtonState,
}

impl fmt::Debug for EraserButtonDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EraserButtonDevice")
            .field("device", &self.device.sysname())
            .field("state", &self.state)
            .finish()
    }
}

impl EraserButtonDevice {
    fn log_bug(&self, event: EraserButtonEvent) {
        log::error!(
            "plugin bug: invalid eraser button event {:?} in state {:?}",
            event,
            self.state,
        );
    }

    fn set_timer(&self, ctx: &mut PluginContext, time: u64) {
        ctx.set_timer(TimerToken(self.device.id().0), time + self.delay);
    }

    fn cancel_timer(&self, ctx: &mut PluginContext) {
        ctx.cancel_timer(TimerToken(self.device.id().0));
    }

    /// Prepends a frame built from `payload`'s non-tool events plus the
    /// synthesized events requested by `filter`, stamped with `time`.
    ///
    /// `button` is the usage being synthesized for `BUTTON_DOWN`/`BUTTON_UP`;
    /// any device-sourced event on that usage is stripped from the
    /// passthrough so the two cannot contradict each other. Calls that do not
    /// synthesize a button pass `None` and forward button events untouched.
    fn insert_frame(
        &self,
        ctx: &mut PluginContext,
        payload: &EvdevFrame,
        filter: EraserFilter,
        button: Option<Usage>,
        time: u64,
    ) {
        let mut out = EvdevFrame::new(payload.count() + 3);

        for event in payload.payload() {
            match event.usage {
                Usage::BTN_TOOL_PEN | Usage::BTN_TOOL_RUBBER => {}
                Usage::BTN_TOUCH if filter.contains(EraserFilter::SKIP_BTN_TOUCH) => {}
                usage if Some(usage) == button => {}
                _ => {
                    let _ = out.append(std::slice::from_ref(event));
                }
            }
        }

        if filter.intersects(EraserFilter::PEN_IN_PROX | EraserFilter::PEN_OUT_OF_PROX) {
            let value = filter.contains(EraserFilter::PEN_IN_PROX) as i32;
            let _ = out.append_one(Usage::BTN_TOOL_PEN, value);
        }
        if filter.intersects(EraserFilter::BUTTON_DOWN | EraserFilter::BUTTON_UP) {
            debug_assert!(button.is_some());
            if let Some(button) = button {
                let value = filter.contains(EraserFilter::BUTTON_DOWN) as i32;
                let _ = out.append_one(button, value);
            }
        }

        out.set_time(time);
        ctx.prepend_frame(&self.device, out);
    }

    fn neutral_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        frame: &EvdevFrame,
        event: EraserButtonEvent,
        time: u64,
    ) -> FrameDisposition {
        match event {
            EraserButtonEvent::PenEnteringProx => {}
            EraserButtonEvent::PenLeavingProx => {
                self.pen_out_time = time;
                self.set_timer(ctx, time);
                self.state = EraserButtonState::PenPendingEraser;
                // Discard this frame, it has garbage axis data anyway.
                return FrameDisposition::Discard;
            }
            EraserButtonEvent::EraserEnteringProx => {
                // Change eraser prox-in into pen prox-in plus button down.
                self.insert_frame(
                    ctx,
                    frame,
                    EraserFilter::PEN_IN_PROX | EraserFilter::BUTTON_DOWN,
                    Some(self.button),
                    time,
                );
                self.state = EraserButtonState::ButtonHeldDown;
                return FrameDisposition::Discard;
            }
            EraserButtonEvent::EraserLeavingProx => self.log_bug(event),
            EraserButtonEvent::Timeout => {}
        }

        FrameDisposition::Process
    }

    fn pending_eraser_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        frame: &EvdevFrame,
        event: EraserButtonEvent,
        time: u64,
    ) -> FrameDisposition {
        match event {
            EraserButtonEvent::PenEnteringProx => {
                // We just papered over a quick prox out/in.
                self.cancel_timer(ctx);
                self.state = EraserButtonState::Neutral;
            }
            EraserButtonEvent::PenLeavingProx => self.log_bug(event),
            EraserButtonEvent::EraserEnteringProx => {
                // The pen is conceptually still in prox from the last frame,
                // only the button needs to go down.
                self.cancel_timer(ctx);
                self.insert_frame(ctx, frame, EraserFilter::BUTTON_DOWN, Some(self.button), time);
                self.state = EraserButtonState::ButtonHeldDown;
                return FrameDisposition::Discard;
            }
            EraserButtonEvent::EraserLeavingProx => self.log_bug(event),
            EraserButtonEvent::Timeout => {
                // The pen went out of prox and no eraser came in: this was a
                // real pen prox-out.
                self.state = EraserButtonState::Neutral;
                self.insert_frame(
                    ctx,
                    frame,
                    EraserFilter::PEN_OUT_OF_PROX,
                    None,
                    self.pen_out_time,
                );
            }
        }

        FrameDisposition::Process
    }

    fn button_held_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: EraserButtonEvent,
        time: u64,
    ) -> FrameDisposition {
        match event {
            EraserButtonEvent::PenEnteringProx | EraserButtonEvent::PenLeavingProx => {
                // We should have seen an eraser out-of-prox first.
                self.log_bug(event);
            }
            EraserButtonEvent::EraserEnteringProx => self.log_bug(event),
            EraserButtonEvent::EraserLeavingProx => {
                let last_frame = self.last_frame.clone();
                self.insert_frame(ctx, &last_frame, EraserFilter::BUTTON_UP, Some(self.button), time);
                self.state = EraserButtonState::ButtonReleased;
                self.set_timer(ctx, time);
                // Discard the actual frame, it has garbage data anyway.
                return FrameDisposition::Discard;
            }
            EraserButtonEvent::Timeout => {
                // Expected to be cancelled in the previous state.
                self.log_bug(event);
            }
        }

        FrameDisposition::Process
    }

    fn button_released_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        frame: &EvdevFrame,
        event: EraserButtonEvent,
        time: u64,
    ) -> FrameDisposition {
        match event {
            EraserButtonEvent::PenEnteringProx => {
                self.cancel_timer(ctx);
                self.insert_frame(ctx, frame, EraserFilter::empty(), None, time);
                self.state = EraserButtonState::Neutral;
                return FrameDisposition::Discard;
            }
            EraserButtonEvent::PenLeavingProx => self.log_bug(event),
            EraserButtonEvent::EraserEnteringProx => {}
            EraserButtonEvent::EraserLeavingProx => self.log_bug(event),
            EraserButtonEvent::Timeout => {
                // The eraser left and the pen never came back; we still have
                // the pen simulated in-prox. Release the button first, then
                // send the pen out-of-prox sequence, so tip-first/button-first
                // stays predictable.
                self.insert_frame(ctx, frame, EraserFilter::BUTTON_UP, Some(self.button), time);
                self.insert_frame(ctx, frame, EraserFilter::PEN_OUT_OF_PROX, None, time);
                self.state = EraserButtonState::Neutral;
            }
        }

        FrameDisposition::Process
    }

    fn handle_state(
        &mut self,
        ctx: &mut PluginContext,
        frame: &EvdevFrame,
        event: EraserButtonEvent,
        time: u64,
    ) -> FrameDisposition {
        let state = self.state;

        let ret = match state {
            EraserButtonState::Neutral => self.neutral_handle_event(ctx, frame, event, time),
            EraserButtonState::PenPendingEraser => {
                self.pending_eraser_handle_event(ctx, frame, event, time)
            }
            EraserButtonState::ButtonHeldDown => self.button_held_handle_event(ctx, event, time),
            EraserButtonState::ButtonReleased => {
                self.button_released_handle_event(ctx, frame, event, time)
            }
        };

        if state != self.state {
            log::debug!(
                "eraser button: state {:?} -> {:?} -> {:?}",
                state,
                event,
                self.state,
            );
        }

        ret
    }

    fn handle_frame(&mut self, ctx: &mut PluginContext, frame: &mut EvdevFrame) {
        if self.mode == EraserButtonMode::Default {
            return;
        }

        let time = frame.time();
        let mut pen_toggled = false;
        let mut eraser_toggled = false;

        for event in frame.payload() {
            match event.usage {
                Usage::BTN_TOOL_PEN => {
                    pen_toggled = true;
                    self.pen_in_prox = event.value != 0;
                }
                Usage::BTN_TOOL_RUBBER => {
                    eraser_toggled = true;
                    self.eraser_in_prox = event.value != 0;
                }
                _ => {}
            }
        }

        let eraser_event = if self.eraser_in_prox {
            EraserButtonEvent::EraserEnteringProx
        } else {
            EraserButtonEvent::EraserLeavingProx
        };
        let pen_event = if self.pen_in_prox {
            EraserButtonEvent::PenEnteringProx
        } else {
            EraserButtonEvent::PenLeavingProx
        };

        // Whatever goes out of prox is handled first; the disposition of the
        // later edge wins.
        let ret = if eraser_toggled && pen_toggled {
            if self.pen_in_prox {
                self.handle_state(ctx, frame, eraser_event, time);
                self.handle_state(ctx, frame, pen_event, time)
            } else {
                self.handle_state(ctx, frame, pen_event, time);
                self.handle_state(ctx, frame, eraser_event, time)
            }
        } else if eraser_toggled {
            self.handle_state(ctx, frame, eraser_event, time)
        } else if pen_toggled {
            self.handle_state(ctx, frame, pen_event, time)
        } else {
            FrameDisposition::Process
        };

        match ret {
            FrameDisposition::Process => {
                self.last_frame.reset();
                let _ = self.last_frame.set(frame.events());
                self.last_frame.set_time(time);
            }
            FrameDisposition::Discard => frame.reset(),
        }
    }
}

/// Rewrites eraser proximity into a configurable pen button.
#[derive(Debug)]
pub struct EraserButtonPlugin {
    devices: Vec<EraserButtonDevice>,
    config: ToolConfig,
    delay: u64,
}

impl Default for EraserButtonPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl EraserButtonPlugin {
    pub fn new() -> Self {
        Self::with_delay(ERASER_BUTTON_DELAY)
    }

    /// Like [`EraserButtonPlugin::new`] with a custom pen-to-eraser window.
    pub fn with_delay(delay: u64) -> Self {
        Self {
            devices: Vec::new(),
            config: ToolConfig {
                eraser_button_mode: EraserButtonMode::Default,
                eraser_button: Usage::BTN_STYLUS2,
            },
            delay,
        }
    }
}

impl Plugin for EraserButtonPlugin {
    fn device_added(&mut self, ctx: &mut PluginContext, device: &Device) {
        if !device.has_capability(DeviceCapability::TABLET_TOOL) {
            return;
        }

        ctx.enable_frame_events(device, true);
        self.devices.push(EraserButtonDevice {
            device: device.clone(),
            pen_in_prox: false,
            eraser_in_prox: false,
            last_frame: EvdevFrame::new(64),
            pen_out_time: 0,
            mode: self.config.eraser_button_mode,
            button: self.config.eraser_button,
            delay: self.delay,
            state: EraserButtonState::Neutral,
        });
    }

    fn device_removed(&mut self, ctx: &mut PluginContext, device: &Device) {
        if let Some(idx) = self.devices.iter().position(|rec| rec.device == *device) {
            let rec = self.devices.swap_remove(idx);
            rec.cancel_timer(ctx);
        }
    }

    fn evdev_frame(&mut self, ctx: &mut PluginContext, device: &Device, frame: &mut EvdevFrame) {
        if let Some(rec) = self.devices.iter_mut().find(|rec| rec.device == *device) {
            rec.handle_frame(ctx, frame);
        }
    }

    fn tool_configured(&mut self, _: &mut PluginContext, tool: &ToolConfig) {
        self.config = tool.clone();
        for rec in &mut self.devices {
            rec.mode = tool.eraser_button_mode;
            rec.button = tool.eraser_button;
        }
    }

    fn timer_expired(&mut self, ctx: &mut PluginContext, timer: TimerToken, now: u64) {
        if let Some(rec) = self
            .devices
            .iter_mut()
            .find(|rec| rec.device.id().0 == timer.0)
        {
            let last_frame = rec.last_frame.clone();
            rec.handle_state(ctx, &last_frame, EraserButtonEvent::Timeout, now);
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
        fn new(mode: EraserButtonMode) -> Self {
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
            system.register("tablet-eraser-button", EraserButtonPlugin::new());
            system.tool_configured(&ToolConfig {
                eraser_button_mode: mode,
                eraser_button: Usage::BTN_STYLUS2,
            });

            let device = DeviceBuilder::new("test tablet", "event1")
                .capability(DeviceCapability::TABLET_TOOL)
                .usage(Usage::BTN_TOOL_PEN)
                .usage(Usage::BTN_TOOL_RUBBER)
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

        /// The emitted tool/button edges as (usage, value, time_ms).
        fn edges(&self) -> Vec<(Usage, i32, u64)> {
            self.emitted()
                .iter()
                .flat_map(|(events, time)| {
                    events
                        .iter()
                        .filter(|(usage, _)| {
                            matches!(
                                *usage,
                                Usage::BTN_TOOL_PEN | Usage::BTN_TOOL_RUBBER | Usage::BTN_STYLUS2
                            )
                        })
                        .map(|(usage, value)| (*usage, *value, *time))
                        .collect::<Vec<_>>()
                })
                .collect()
        }
    }

    #[test]
    fn eraser_prox_becomes_button() {
        // pen-in @0, pen-out @100, eraser-in @110,
        // eraser-out @300, pen-in @320, pen-out @500.
        let mut h = Harness::new(EraserButtonMode::Button);
        h.frame(&[(Usage::BTN_TOOL_PEN, 1), (Usage::ABS_X, 10)], 0);
        h.frame(&[(Usage::BTN_TOOL_PEN, 0)], 100);
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 1), (Usage::ABS_X, 11)], 110);
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 0)], 300);
        h.frame(&[(Usage::BTN_TOOL_PEN, 1), (Usage::ABS_X, 12)], 320);
        h.frame(&[(Usage::BTN_TOOL_PEN, 0)], 500);
        h.system.flush_timers(700_000);

        assert_eq!(
            h.edges(),
            vec![
                (Usage::BTN_TOOL_PEN, 1, 0),
                (Usage::BTN_STYLUS2, 1, 110),
                (Usage::BTN_STYLUS2, 0, 300),
                (Usage::BTN_TOOL_PEN, 0, 500),
            ]
        );
    }

    #[test]
    fn machine_returns_to_neutral() {
        // Exactly one synthesized button-down and one button-up for a full
        // pen/eraser round trip, ending back in Neutral: a second round trip
        // behaves identically.
        let mut h = Harness::new(EraserButtonMode::Button);
        for round in 0..2u64 {
            let base = round * 1000;
            h.frame(&[(Usage::BTN_TOOL_PEN, 1)], base);
            h.frame(&[(Usage::BTN_TOOL_PEN, 0)], base + 100);
            h.frame(&[(Usage::BTN_TOOL_RUBBER, 1)], base + 110);
            h.frame(&[(Usage::BTN_TOOL_RUBBER, 0)], base + 300);
            h.frame(&[(Usage::BTN_TOOL_PEN, 1)], base + 320);
        }

        let downs = h
            .edges()
            .iter()
            .filter(|(u, v, _)| *u == Usage::BTN_STYLUS2 && *v == 1)
            .count();
        let ups = h
            .edges()
            .iter()
            .filter(|(u, v, _)| *u == Usage::BTN_STYLUS2 && *v == 0)
            .count();
        assert_eq!((downs, ups), (2, 2));
    }

    #[test]
    fn real_pen_prox_out_fires_after_timeout() {
        let mut h = Harness::new(EraserButtonMode::Button);
        h.frame(&[(Usage::BTN_TOOL_PEN, 1)], 0);
        h.frame(&[(Usage::BTN_TOOL_PEN, 0)], 100);
        // No eraser within the window: the pen-out was real, carrying the
        // pen-out event's timestamp.
        h.system.flush_timers(200_000);

        assert_eq!(
            h.edges(),
            vec![(Usage::BTN_TOOL_PEN, 1, 0), (Usage::BTN_TOOL_PEN, 0, 100)]
        );
    }

    #[test]
    fn direct_eraser_prox_in_synthesizes_pen_and_button() {
        let mut h = Harness::new(EraserButtonMode::Button);
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 1), (Usage::ABS_X, 5)], 10);

        assert_eq!(
            h.emitted(),
            vec![(
                vec![
                    (Usage::ABS_X, 5),
                    (Usage::BTN_TOOL_PEN, 1),
                    (Usage::BTN_STYLUS2, 1),
                ],
                10
            )]
        );
    }

    #[test]
    fn eraser_never_returning_releases_button_then_pen() {
        let mut h = Harness::new(EraserButtonMode::Button);
        h.frame(&[(Usage::BTN_TOOL_PEN, 1)], 0);
        h.frame(&[(Usage::BTN_TOOL_PEN, 0)], 100);
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 1)], 110);
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 0)], 300);
        // Neither pen nor eraser return: button-up first, pen prox-out
        // second.
        h.system.flush_timers(500_000);

        let edges = h.edges();
        let n = edges.len();
        assert_eq!(edges[n - 2].0, Usage::BTN_STYLUS2);
        assert_eq!(edges[n - 2].1, 0);
        assert_eq!(edges[n - 1].0, Usage::BTN_TOOL_PEN);
        assert_eq!(edges[n - 1].1, 0);
    }

    #[test]
    fn device_button_survives_the_pen_return() {
        // A genuine stylus-button press riding in the pen's prox-in frame is
        // forwarded; only synthesizing calls strip the configured button.
        let mut h = Harness::new(EraserButtonMode::Button);
        h.frame(&[(Usage::BTN_TOOL_PEN, 1)], 0);
        h.frame(&[(Usage::BTN_TOOL_PEN, 0)], 100);
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 1)], 110);
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 0)], 300);
        h.frame(&[(Usage::BTN_TOOL_PEN, 1), (Usage::BTN_STYLUS2, 1)], 320);

        assert_eq!(
            h.edges(),
            vec![
                (Usage::BTN_TOOL_PEN, 1, 0),
                (Usage::BTN_STYLUS2, 1, 110),
                (Usage::BTN_STYLUS2, 0, 300),
                (Usage::BTN_STYLUS2, 1, 320),
            ]
        );
    }

    #[test]
    fn default_mode_is_a_no_op() {
        let mut h = Harness::new(EraserButtonMode::Default);
        h.frame(&[(Usage::BTN_TOOL_PEN, 1)], 0);
        h.frame(&[(Usage::BTN_TOOL_PEN, 0)], 100);
        h.frame(&[(Usage::BTN_TOOL_RUBBER, 1)], 110);

        assert_eq!(
            h.edges(),
            vec![
                (Usage::BTN_TOOL_PEN, 1, 0),
                (Usage::BTN_TOOL_PEN, 0, 100),
                (Usage::BTN_TOOL_RUBBER, 1, 110),
            ]
        );
    }
}
