//! Button contact-bounce filtering.
//!
//! With `P` a press, `R` a release and `---|` the bounce timeout, the cases
//! to handle are:
//!
//! ```text
//! 1) P---| R           P normal, R normal
//! 2) R---| P           R normal, P normal
//! 3) P---R--| P        P normal, R filtered, delayed, P normal
//! 4) R---P--| R        R normal, P filtered, delayed, R normal
//! 4.1) P---| R--P--|   P normal, R filtered
//! 5) P--R-P-| R        P normal, R filtered, P filtered, R normal
//! 6) R--P-R-| P        R normal, P filtered, R filtered, P normal
//! 7) P--R--|
//!        ---P-|        P normal, R filtered, P filtered
//! 8) R--P--|
//!        ---R-|        R normal, P filtered, R filtered
//! ```
//!
//! 1 and 2 are normal clicks, 3 and 4 fast clicks where the second event is
//! delivered with a delay, 5-8 contact bounces. 4.1 is a button losing
//! contact while physically held down; the release is the event to filter.
//! The timer restarts on every event that could be part of a bouncing
//! sequence, which makes 7 and 8 indistinguishable from 5 and 6.

use std::fmt;

use crate::{
    device::{quirks, Device, DeviceCapability, DeviceId},
    event::{Event, Usage},
    frame::EvdevFrame,
    plugin::{Plugin, PluginContext, TimerToken},
};

const DEBOUNCE_TIMEOUT_BOUNCE: u64 = 25_000;
const DEBOUNCE_TIMEOUT_SPURIOUS: u64 = 12_000;

/// Extra room in the rewritten frame for state-machine emissions. More
/// buttons than this within one frame are quietly ignored.
const MAX_EXTRA_BUTTONS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebounceState {
    Up,
    Down,
    DownWaiting,
    UpDelaying,
    UpDelayingSpurious,
    UpDetectingSpurious,
    DownDetectingSpurious,
    UpWaiting,
    DownDelaying,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebounceEvent {
    Press,
    Release,
    Timeout,
    TimeoutShort,
    OtherButton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonState {
    Pressed,
    Released,
}

struct DebounceDevice {
    device: Device,
    button_usage: Usage,
    button_time: u64,
    state: DebounceState,
    spurious_enabled: bool,
}

impl fmt::Debug for DebounceDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebounceDevice")
            .field("device", &self.device.sysname())
            .field("state", &self.state)
            .finish()
    }
}

fn bounce_token(id: DeviceId) -> TimerToken {
    TimerToken(id.0 << 1)
}

fn spurious_token(id: DeviceId) -> TimerToken {
    TimerToken(id.0 << 1 | 1)
}

impl DebounceDevice {
    fn log_bug(&self, event: DebounceEvent) {
        log::error!(
            "bug: invalid debounce event {:?} in state {:?}",
            event,
            self.state,
        );
    }

    fn set_state(&mut self, state: DebounceState) {
        debug_assert!(state != DebounceState::Disabled);
        self.state = state;
    }

    fn set_timer(&self, ctx: &mut PluginContext, time: u64) {
        ctx.set_timer(bounce_token(self.device.id()), time + DEBOUNCE_TIMEOUT_BOUNCE);
    }

    fn set_timer_short(&self, ctx: &mut PluginContext, time: u64) {
        ctx.set_timer(
            spurious_token(self.device.id()),
            time + DEBOUNCE_TIMEOUT_SPURIOUS,
        );
    }

    fn cancel_timer(&self, ctx: &mut PluginContext) {
        ctx.cancel_timer(bounce_token(self.device.id()));
    }

    fn cancel_timer_short(&self, ctx: &mut PluginContext) {
        ctx.cancel_timer(spurious_token(self.device.id()));
    }

    fn enable_spurious(&mut self) {
        if self.spurious_enabled {
            log::error!("plugin bug: tried to enable spurious debouncing twice");
        }

        self.spurious_enabled = true;
        log::info!(
            "{}: enabling spurious button debouncing",
            self.device.name(),
        );
    }

    /// Emits the debounced press/release: into the rewritten frame while one
    /// is being processed, as a prepended two-event frame from timer
    /// callbacks.
    fn notify_button(
        &self,
        ctx: &mut PluginContext,
        frame: Option<&mut EvdevFrame>,
        state: ButtonState,
    ) {
        let value = match state {
            ButtonState::Pressed => 1,
            ButtonState::Released => 0,
        };

        match frame {
            Some(frame) => {
                let _ = frame.append_one(self.button_usage, value);
            }
            None => {
                let mut frame = EvdevFrame::new(2);
                let _ = frame.append_one(self.button_usage, value);
                frame.set_time(self.button_time);
                ctx.prepend_frame(&self.device, frame);
            }
        }
    }

    fn handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        frame: Option<&mut EvdevFrame>,
        time: u64,
    ) {
        let current = self.state;

        if event == DebounceEvent::OtherButton {
            self.cancel_timer(ctx);
            self.cancel_timer_short(ctx);
        }

        match current {
            DebounceState::Up => self.up_handle_event(ctx, event, frame, time),
            DebounceState::Down => self.down_handle_event(ctx, event, frame, time),
            DebounceState::DownWaiting => self.down_waiting_handle_event(ctx, event, time),
            DebounceState::UpDelaying => self.up_delaying_handle_event(ctx, event, frame, time),
            DebounceState::UpDelayingSpurious => {
                self.up_delaying_spurious_handle_event(ctx, event, frame)
            }
            DebounceState::UpDetectingSpurious => {
                self.up_detecting_spurious_handle_event(ctx, event, time)
            }
            DebounceState::DownDetectingSpurious => {
                self.down_detecting_spurious_handle_event(ctx, event, frame, time)
            }
            DebounceState::UpWaiting => self.up_waiting_handle_event(ctx, event, time),
            DebounceState::DownDelaying => {
                self.down_delaying_handle_event(ctx, event, frame, time)
            }
            DebounceState::Disabled => self.disabled_handle_event(ctx, event, frame, time),
        }

        log::debug!(
            "debounce state: {:?} -> {:?} -> {:?}",
            current,
            event,
            self.state,
        );
    }

    fn up_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        frame: Option<&mut EvdevFrame>,
        time: u64,
    ) {
        match event {
            DebounceEvent::Press => {
                self.button_time = time;
                self.set_timer(ctx, time);
                self.set_state(DebounceState::DownWaiting);
                self.notify_button(ctx, frame, ButtonState::Pressed);
            }
            DebounceEvent::Release | DebounceEvent::Timeout | DebounceEvent::TimeoutShort => {
                self.log_bug(event);
            }
            DebounceEvent::OtherButton => {}
        }
    }

    fn down_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        frame: Option<&mut EvdevFrame>,
        time: u64,
    ) {
        match event {
            DebounceEvent::Press => {
                // If we lost the kernel button release event (e.g. something
                // grabbed the device for a short while) we quietly ignore
                // the next down event.
            }
            DebounceEvent::Release => {
                self.button_time = time;
                self.set_timer(ctx, time);
                self.set_timer_short(ctx, time);
                if self.spurious_enabled {
                    self.set_state(DebounceState::UpDelayingSpurious);
                } else {
                    self.set_state(DebounceState::UpDetectingSpurious);
                    self.notify_button(ctx, frame, ButtonState::Released);
                }
            }
            DebounceEvent::Timeout | DebounceEvent::TimeoutShort => {
                self.log_bug(event);
            }
            DebounceEvent::OtherButton => {}
        }
    }

    fn down_waiting_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        time: u64,
    ) {
        match event {
            DebounceEvent::Press => self.log_bug(event),
            DebounceEvent::Release => {
                self.set_timer(ctx, time);
                self.set_state(DebounceState::UpDelaying);
                // In the debouncing RPR case, we use the last release's
                // time stamp.
                self.button_time = time;
            }
            DebounceEvent::Timeout => {
                self.set_state(DebounceState::Down);
            }
            DebounceEvent::TimeoutShort => self.log_bug(event),
            DebounceEvent::OtherButton => {
                self.set_state(DebounceState::Down);
            }
        }
    }

    fn up_delaying_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        frame: Option<&mut EvdevFrame>,
        time: u64,
    ) {
        match event {
            DebounceEvent::Press => {
                self.set_timer(ctx, time);
                self.set_state(DebounceState::DownWaiting);
            }
            DebounceEvent::Release | DebounceEvent::TimeoutShort => self.log_bug(event),
            DebounceEvent::Timeout | DebounceEvent::OtherButton => {
                self.set_state(DebounceState::Up);
                self.notify_button(ctx, frame, ButtonState::Released);
            }
        }
    }

    fn up_delaying_spurious_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        frame: Option<&mut EvdevFrame>,
    ) {
        match event {
            DebounceEvent::Press => {
                self.set_state(DebounceState::Down);
                self.cancel_timer(ctx);
                self.cancel_timer_short(ctx);
            }
            DebounceEvent::Release | DebounceEvent::Timeout => self.log_bug(event),
            DebounceEvent::TimeoutShort => {
                self.set_state(DebounceState::UpWaiting);
                self.notify_button(ctx, frame, ButtonState::Released);
            }
            DebounceEvent::OtherButton => {
                self.set_state(DebounceState::Up);
                self.notify_button(ctx, frame, ButtonState::Released);
            }
        }
    }

    fn up_detecting_spurious_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        time: u64,
    ) {
        match event {
            DebounceEvent::Press => {
                self.set_timer(ctx, time);
                self.set_timer_short(ctx, time);
                // In a bouncing PRP case, we use the last press event time.
                self.button_time = time;
                self.set_state(DebounceState::DownDetectingSpurious);
            }
            DebounceEvent::Release => self.log_bug(event),
            DebounceEvent::Timeout => {
                self.set_state(DebounceState::Up);
            }
            DebounceEvent::TimeoutShort => {
                self.set_state(DebounceState::UpWaiting);
            }
            DebounceEvent::OtherButton => {
                self.set_state(DebounceState::Up);
            }
        }
    }

    fn down_detecting_spurious_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        frame: Option<&mut EvdevFrame>,
        time: u64,
    ) {
        match event {
            DebounceEvent::Press => self.log_bug(event),
            DebounceEvent::Release => {
                self.set_timer(ctx, time);
                self.set_timer_short(ctx, time);
                self.set_state(DebounceState::UpDetectingSpurious);
            }
            DebounceEvent::TimeoutShort => {
                self.cancel_timer(ctx);
                self.set_state(DebounceState::Down);
                self.enable_spurious();
                self.notify_button(ctx, frame, ButtonState::Pressed);
            }
            DebounceEvent::Timeout | DebounceEvent::OtherButton => {
                self.set_state(DebounceState::Down);
                self.notify_button(ctx, frame, ButtonState::Pressed);
            }
        }
    }

    fn up_waiting_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        time: u64,
    ) {
        match event {
            DebounceEvent::Press => {
                self.set_timer(ctx, time);
                // In a debouncing PRP case, we use the last press' time.
                self.button_time = time;
                self.set_state(DebounceState::DownDelaying);
            }
            DebounceEvent::Release | DebounceEvent::TimeoutShort => self.log_bug(event),
            DebounceEvent::Timeout | DebounceEvent::OtherButton => {
                self.set_state(DebounceState::Up);
            }
        }
    }

    fn down_delaying_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        frame: Option<&mut EvdevFrame>,
        time: u64,
    ) {
        match event {
            DebounceEvent::Press => self.log_bug(event),
            DebounceEvent::Release => {
                self.set_timer(ctx, time);
                self.set_state(DebounceState::UpWaiting);
            }
            DebounceEvent::TimeoutShort => self.log_bug(event),
            DebounceEvent::Timeout | DebounceEvent::OtherButton => {
                self.set_state(DebounceState::Down);
                self.notify_button(ctx, frame, ButtonState::Pressed);
            }
        }
    }

    fn disabled_handle_event(
        &mut self,
        ctx: &mut PluginContext,
        event: DebounceEvent,
        frame: Option<&mut EvdevFrame>,
        time: u64,
    ) {
        match event {
            DebounceEvent::Press => {
                self.button_time = time;
                self.notify_button(ctx, frame, ButtonState::Pressed);
            }
            DebounceEvent::Release => {
                self.button_time = time;
                self.notify_button(ctx, frame, ButtonState::Released);
            }
            DebounceEvent::Timeout | DebounceEvent::TimeoutShort => {
                self.log_bug(event);
            }
            DebounceEvent::OtherButton => {}
        }
    }

    fn handle_frame(&mut self, ctx: &mut PluginContext, frame: &mut EvdevFrame) {
        let time = frame.time();
        let events: Vec<Event> = frame.events().to_vec();

        // Strip all button events from the frame, then let the state machine
        // append the debounced ones to the stripped copy.
        let mut filtered = EvdevFrame::new(events.len() + MAX_EXTRA_BUTTONS);

        let mut nchanged = 0usize;
        let mut flushed = false;
        for event in &events {
            if !event.usage.is_button() {
                let _ = filtered.append(std::slice::from_ref(event));
                continue;
            }

            nchanged += 1;

            // More than one button this frame, or a different button than
            // the one in flight: flush the state machine with OtherButton.
            if !flushed && (nchanged > 1 || event.usage != self.button_usage) {
                self.handle_event(ctx, DebounceEvent::OtherButton, None, time);
                flushed = true;
            }
        }

        if nchanged == 0 {
            return;
        }

        // The state machine requires that Up and Down are neutral entry
        // states without armed timeouts, and an OtherButton event always
        // flushes to one of them.
        for event in &events {
            if !event.usage.is_button() {
                continue;
            }
            let is_down = event.value != 0;

            if flushed && self.state != DebounceState::Disabled {
                self.state = if is_down {
                    DebounceState::Up
                } else {
                    DebounceState::Down
                };
                flushed = false;
            }

            self.button_usage = event.usage;
            self.handle_event(
                ctx,
                if is_down {
                    DebounceEvent::Press
                } else {
                    DebounceEvent::Release
                },
                Some(&mut filtered),
                time,
            );

            // With more than one button event in the frame, flush the state
            // machine right after each one.
            if nchanged > 1 {
                self.handle_event(ctx, DebounceEvent::OtherButton, Some(&mut filtered), time);
                flushed = true;
            }
        }

        let _ = frame.set(filtered.events());
    }
}

/// Suppresses spurious button events caused by mechanical contact bounce,
/// one state record per pointer device.
#[derive(Debug, Default)]
pub struct ButtonDebouncePlugin {
    devices: Vec<DebounceDevice>,
}

impl ButtonDebouncePlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Plugin for ButtonDebouncePlugin {
    fn device_added(&mut self, ctx: &mut PluginContext, device: &Device) {
        if !device.has_capability(DeviceCapability::POINTER) {
            return;
        }

        // Touchpads handle button state themselves.
        if device.udev_bool_property("ID_INPUT_TOUCHPAD") {
            return;
        }

        // The kernel already debounces these; keep the record parked in
        // Disabled so button frames pass through unfiltered.
        let state = if device.has_quirk(quirks::MODEL_BOUNCING_KEYS) {
            DebounceState::Disabled
        } else {
            DebounceState::Up
        };

        ctx.enable_frame_events(device, true);
        self.devices.push(DebounceDevice {
            device: device.clone(),
            button_usage: Usage::BTN_LEFT,
            button_time: 0,
            state,
            spurious_enabled: false,
        });
    }

    fn device_removed(&mut self, ctx: &mut PluginContext, device: &Device) {
        if let Some(idx) = self.devices.iter().position(|rec| rec.device == *device) {
            let rec = self.devices.swap_remove(idx);
            rec.cancel_timer(ctx);
            rec.cancel_timer_short(ctx);
        }
    }

    fn evdev_frame(&mut self, ctx: &mut PluginContext, device: &Device, frame: &mut EvdevFrame) {
        if let Some(rec) = self.devices.iter_mut().find(|rec| rec.device == *device) {
            rec.handle_frame(ctx, frame);
        }
    }

    fn timer_expired(&mut self, ctx: &mut PluginContext, timer: TimerToken, now: u64) {
        let id = DeviceId(timer.0 >> 1);
        let event = if timer.0 & 1 == 0 {
            DebounceEvent::Timeout
        } else {
            DebounceEvent::TimeoutShort
        };

        if let Some(rec) = self
            .devices
            .iter_mut()
            .find(|rec| rec.device.id() == id)
        {
            rec.handle_event(ctx, event, None, now);
        }
    }
}
