//! The plugin interface.
//!
//! A plugin is a named unit hooked into the frame pipeline. It implements any
//! subset of the [`Plugin`] callbacks; every callback receives a
//! [`PluginContext`] through which the plugin talks back to the pipeline
//! (queueing frames, arming timers, opting in or out of a device's frames,
//! unregistering itself).
//!
//! Context requests are collected while the callback runs and applied by the
//! pipeline when it returns. This keeps the callback free to mutate its own
//! state without re-entering the pipeline.

use crate::{
    device::Device,
    event::Usage,
    frame::EvdevFrame,
};

/// Identifies one of a plugin's timers.
///
/// The token namespace is per plugin; plugins with per-device timers usually
/// derive the token from the [`DeviceId`][crate::device::DeviceId].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u32);

/// How the eraser end of a tablet pen is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EraserButtonMode {
    /// Leave the eraser alone as a distinct tool.
    #[default]
    Default,
    /// Rewrite eraser proximity into a button press on the pen tool.
    Button,
}

/// Per-tool configuration, broadcast through
/// [`Plugin::tool_configured`] when the configuration surface changes it.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub eraser_button_mode: EraserButtonMode,
    /// The button usage synthesized in [`EraserButtonMode::Button`].
    pub eraser_button: Usage,
}

/// Lifecycle and event callbacks of a pipeline plugin.
///
/// All methods default to doing nothing; implement the ones you need.
/// Cleanup on destruction goes into a [`Drop`] impl.
#[allow(unused_variables)]
pub trait Plugin {
    /// Called once right after the plugin was registered.
    fn run(&mut self, ctx: &mut PluginContext) {}

    /// Notification about a newly seen device that has *not* yet been
    /// accepted into the pipeline. This is the only point where a device's
    /// usages and absinfo may still be changed.
    fn device_new(&mut self, ctx: &mut PluginContext, device: &Device) {}

    /// The device announced via [`Plugin::device_new`] was dropped and will
    /// never deliver frames.
    fn device_ignored(&mut self, ctx: &mut PluginContext, device: &Device) {}

    /// The device was accepted into the pipeline.
    fn device_added(&mut self, ctx: &mut PluginContext, device: &Device) {}

    /// A previously added device was removed. Per-device records should be
    /// dropped here.
    fn device_removed(&mut self, ctx: &mut PluginContext, device: &Device) {}

    /// A frame arrived on a device this plugin opted in for.
    ///
    /// The frame is exclusively owned for the duration of the call and may be
    /// mutated, truncated via [`EvdevFrame::reset`] (dropping it after the
    /// last plugin), or supplemented through the queueing methods on `ctx`.
    fn evdev_frame(&mut self, ctx: &mut PluginContext, device: &Device, frame: &mut EvdevFrame) {}

    /// A tablet tool's configuration changed.
    fn tool_configured(&mut self, ctx: &mut PluginContext, tool: &ToolConfig) {}

    /// One of the plugin's timers expired. `now` is the current monotonic
    /// time, which may be past the programmed expiry.
    fn timer_expired(&mut self, ctx: &mut PluginContext, timer: TimerToken, now: u64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackKind {
    /// Inside `evdev_frame`; queued frames interleave with the current frame.
    Frame,
    /// Inside `timer_expired`; there is no current frame, prepend and append
    /// are equivalent.
    Timer,
    /// Any other callback; queueing frames is a plugin bug.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueKind {
    Prepend,
    Append,
    Inject,
}

pub(crate) enum TimerOp {
    Set(TimerToken, u64),
    Cancel(TimerToken),
}

/// Requests collected from one callback invocation.
#[derive(Default)]
pub(crate) struct Actions {
    pub(crate) frames: Vec<(QueueKind, Device, EvdevFrame)>,
    pub(crate) timer_ops: Vec<TimerOp>,
    pub(crate) frame_events: Vec<(Device, bool)>,
    pub(crate) unregister: bool,
}

/// Handle through which a plugin callback talks to the pipeline.
pub struct PluginContext {
    name: std::rc::Rc<str>,
    now: u64,
    kind: CallbackKind,
    pub(crate) actions: Actions,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.name)
            .field("now", &self.now)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PluginContext {
    pub(crate) fn new(name: std::rc::Rc<str>, now: u64, kind: CallbackKind) -> Self {
        Self {
            name,
            now,
            kind,
            actions: Actions::default(),
        }
    }

    /// The name the plugin was registered under.
    #[inline]
    pub fn plugin_name(&self) -> &str {
        &self.name
    }

    /// The current monotonic time in microseconds, as observed by the
    /// pipeline.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    fn queue(&mut self, kind: QueueKind, device: &Device, frame: EvdevFrame) {
        if self.kind == CallbackKind::Other {
            log::error!(
                "plugin bug: {}: queueing frames is only possible from a frame or timer callback",
                self.name,
            );
            return;
        }
        self.actions.frames.push((kind, device.clone(), frame));
    }

    /// Queues a frame to be delivered *before* the current frame continues
    /// down the pipeline. The first plugin in the pipeline does not see it;
    /// delivery starts right after the calling plugin.
    ///
    /// Multiple prepended frames keep their call order ahead of the current
    /// frame.
    pub fn prepend_frame(&mut self, device: &Device, frame: EvdevFrame) {
        self.queue(QueueKind::Prepend, device, frame);
    }

    /// Queues a frame to be delivered to the plugins after the calling one,
    /// once the current frame has finished its traversal.
    pub fn append_frame(&mut self, device: &Device, frame: EvdevFrame) {
        self.queue(QueueKind::Append, device, frame);
    }

    /// Injects a frame that restarts from the bottom of the pipeline, as if
    /// it had just arrived from the kernel.
    ///
    /// This is a strong interruption: the injected frame traverses *all*
    /// plugins, including the injecting one, before anything else continues.
    /// Injecting plugins must guard against re-entry themselves. In almost
    /// all cases [`PluginContext::prepend_frame`] or
    /// [`PluginContext::append_frame`] is the better choice.
    pub fn inject_frame(&mut self, device: &Device, frame: EvdevFrame) {
        self.queue(QueueKind::Inject, device, frame);
    }

    /// Arms (or re-arms) the plugin's timer identified by `token` to fire at
    /// the given absolute monotonic microsecond time.
    pub fn set_timer(&mut self, token: TimerToken, expire: u64) {
        self.actions.timer_ops.push(TimerOp::Set(token, expire));
    }

    /// Cancels a timer. Idempotent; a cancelled timer never fires, even if it
    /// already expired but was not serviced yet.
    pub fn cancel_timer(&mut self, token: TimerToken) {
        self.actions.timer_ops.push(TimerOp::Cancel(token));
    }

    /// Opts this plugin in or out of `evdev_frame` delivery for the device.
    pub fn enable_frame_events(&mut self, device: &Device, enable: bool) {
        self.actions.frame_events.push((device.clone(), enable));
    }

    /// Removes this plugin from the pipeline once the callback returns.
    ///
    /// Pending timers are cancelled; frames the plugin already queued continue
    /// to flow.
    pub fn unregister(&mut self) {
        self.actions.unregister = true;
    }
}
