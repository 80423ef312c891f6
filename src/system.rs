//! The plugin system: the ordered pipeline every event frame travels through.
//!
//! Frames enter via [`PluginSystem::dispatch`], visit each opted-in plugin in
//! registration order, and whatever survives is handed to the frame sink.
//! Before a frame is dispatched, all expired timers fire; frames queued from
//! timer callbacks flow down the same path.

use std::{
    cell::RefCell,
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use crate::{
    device::{Device, DeviceId},
    frame::{EvdevFrame, FrameHandle},
    plugin::{Actions, CallbackKind, Plugin, PluginContext, QueueKind, TimerOp, TimerToken, ToolConfig},
};

/// Receives the frames that survive the pipeline.
///
/// In a full input stack this is the device-type dispatcher that turns frames
/// into consumer events.
pub trait FrameSink {
    fn frame(&mut self, device: &Device, frame: &EvdevFrame);
}

impl<F: FnMut(&Device, &EvdevFrame)> FrameSink for F {
    fn frame(&mut self, device: &Device, frame: &EvdevFrame) {
        self(device, frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    New,
    Added,
    Ignored,
    Removed,
}

struct DeviceRecord {
    device: Device,
    state: DeviceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PluginId(u32);

struct PluginEntry {
    id: PluginId,
    name: Rc<str>,
    plugin: Rc<RefCell<dyn Plugin>>,
    /// Devices this plugin wants `evdev_frame` callbacks for.
    wants_frames: Vec<DeviceId>,
    removed: bool,
}

struct TimerEntry {
    plugin: PluginId,
    token: TimerToken,
    name: String,
    /// Absolute expiry in monotonic microseconds; `None` while disarmed.
    expire: Option<u64>,
}

struct PendingFrame {
    device: Device,
    frame: FrameHandle,
    /// Index of the first plugin that should see this frame.
    start: usize,
}

/// The context object owning the plugin list, the timers, and the frame
/// queues.
pub struct PluginSystem {
    plugins: Vec<PluginEntry>,
    next_plugin_id: u32,
    devices: Vec<DeviceRecord>,
    next_device_id: u32,
    timers: Vec<TimerEntry>,
    pending: VecDeque<PendingFrame>,
    sink: Option<Box<dyn FrameSink>>,
    now: u64,
}

impl std::fmt::Debug for PluginSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSystem")
            .field("plugins", &self.plugin_names())
            .field("devices", &self.devices.len())
            .field("now", &self.now)
            .finish()
    }
}

impl Default for PluginSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginSystem {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            next_plugin_id: 0,
            devices: Vec::new(),
            next_device_id: 0,
            timers: Vec::new(),
            pending: VecDeque::new(),
            sink: None,
            now: 0,
        }
    }

    /// Sets the sink receiving the surviving frames. Replaces any previous
    /// sink.
    pub fn set_sink(&mut self, sink: impl FrameSink + 'static) {
        self.sink = Some(Box::new(sink));
    }

    /// The most recent monotonic time the pipeline has observed.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    fn observe_time(&mut self, time: u64) {
        self.now = self.now.max(time);
    }

    /// Registers a plugin at the end of the pipeline and invokes its `run`
    /// callback. Registration order is pipeline order.
    pub fn register<P: Plugin + 'static>(&mut self, name: &str, plugin: P) {
        let id = PluginId(self.next_plugin_id);
        self.next_plugin_id += 1;
        self.plugins.push(PluginEntry {
            id,
            name: name.into(),
            plugin: Rc::new(RefCell::new(plugin)),
            wants_frames: Vec::new(),
            removed: false,
        });

        let idx = self.plugins.len() - 1;
        self.call_plugin(idx, CallbackKind::Other, |plugin, ctx| plugin.run(ctx));
        self.drain_pending();
        self.compact();
    }

    /// Names of the registered plugins, in pipeline order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins
            .iter()
            .filter(|p| !p.removed)
            .map(|p| &*p.name)
            .collect()
    }

    /// Announces a device to all plugins. The device must subsequently be
    /// either [`PluginSystem::device_added`] or
    /// [`PluginSystem::device_ignored`].
    pub fn device_new(&mut self, device: &Device) {
        let id = DeviceId(self.next_device_id);
        self.next_device_id += 1;
        device.assign_id(id);
        self.devices.push(DeviceRecord {
            device: device.clone(),
            state: DeviceState::New,
        });

        self.broadcast(|plugin, ctx| plugin.device_new(ctx, device));
    }

    /// Accepts a previously announced device into the pipeline. The device's
    /// usages and absinfo are frozen from here on.
    pub fn device_added(&mut self, device: &Device) {
        if !self.transition_device(device, DeviceState::New, DeviceState::Added) {
            return;
        }
        device.seal();
        self.broadcast(|plugin, ctx| plugin.device_added(ctx, device));
    }

    /// Drops a previously announced device without adding it.
    pub fn device_ignored(&mut self, device: &Device) {
        if !self.transition_device(device, DeviceState::New, DeviceState::Ignored) {
            return;
        }
        self.broadcast(|plugin, ctx| plugin.device_ignored(ctx, device));
        self.forget_device(device);
    }

    /// Removes an added device from the pipeline.
    pub fn device_removed(&mut self, device: &Device) {
        if !self.transition_device(device, DeviceState::Added, DeviceState::Removed) {
            return;
        }
        self.broadcast(|plugin, ctx| plugin.device_removed(ctx, device));
        self.forget_device(device);
    }

    fn transition_device(&mut self, device: &Device, from: DeviceState, to: DeviceState) -> bool {
        match self
            .devices
            .iter_mut()
            .find(|rec| rec.device == *device)
        {
            Some(rec) if rec.state == from => {
                rec.state = to;
                true
            }
            Some(rec) => {
                log::error!(
                    "bug: device {} lifecycle violation ({:?} -> {:?})",
                    device.name(),
                    rec.state,
                    to,
                );
                false
            }
            None => {
                log::error!("bug: device {} was never announced", device.name());
                false
            }
        }
    }

    fn forget_device(&mut self, device: &Device) {
        self.devices.retain(|rec| rec.device != *device);
        let id = device.id();
        for entry in &mut self.plugins {
            entry.wants_frames.retain(|d| *d != id);
        }
    }

    /// Broadcasts a tool configuration change to all plugins.
    pub fn tool_configured(&mut self, tool: &ToolConfig) {
        self.broadcast(|plugin, ctx| plugin.tool_configured(ctx, tool));
    }

    fn broadcast(&mut self, mut f: impl FnMut(&mut dyn Plugin, &mut PluginContext)) {
        for idx in 0..self.plugins.len() {
            self.call_plugin(idx, CallbackKind::Other, &mut f);
        }
        self.drain_pending();
        self.compact();
    }

    /// Feeds one kernel event frame into the pipeline.
    ///
    /// Expired timers are flushed first, then the frame visits every opted-in
    /// plugin in pipeline order. Surviving frames reach the sink in delivery
    /// order.
    pub fn dispatch(&mut self, device: &Device, frame: EvdevFrame) {
        match self
            .devices
            .iter()
            .find(|rec| rec.device == *device)
            .map(|rec| rec.state)
        {
            Some(DeviceState::Added) => {}
            _ => {
                log::error!(
                    "bug: dispatching frame for device {} which was never added",
                    device.name(),
                );
                return;
            }
        }

        let time = frame.time();
        self.flush_timers(time);

        self.pending.push_back(PendingFrame {
            device: device.clone(),
            frame: frame.into_handle(),
            start: 0,
        });
        self.drain_pending();
        self.compact();
    }

    /// Fires all timers that have expired by `now`, in expiry order, and
    /// delivers any frames their callbacks queued.
    pub fn flush_timers(&mut self, now: u64) {
        self.observe_time(now);

        // Snapshot the expired set; timers armed by the callbacks below wait
        // for the next flush, like they would with a timerfd-driven loop.
        let mut expired: Vec<(u64, PluginId, TimerToken)> = self
            .timers
            .iter()
            .filter_map(|t| {
                t.expire
                    .filter(|e| *e <= now)
                    .map(|e| (e, t.plugin, t.token))
            })
            .collect();
        expired.sort_by_key(|&(expire, _, _)| expire);

        for (_, plugin_id, token) in expired {
            // An earlier callback in this flush may have cancelled or
            // rescheduled this timer, or unregistered its plugin.
            let Some(timer) = self
                .timers
                .iter_mut()
                .find(|t| t.plugin == plugin_id && t.token == token)
            else {
                continue;
            };
            if timer.expire.is_none_or(|e| e > now) {
                continue;
            }
            timer.expire = None;

            let Some(plugin_idx) = self
                .plugins
                .iter()
                .position(|p| p.id == plugin_id && !p.removed)
            else {
                continue;
            };

            let actions = self.call_plugin(plugin_idx, CallbackKind::Timer, |plugin, ctx| {
                plugin.timer_expired(ctx, token, now)
            });

            // No current frame here: prepend and append are equivalent and
            // deliver to the plugins after this one; injects restart at the
            // bottom of the pipeline.
            if let Some(frames) = actions {
                for (kind, device, frame) in frames {
                    let start = match kind {
                        QueueKind::Inject => 0,
                        QueueKind::Prepend | QueueKind::Append => plugin_idx + 1,
                    };
                    self.pending.push_back(PendingFrame {
                        device,
                        frame: frame.into_handle(),
                        start,
                    });
                }
            }
        }

        self.drain_pending();
        self.compact();
    }

    /// The earliest armed timer expiry, if any. Lets an event loop decide
    /// when to call [`PluginSystem::flush_timers`] next.
    pub fn next_timer_expiry(&self) -> Option<u64> {
        self.timers.iter().filter_map(|t| t.expire).min()
    }

    /// Runs a single callback of the plugin at `idx` and applies everything it
    /// requested except frame queueing, which is returned to the caller (its
    /// ordering depends on the callback kind).
    fn call_plugin(
        &mut self,
        idx: usize,
        kind: CallbackKind,
        f: impl FnOnce(&mut dyn Plugin, &mut PluginContext),
    ) -> Option<Vec<(QueueKind, Device, EvdevFrame)>> {
        let entry = &self.plugins[idx];
        if entry.removed {
            return None;
        }

        let plugin = entry.plugin.clone();
        let mut ctx = PluginContext::new(entry.name.clone(), self.now, kind);

        let panicked = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut plugin = plugin.borrow_mut();
            f(&mut *plugin, &mut ctx);
        }))
        .is_err();

        let mut actions = std::mem::take(&mut ctx.actions);
        if panicked {
            log::error!(
                "plugin bug: {}: panicked in a callback, unregistering",
                self.plugins[idx].name,
            );
            actions.unregister = true;
        }

        Some(self.apply_actions(idx, actions))
    }

    /// Applies timer ops, frame-event opt-ins, and unregistration. Queued
    /// frames are passed back for the caller to order into the pending queue.
    fn apply_actions(
        &mut self,
        idx: usize,
        actions: Actions,
    ) -> Vec<(QueueKind, Device, EvdevFrame)> {
        let plugin_id = self.plugins[idx].id;

        for (device, enable) in actions.frame_events {
            let wants = &mut self.plugins[idx].wants_frames;
            let id = device.id();
            if enable {
                if !wants.contains(&id) {
                    wants.push(id);
                }
            } else {
                wants.retain(|d| *d != id);
            }
        }

        for op in actions.timer_ops {
            match op {
                TimerOp::Set(token, expire) => {
                    match self
                        .timers
                        .iter_mut()
                        .find(|t| t.plugin == plugin_id && t.token == token)
                    {
                        Some(timer) => timer.expire = Some(expire),
                        None => {
                            let name = format!("{}:{}", self.plugins[idx].name, token.0);
                            self.timers.push(TimerEntry {
                                plugin: plugin_id,
                                token,
                                name,
                                expire: Some(expire),
                            });
                        }
                    }
                }
                TimerOp::Cancel(token) => {
                    if let Some(timer) = self
                        .timers
                        .iter_mut()
                        .find(|t| t.plugin == plugin_id && t.token == token)
                    {
                        timer.expire = None;
                    }
                }
            }
        }

        if actions.unregister {
            self.plugins[idx].removed = true;
            self.plugins[idx].wants_frames.clear();
            self.timers.retain(|t| t.plugin != plugin_id);
        }

        actions.frames
    }

    /// Delivers every pending frame until the queue runs dry.
    fn drain_pending(&mut self) {
        while let Some(entry) = self.pending.pop_front() {
            self.deliver(entry);
        }
    }

    /// Walks one frame through the pipeline starting at `entry.start`.
    ///
    /// Prepends and injects suspend the current frame: it is put back on the
    /// queue behind them and resumes at the next plugin once they have been
    /// delivered. Appends line up after the current frame.
    fn deliver(&mut self, entry: PendingFrame) {
        let PendingFrame {
            device,
            frame,
            start,
        } = entry;

        let device_id = device.id();
        let mut idx = start;
        while idx < self.plugins.len() {
            {
                let entry = &self.plugins[idx];
                if entry.removed || !entry.wants_frames.contains(&device_id) {
                    idx += 1;
                    continue;
                }
            }

            let queued = self
                .call_plugin(idx, CallbackKind::Frame, |plugin, ctx| {
                    plugin.evdev_frame(ctx, &device, &mut frame.borrow_mut())
                })
                .unwrap_or_default();

            let mut injects = Vec::new();
            let mut prepends = Vec::new();
            let mut appends = Vec::new();
            for (kind, dev, queued_frame) in queued {
                let pending = PendingFrame {
                    device: dev,
                    frame: queued_frame.into_handle(),
                    start: idx + 1,
                };
                match kind {
                    QueueKind::Inject => injects.push(PendingFrame { start: 0, ..pending }),
                    QueueKind::Prepend => prepends.push(pending),
                    QueueKind::Append => appends.push(pending),
                }
            }

            let suspend = !injects.is_empty() || !prepends.is_empty();

            // Front of the queue, in delivery order: injects, prepends, the
            // suspended current frame, then this plugin's appends.
            for pending in appends.into_iter().rev() {
                self.pending.push_front(pending);
            }
            if suspend {
                self.pending.push_front(PendingFrame {
                    device,
                    frame,
                    start: idx + 1,
                });
                for pending in prepends.into_iter().rev() {
                    self.pending.push_front(pending);
                }
                for pending in injects.into_iter().rev() {
                    self.pending.push_front(pending);
                }
                return;
            }

            idx += 1;
        }

        // Past the last plugin: emit unless some plugin truncated the frame.
        let frame = frame.borrow();
        if !frame.is_empty() {
            if let Some(sink) = &mut self.sink {
                sink.frame(&device, &frame);
            }
        }
    }

    /// Drops unregistered plugins. Only called with an empty pending queue,
    /// since queued frames hold plugin indices.
    fn compact(&mut self) {
        debug_assert!(self.pending.is_empty());
        self.plugins.retain(|p| !p.removed);
    }

    #[cfg(test)]
    pub(crate) fn armed_timers(&self) -> usize {
        self.timers.iter().filter(|t| t.expire.is_some()).count()
    }

    #[cfg(test)]
    pub(crate) fn timer_names(&self) -> Vec<&str> {
        self.timers.iter().map(|t| t.name.as_str()).collect()
    }
}
