//! The scripted plugin host.
//!
//! Each script file becomes an independent plugin instance running in its own
//! sandboxed Lua environment. Scripts talk to the pipeline through a small
//! curated API:
//!
//! - a global `libinput` object (`now`, `version`, `register`, `unregister`,
//!   `connect`, and the timer functions),
//! - per-device objects handed to the `new-evdev-device` handler,
//! - a `log` object with `debug`/`info`/`error`,
//! - an `evdev` table mapping usage names (e.g. `REL_X`) to their numeric
//!   usage, plus the `BUS_*` constants.
//!
//! A script error in any callback unregisters the plugin; the
//! `@@unregistering@@` sentinel marks voluntary unregistration and is not
//! reported as a bug.

use std::{
    cell::RefCell,
    fs, io,
    path::Path,
    rc::Rc,
};

use mlua::{AnyUserData, Function, Lua, MultiValue, RegistryKey, Table, UserData, UserDataMethods, Value};

use crate::{
    abs_info::AbsInfo,
    device::{Device, DeviceId},
    event::{Abs, Event, EventType, Key, Misc, Rel, Switch, Syn, Usage},
    frame::EvdevFrame,
    input_id::Bus,
    plugin::{Plugin, PluginContext, TimerToken},
    system::PluginSystem,
};

/// The plugin API version this host implements.
pub const PLUGIN_VERSION: u32 = 1;

/// Sentinel raised by `libinput:unregister()`; its presence in an error
/// message marks a voluntary unregistration.
const UNREGISTER_SENTINEL: &str = "@@unregistering@@";

/// Most events a script may stuff into one frame.
const MAX_SCRIPT_FRAME_EVENTS: usize = 64;

const TIMER: TimerToken = TimerToken(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueOp {
    Prepend,
    Append,
    Inject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerPending {
    Set(u64),
    Cancel,
}

/// Side effects requested by script code while a callback is executing;
/// drained into the [`PluginContext`] once the interpreter returns.
#[derive(Default)]
struct PendingOps {
    frames: Vec<(QueueOp, Device, EvdevFrame)>,
    timer_ops: Vec<TimerPending>,
    frame_events: Vec<(Device, bool)>,
}

struct ScriptDeviceRec {
    device: Device,
    alive: bool,
    /// The userdata object passed to script handlers.
    ud_key: RegistryKey,
    frame_key: Option<RegistryKey>,
    removed_key: Option<RegistryKey>,
}

struct HostState {
    name: Rc<str>,
    registered: bool,
    version: u32,
    now: u64,
    in_timer: bool,
    device_new_key: Option<RegistryKey>,
    timer_expired_key: Option<RegistryKey>,
    devices: Vec<ScriptDeviceRec>,
    pending: PendingOps,
}

impl HostState {
    fn rec(&self, id: DeviceId) -> Option<&ScriptDeviceRec> {
        self.devices.iter().find(|rec| rec.alive && rec.device.id() == id)
    }

    fn rec_mut(&mut self, id: DeviceId) -> Option<&mut ScriptDeviceRec> {
        self.devices
            .iter_mut()
            .find(|rec| rec.alive && rec.device.id() == id)
    }
}

/// The per-device object exposed to scripts.
struct ScriptDevice {
    shared: Rc<RefCell<HostState>>,
    id: DeviceId,
}

/// Reads a `{ { usage = ..., value = ... }, ... }` event list from script
/// code, stopping at a SYN_REPORT entry.
fn events_from_table(table: &Table) -> mlua::Result<Vec<Event>> {
    let mut events = Vec::new();

    for pair in table.clone().pairs::<Value, Value>() {
        let (_, value) = pair?;
        let entry = match value {
            Value::Table(entry) => entry,
            other => {
                return Err(mlua::Error::RuntimeError(format!(
                    "expected table like `{{ usage = ..., value = ... }}`, got {}",
                    other.type_name(),
                )));
            }
        };

        let usage: u32 = entry.get("usage")?;
        let value: i32 = entry.get("value")?;

        let event = Event::new(Usage::from_raw(usage), value);
        if event.is_syn_report() {
            break;
        }
        events.push(event);

        if events.len() > MAX_SCRIPT_FRAME_EVENTS {
            return Err(mlua::Error::RuntimeError(
                "too many events in frame".into(),
            ));
        }
    }

    Ok(events)
}

fn frame_from_table(table: &Table, time: u64) -> mlua::Result<EvdevFrame> {
    let events = events_from_table(table)?;
    let mut frame = EvdevFrame::new(MAX_SCRIPT_FRAME_EVENTS + 1);
    let _ = frame.append(&events);
    frame.set_time(time);
    Ok(frame)
}

fn frame_to_table(lua: &Lua, frame: &EvdevFrame) -> mlua::Result<Table> {
    let events = lua.create_table()?;
    for (i, event) in frame.payload().iter().enumerate() {
        let entry = lua.create_table()?;
        entry.set("usage", event.usage.raw())?;
        entry.set("value", event.value)?;
        events.set(i + 1, entry)?;
    }
    Ok(events)
}

impl UserData for ScriptDevice {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("info", |lua, this, ()| {
            let shared = this.shared.borrow();
            let info = lua.create_table()?;
            if let Some(rec) = shared.rec(this.id) {
                let id = rec.device.input_id();
                info.set("bustype", id.bus().0)?;
                info.set("vid", id.vendor())?;
                info.set("pid", id.product())?;
            }
            Ok(info)
        });

        methods.add_method("name", |_, this, ()| {
            let shared = this.shared.borrow();
            Ok(shared.rec(this.id).map(|rec| rec.device.name().to_owned()))
        });

        methods.add_method("usages", |lua, this, ()| {
            let shared = this.shared.borrow();
            let usages = lua.create_table()?;
            if let Some(rec) = shared.rec(this.id) {
                for usage in rec.device.usages() {
                    usages.set(usage.raw(), true)?;
                }
            }
            Ok(usages)
        });

        methods.add_method("absinfos", |lua, this, ()| {
            let shared = this.shared.borrow();
            let absinfos = lua.create_table()?;
            if let Some(rec) = shared.rec(this.id) {
                for (abs, info) in rec.device.abs_axes() {
                    let entry = lua.create_table()?;
                    entry.set("minimum", info.minimum())?;
                    entry.set("maximum", info.maximum())?;
                    entry.set("fuzz", info.fuzz())?;
                    entry.set("flat", info.flat())?;
                    entry.set("resolution", info.resolution())?;
                    absinfos.set(Usage::from_abs(abs).raw(), entry)?;
                }
            }
            Ok(absinfos)
        });

        methods.add_method("udev_properties", |lua, this, ()| {
            let shared = this.shared.borrow();
            let props = lua.create_table()?;
            if let Some(rec) = shared.rec(this.id) {
                for (key, value) in rec.device.udev_properties() {
                    // Scripts see the ID_INPUT_ family only; the size hints
                    // and unset properties stay hidden.
                    if !key.starts_with("ID_INPUT_")
                        || key == "ID_INPUT_WIDTH_MM"
                        || key == "ID_INPUT_HEIGHT_MM"
                        || value == "0"
                    {
                        continue;
                    }
                    props.set(key, value)?;
                }
            }
            Ok(props)
        });

        methods.add_method("enable_evdev_usage", |_, this, raw: u32| {
            let shared = this.shared.borrow();
            let usage = Usage::from_raw(raw);
            if usage.event_type().raw() > 0x1f {
                log::error!(
                    "plugin bug: {}: ignoring invalid evdev usage {:#x}",
                    shared.name,
                    raw,
                );
                return Ok(());
            }
            // Absolute axes need their absinfo; use set_absinfo for those.
            if usage.event_type() == EventType::ABS {
                return Ok(());
            }
            if let Some(rec) = shared.rec(this.id) {
                rec.device.enable_usage(usage);
            }
            Ok(())
        });

        methods.add_method("disable_evdev_usage", |_, this, raw: u32| {
            let shared = this.shared.borrow();
            let usage = Usage::from_raw(raw);
            if usage.event_type().raw() > 0x1f {
                return Ok(());
            }
            if let Some(rec) = shared.rec(this.id) {
                rec.device.disable_usage(usage);
            }
            Ok(())
        });

        methods.add_method("set_absinfo", |_, this, (raw, info): (u32, Table)| {
            let shared = this.shared.borrow();
            let usage = Usage::from_raw(raw);
            if usage.event_type() != EventType::ABS {
                return Ok(());
            }
            let Some(rec) = shared.rec(this.id) else {
                return Ok(());
            };

            let abs = Abs::from_raw(usage.code());
            let mut absinfo = rec.device.abs_info(abs).unwrap_or(AbsInfo::new(0, 0));
            if let Ok(minimum) = info.get::<i32>("minimum") {
                absinfo = absinfo.with_minimum(minimum);
            }
            if let Ok(maximum) = info.get::<i32>("maximum") {
                absinfo = absinfo.with_maximum(maximum);
            }
            if let Ok(resolution) = info.get::<i32>("resolution") {
                absinfo = absinfo.with_resolution(resolution);
            }
            if let Ok(fuzz) = info.get::<i32>("fuzz") {
                absinfo = absinfo.with_fuzz(fuzz);
            }
            if let Ok(flat) = info.get::<i32>("flat") {
                absinfo = absinfo.with_flat(flat);
            }
            rec.device.set_abs_info(abs, absinfo);
            Ok(())
        });

        methods.add_method("connect", |lua, this, (signal, func): (String, Function)| {
            let key = lua.create_registry_value(func)?;
            let mut shared = this.shared.borrow_mut();
            // A dead record means the device was removed; quietly drop the
            // connect call.
            let Some(idx) = shared
                .devices
                .iter()
                .position(|rec| rec.alive && rec.device.id() == this.id)
            else {
                return Ok(());
            };
            match signal.as_str() {
                "device-removed" => shared.devices[idx].removed_key = Some(key),
                "evdev-frame" => {
                    shared.devices[idx].frame_key = Some(key);
                    let device = shared.devices[idx].device.clone();
                    shared.pending.frame_events.push((device, true));
                }
                _ => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "Unknown name: {signal}"
                    )));
                }
            }
            Ok(())
        });

        methods.add_method("disconnect", |_, this, signal: String| {
            let mut shared = this.shared.borrow_mut();
            let Some(idx) = shared
                .devices
                .iter()
                .position(|rec| rec.alive && rec.device.id() == this.id)
            else {
                return Ok(());
            };
            match signal.as_str() {
                "device-removed" => shared.devices[idx].removed_key = None,
                "evdev-frame" => {
                    shared.devices[idx].frame_key = None;
                    let device = shared.devices[idx].device.clone();
                    shared.pending.frame_events.push((device, false));
                }
                _ => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "Unknown name: {signal}"
                    )));
                }
            }
            Ok(())
        });

        methods.add_method("inject_frame", |_, this, events: Table| {
            let mut shared = this.shared.borrow_mut();
            if !shared.in_timer {
                return Err(mlua::Error::RuntimeError(
                    "Injecting events only possible in a timer func".into(),
                ));
            }
            let frame = frame_from_table(&events, shared.now)?;
            let device = shared.rec(this.id).map(|rec| rec.device.clone());
            if let Some(device) = device {
                shared
                    .pending
                    .frames
                    .push((QueueOp::Inject, device, frame));
            }
            Ok(())
        });

        methods.add_method("prepend_frame", |_, this, events: Table| {
            let mut shared = this.shared.borrow_mut();
            let frame = frame_from_table(&events, shared.now)?;
            let device = shared.rec(this.id).map(|rec| rec.device.clone());
            if let Some(device) = device {
                shared
                    .pending
                    .frames
                    .push((QueueOp::Prepend, device, frame));
            }
            Ok(())
        });

        methods.add_method("append_frame", |_, this, events: Table| {
            let mut shared = this.shared.borrow_mut();
            let frame = frame_from_table(&events, shared.now)?;
            let device = shared.rec(this.id).map(|rec| rec.device.clone());
            if let Some(device) = device {
                shared
                    .pending
                    .frames
                    .push((QueueOp::Append, device, frame));
            }
            Ok(())
        });
    }
}

/// One sandboxed script plugin.
pub struct LuaPlugin {
    lua: Lua,
    shared: Rc<RefCell<HostState>>,
    /// The loaded chunk, executed from `run`.
    chunk_key: Option<RegistryKey>,
}

impl std::fmt::Debug for LuaPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("LuaPlugin")
            .field("name", &shared.name)
            .field("registered", &shared.registered)
            .field("devices", &shared.devices.len())
            .finish()
    }
}

impl LuaPlugin {
    /// Compiles `source` in a fresh sandbox. Fails on syntax errors.
    pub fn new(name: &str, source: &str) -> mlua::Result<Self> {
        let lua = Lua::new();
        let shared = Rc::new(RefCell::new(HostState {
            name: name.into(),
            registered: false,
            version: PLUGIN_VERSION,
            now: 0,
            in_timer: false,
            device_new_key: None,
            timer_expired_key: None,
            devices: Vec::new(),
            pending: PendingOps::default(),
        }));

        let env = build_sandbox(&lua, &shared)?;
        let chunk = lua
            .load(source)
            .set_name(name)
            .set_environment(env)
            .into_function()?;
        let chunk_key = Some(lua.create_registry_value(chunk)?);

        Ok(Self {
            lua,
            shared,
            chunk_key,
        })
    }

    fn name(&self) -> Rc<str> {
        self.shared.borrow().name.clone()
    }

    /// Runs one script callback and applies everything the script requested.
    /// On a script error the plugin unregisters itself; the sentinel from
    /// `libinput:unregister()` is not reported as a bug.
    fn call_script(&mut self, ctx: &mut PluginContext, func: Function, args: MultiValue) -> Option<Value> {
        self.shared.borrow_mut().now = ctx.now();

        let result = func.call::<Value>(args);
        self.drain_pending(ctx);

        match result {
            Ok(value) => Some(value),
            Err(err) => {
                let message = err.to_string();
                if !message.contains(UNREGISTER_SENTINEL) {
                    log::error!(
                        "plugin bug: {}: unloading after error: {message}",
                        self.name(),
                    );
                }
                ctx.cancel_timer(TIMER);
                ctx.unregister();
                None
            }
        }
    }

    fn drain_pending(&mut self, ctx: &mut PluginContext) {
        let pending = std::mem::take(&mut self.shared.borrow_mut().pending);

        for (device, enable) in pending.frame_events {
            ctx.enable_frame_events(&device, enable);
        }
        for (op, device, frame) in pending.frames {
            match op {
                QueueOp::Prepend => ctx.prepend_frame(&device, frame),
                QueueOp::Append => ctx.append_frame(&device, frame),
                QueueOp::Inject => ctx.inject_frame(&device, frame),
            }
        }
        for op in pending.timer_ops {
            match op {
                TimerPending::Set(expire) => ctx.set_timer(TIMER, expire),
                TimerPending::Cancel => ctx.cancel_timer(TIMER),
            }
        }
    }

    fn registry_function(&self, key: &RegistryKey) -> Option<Function> {
        self.lua.registry_value(key).ok()
    }

    /// Drops a device record, invoking the script's `device-removed` handler
    /// first.
    fn remove_device(&mut self, ctx: &mut PluginContext, device: &Device) {
        let handler = {
            let shared = self.shared.borrow();
            let Some(rec) = shared.rec(device.id()) else {
                return;
            };
            match &rec.removed_key {
                Some(key) => match (
                    self.registry_function(key),
                    self.lua.registry_value::<AnyUserData>(&rec.ud_key).ok(),
                ) {
                    (Some(func), Some(ud)) => Some((func, ud)),
                    _ => None,
                },
                None => None,
            }
        };

        if let Some((func, ud)) = handler {
            let args = MultiValue::from_iter([Value::UserData(ud)]);
            let _ = self.call_script(ctx, func, args);
        }

        let mut shared = self.shared.borrow_mut();
        if let Some(rec) = shared.rec_mut(device.id()) {
            rec.alive = false;
            rec.frame_key = None;
            rec.removed_key = None;
        }
        shared.devices.retain(|rec| rec.alive);
    }
}

impl Plugin for LuaPlugin {
    fn run(&mut self, ctx: &mut PluginContext) {
        let Some(key) = self.chunk_key.take() else {
            return;
        };
        let Some(chunk) = self.registry_function(&key) else {
            return;
        };

        if self.call_script(ctx, chunk, MultiValue::new()).is_some()
            && !self.shared.borrow().registered
        {
            log::error!(
                "plugin bug: {}: plugin never registered, unloading plugin",
                self.name(),
            );
            ctx.unregister();
        }
    }

    fn device_new(&mut self, ctx: &mut PluginContext, device: &Device) {
        let ud = match self.lua.create_userdata(ScriptDevice {
            shared: self.shared.clone(),
            id: device.id(),
        }) {
            Ok(ud) => ud,
            Err(err) => {
                log::error!("plugin bug: {}: {err}", self.name());
                return;
            }
        };

        let Ok(ud_key) = self.lua.create_registry_value(ud.clone()) else {
            return;
        };

        self.shared.borrow_mut().devices.push(ScriptDeviceRec {
            device: device.clone(),
            alive: true,
            ud_key,
            frame_key: None,
            removed_key: None,
        });

        let handler = self
            .shared
            .borrow()
            .device_new_key
            .as_ref()
            .and_then(|key| self.registry_function(key));
        if let Some(func) = handler {
            let args = MultiValue::from_iter([Value::UserData(ud)]);
            let _ = self.call_script(ctx, func, args);
        }
    }

    fn device_ignored(&mut self, ctx: &mut PluginContext, device: &Device) {
        self.remove_device(ctx, device);
    }

    fn device_removed(&mut self, ctx: &mut PluginContext, device: &Device) {
        self.remove_device(ctx, device);
    }

    fn evdev_frame(&mut self, ctx: &mut PluginContext, device: &Device, frame: &mut EvdevFrame) {
        let handler = {
            let shared = self.shared.borrow();
            let Some(rec) = shared.rec(device.id()) else {
                return;
            };
            let Some(frame_key) = &rec.frame_key else {
                return;
            };
            match (
                self.registry_function(frame_key),
                self.lua.registry_value::<AnyUserData>(&rec.ud_key).ok(),
            ) {
                (Some(func), Some(ud)) => (func, ud),
                _ => return,
            }
        };

        let events = match frame_to_table(&self.lua, frame) {
            Ok(events) => events,
            Err(err) => {
                log::error!("plugin bug: {}: {err}", self.name());
                return;
            }
        };

        let args = MultiValue::from_iter([
            Value::UserData(handler.1),
            Value::Table(events),
            Value::Integer(frame.time() as i64),
        ]);
        let Some(result) = self.call_script(ctx, handler.0, args) else {
            return;
        };

        // nil keeps the frame; a table in the same shape replaces its
        // contents; anything else is a plugin bug.
        match result {
            Value::Nil => {}
            Value::Table(table) => match events_from_table(&table) {
                Ok(events) => {
                    let _ = frame.set(&events);
                }
                Err(err) => {
                    log::error!(
                        "plugin bug: {}: unloading after error: {err}",
                        self.name(),
                    );
                    ctx.cancel_timer(TIMER);
                    ctx.unregister();
                }
            },
            other => {
                log::error!(
                    "plugin bug: {}: expected table like `{{ events = {{ ... }} }}`, got {}",
                    self.name(),
                    other.type_name(),
                );
                ctx.cancel_timer(TIMER);
                ctx.unregister();
            }
        }
    }

    fn timer_expired(&mut self, ctx: &mut PluginContext, _timer: TimerToken, now: u64) {
        let handler = self
            .shared
            .borrow()
            .timer_expired_key
            .as_ref()
            .and_then(|key| self.registry_function(key));
        let Some(func) = handler else {
            return;
        };

        // Frames injected while the handler runs are queued and delivered
        // once it returns.
        self.shared.borrow_mut().in_timer = true;
        let args = MultiValue::from_iter([Value::Integer(now as i64)]);
        let _ = self.call_script(ctx, func, args);
        self.shared.borrow_mut().in_timer = false;
    }
}

/// Builds the sandbox environment table: a curated slice of the standard
/// library plus our globals. The environment has no metatable fallback, so
/// io, os, and friends simply do not exist.
fn build_sandbox(lua: &Lua, shared: &Rc<RefCell<HostState>>) -> mlua::Result<Table> {
    let env = lua.create_table()?;
    let globals = lua.globals();

    // See http://lua-users.org/wiki/SandBoxes for the reasoning; math,
    // string, and table are safe given each plugin has its own state.
    const ALLOWED_FUNCS: &[&str] = &[
        "assert", "error", "ipairs", "next", "pcall", "pairs", "print", "tonumber", "tostring",
        "type", "unpack", "xpcall",
    ];
    for name in ALLOWED_FUNCS {
        let value: Value = globals.get(*name)?;
        if !matches!(value, Value::Nil) {
            env.set(*name, value)?;
        }
    }
    for module in ["math", "table", "string"] {
        let value: Value = globals.get(module)?;
        env.set(module, value)?;
    }

    // log.debug() and friends.
    let log_table = lua.create_table()?;
    for (name, level) in [
        ("debug", log::Level::Debug),
        ("info", log::Level::Info),
        ("error", log::Level::Error),
    ] {
        let plugin_name = shared.borrow().name.clone();
        log_table.set(
            name,
            lua.create_function(move |_, message: String| {
                log::log!(level, "{plugin_name}: {message}");
                Ok(())
            })?,
        )?;
    }
    env.set("log", log_table)?;

    env.set("evdev", build_evdev_table(lua)?)?;
    env.set("libinput", build_libinput_table(lua, shared)?)?;

    Ok(env)
}

/// The `libinput` global object.
fn build_libinput_table(lua: &Lua, shared: &Rc<RefCell<HostState>>) -> mlua::Result<Table> {
    let libinput = lua.create_table()?;

    let state = shared.clone();
    libinput.set(
        "now",
        lua.create_function(move |_, _this: Value| Ok(state.borrow().now))?,
    )?;

    let state = shared.clone();
    libinput.set(
        "version",
        lua.create_function(move |_, _this: Value| Ok(state.borrow().version))?,
    )?;

    let state = shared.clone();
    libinput.set(
        "register",
        lua.create_function(move |_, (_this, versions): (Value, Table)| {
            let mut state = state.borrow_mut();
            if state.registered {
                return Err(mlua::Error::RuntimeError(
                    "plugin already registered".into(),
                ));
            }

            for version in versions.sequence_values::<i64>() {
                let version = version?;
                if version <= 0 {
                    return Err(mlua::Error::RuntimeError("Invalid version number".into()));
                }
                if version == PLUGIN_VERSION as i64 {
                    state.version = PLUGIN_VERSION;
                    state.registered = true;
                    return Ok(state.version);
                }
            }

            Err(mlua::Error::RuntimeError(
                "None of this plugin's versions are supported".into(),
            ))
        })?,
    )?;

    libinput.set(
        "unregister",
        lua.create_function(|_, _this: Value| -> mlua::Result<()> {
            // Unregister works like os.exit(): raise a recognizable error
            // and let the error path unwind without logging it as a bug.
            Err(mlua::Error::RuntimeError(UNREGISTER_SENTINEL.into()))
        })?,
    )?;

    let state = shared.clone();
    libinput.set(
        "connect",
        lua.create_function(
            move |lua, (_this, signal, func): (Value, String, Function)| {
                let key = lua.create_registry_value(func)?;
                let mut state = state.borrow_mut();
                match signal.as_str() {
                    "new-evdev-device" => state.device_new_key = Some(key),
                    "timer-expired" => state.timer_expired_key = Some(key),
                    _ => {
                        return Err(mlua::Error::RuntimeError(format!(
                            "Unknown name: {signal}"
                        )));
                    }
                }
                Ok(())
            },
        )?,
    )?;

    let state = shared.clone();
    libinput.set(
        "timer_set_absolute",
        lua.create_function(move |_, (_this, expire): (Value, u64)| {
            state
                .borrow_mut()
                .pending
                .timer_ops
                .push(TimerPending::Set(expire));
            Ok(())
        })?,
    )?;

    let state = shared.clone();
    libinput.set(
        "timer_set_relative",
        lua.create_function(move |_, (_this, timeout): (Value, u64)| {
            let mut state = state.borrow_mut();
            let expire = state.now + timeout;
            state.pending.timer_ops.push(TimerPending::Set(expire));
            Ok(())
        })?,
    )?;

    let state = shared.clone();
    libinput.set(
        "timer_cancel",
        lua.create_function(move |_, _this: Value| {
            state
                .borrow_mut()
                .pending
                .timer_ops
                .push(TimerPending::Cancel);
            Ok(())
        })?,
    )?;

    Ok(libinput)
}

/// The `evdev` table: usage names to numeric usages, plus bus constants.
fn build_evdev_table(lua: &Lua) -> mlua::Result<Table> {
    let evdev = lua.create_table()?;

    for &(name, code) in Syn::names() {
        evdev.set(format!("SYN_{name}"), Usage::new(EventType::SYN, code).raw())?;
    }
    for &(name, code) in Key::names() {
        // Key constants already carry their KEY_/BTN_ prefix.
        evdev.set(name, Usage::new(EventType::KEY, code).raw())?;
    }
    for &(name, code) in Rel::names() {
        evdev.set(format!("REL_{name}"), Usage::new(EventType::REL, code).raw())?;
    }
    for &(name, code) in Abs::names() {
        evdev.set(format!("ABS_{name}"), Usage::new(EventType::ABS, code).raw())?;
    }
    for &(name, code) in Switch::names() {
        evdev.set(format!("SW_{name}"), Usage::new(EventType::SW, code).raw())?;
    }
    for &(name, code) in Misc::names() {
        evdev.set(format!("MSC_{name}"), Usage::new(EventType::MSC, code).raw())?;
    }

    for &(name, bus) in Bus::names() {
        evdev.set(format!("BUS_{name}"), bus)?;
    }

    Ok(evdev)
}

/// Loads every `*.lua` file in `dir` as an independent plugin instance, in
/// lexical order. Scripts that fail to compile are skipped with an error
/// log; the rest still load.
///
/// Returns the number of plugins registered.
pub fn load_script_dir(system: &mut PluginSystem, dir: &Path) -> io::Result<usize> {
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "lua"))
        .collect();
    paths.sort();

    let mut loaded = 0;
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source = fs::read_to_string(&path)?;

        match LuaPlugin::new(&name, &source) {
            Ok(plugin) => {
                system.register(&name, plugin);
                loaded += 1;
            }
            Err(err) => {
                log::error!("plugin bug: failed to load {}: {err}", path.display());
            }
        }
    }

    Ok(loaded)
}
