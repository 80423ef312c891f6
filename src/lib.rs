//! A plugin pipeline for evdev event frames.
//!
//! Every SYN_REPORT-delimited batch of kernel input events is assembled into
//! an [`EvdevFrame`] and pushed through an ordered list of plugins, each of
//! which may rewrite, drop, or supplement the frame before it reaches the
//! consumer. The built-in plugins normalize hardware quirks: button contact
//! bounce, tablets with contradictory tool bits, missing proximity events,
//! and wheels without high-resolution axes. User-provided Lua scripts hook
//! into the same pipeline through a sandboxed host.
//!
//! The pipeline is single-threaded and driven entirely by the caller: feed
//! frames with [`PluginSystem::dispatch`] and advance time with
//! [`PluginSystem::flush_timers`].
//!
//! ```no_run
//! use evpipe::{
//!     DeviceBuilder, DeviceCapability, EvdevFrame, PluginSystem,
//!     plugins::register_builtin_plugins,
//! };
//!
//! let mut system = PluginSystem::new();
//! system.set_sink(|device: &evpipe::Device, frame: &EvdevFrame| {
//!     println!("{}: {:?}", device.name(), frame);
//! });
//! register_builtin_plugins(&mut system);
//!
//! let mouse = DeviceBuilder::new("Example Mouse", "event0")
//!     .capability(DeviceCapability::POINTER)
//!     .build();
//! system.device_new(&mouse);
//! system.device_added(&mouse);
//! // frames from the event source now go through system.dispatch()
//! ```

#![warn(missing_debug_implementations)]

#[macro_use]
mod macros;

mod abs_info;
mod device;
pub mod event;
mod frame;
mod input_id;
pub mod lua;
mod plugin;
pub mod plugins;
mod raw;
mod system;
pub mod tfd;

pub use abs_info::AbsInfo;
pub use device::{Device, DeviceBuilder, DeviceCapability, DeviceId, quirks};
pub use event::{Event, EventType, InputEvent, Usage};
pub use frame::{EvdevFrame, FrameError, FrameHandle};
pub use input_id::{Bus, InputId};
pub use lua::{LuaPlugin, load_script_dir};
pub use plugin::{EraserButtonMode, Plugin, PluginContext, TimerToken, ToolConfig};
pub use system::{FrameSink, PluginSystem};
