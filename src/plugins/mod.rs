//! The built-in pipeline plugins.

pub mod debounce;
pub mod double_tool;
pub mod eraser_button;
pub mod forced_tool;
pub mod proximity_timer;
pub mod wheel_lowres;

pub use debounce::ButtonDebouncePlugin;
pub use double_tool::DoubleToolPlugin;
pub use eraser_button::EraserButtonPlugin;
pub use forced_tool::ForcedToolPlugin;
pub use proximity_timer::ProximityTimerPlugin;
pub use wheel_lowres::WheelLowresPlugin;

use crate::system::PluginSystem;

/// Registers the built-in plugins in their canonical pipeline order.
///
/// The raw-quirk normalizers (double tool, forced tool, proximity timer) run
/// before the eraser-button rewriting so the latter sees trustworthy tool
/// bits. Scripted plugins are typically loaded after these, so they observe
/// the already-normalized event stream.
pub fn register_builtin_plugins(system: &mut PluginSystem) {
    system.register("mouse-wheel-lowres", WheelLowresPlugin::new());
    system.register("button-debounce", ButtonDebouncePlugin::new());
    system.register("tablet-double-tool", DoubleToolPlugin::new());
    system.register("tablet-forced-tool", ForcedToolPlugin::new());
    system.register("tablet-proximity-timer", ProximityTimerPlugin::new());
    system.register("tablet-eraser-button", EraserButtonPlugin::new());
}
