//! End-to-end scenarios through the full built-in plugin stack.

use std::{cell::RefCell, rc::Rc};

use evpipe::{
    Device, DeviceBuilder, DeviceCapability, EvdevFrame, PluginSystem, Usage,
    plugins::register_builtin_plugins,
};

struct Harness {
    system: PluginSystem,
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
        register_builtin_plugins(&mut system);

        Self { system, emitted }
    }

    fn add_device(&mut self, device: &Device) {
        self.system.device_new(device);
        self.system.device_added(device);
    }

    fn frame(&mut self, device: &Device, events: &[(Usage, i32)], time_ms: u64) {
        let mut frame = EvdevFrame::new(64);
        for (usage, value) in events {
            frame.append_one(*usage, *value).unwrap();
        }
        frame.set_time(time_ms * 1000);
        self.system.dispatch(device, frame);
    }

    fn emitted(&self) -> Vec<(Vec<(Usage, i32)>, u64)> {
        self.emitted.borrow().clone()
    }

    fn emitted_events(&self) -> Vec<(Usage, i32, u64)> {
        self.emitted()
            .iter()
            .flat_map(|(events, time)| {
                events
                    .iter()
                    .map(|(usage, value)| (*usage, *value, *time))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

fn mouse() -> Device {
    DeviceBuilder::new("Test Mouse", "event10")
        .capability(DeviceCapability::POINTER)
        .usage(Usage::BTN_LEFT)
        .usage(Usage::BTN_RIGHT)
        .usage(Usage::REL_X)
        .usage(Usage::REL_Y)
        .usage(Usage::REL_WHEEL)
        .build()
}

fn quirky_tablet() -> Device {
    DeviceBuilder::new("Test Pen Tablet", "event11")
        .capability(DeviceCapability::TABLET_TOOL)
        .usage(Usage::ABS_X)
        .usage(Usage::ABS_Y)
        .usage(Usage::ABS_PRESSURE)
        .build()
}

#[test]
fn every_emitted_frame_is_well_formed() {
    // A frame that survives the pipeline ends in exactly one SYN_REPORT.
    let counted = Rc::new(RefCell::new(0u32));
    let mut system = PluginSystem::new();
    {
        let counted = counted.clone();
        system.set_sink(move |_: &Device, frame: &EvdevFrame| {
            assert!(frame.count() >= 1);
            let syns = frame
                .events()
                .iter()
                .filter(|ev| ev.is_syn_report())
                .count();
            assert_eq!(syns, 1);
            assert!(frame.events().last().unwrap().is_syn_report());
            *counted.borrow_mut() += 1;
        });
    }
    register_builtin_plugins(&mut system);

    let device = mouse();
    system.device_new(&device);
    system.device_added(&device);

    for (i, events) in [
        vec![(Usage::BTN_LEFT, 1)],
        vec![(Usage::REL_X, 5), (Usage::REL_Y, -3)],
        vec![(Usage::REL_WHEEL, 1)],
        vec![(Usage::BTN_LEFT, 0)],
    ]
    .iter()
    .enumerate()
    {
        let mut frame = EvdevFrame::new(64);
        for (usage, value) in events {
            frame.append_one(*usage, *value).unwrap();
        }
        frame.set_time((i as u64 + 1) * 100_000);
        system.dispatch(&device, frame);
    }

    assert_eq!(*counted.borrow(), 4);
}

#[test]
fn mouse_bounce_is_filtered_by_the_full_stack() {
    let mut h = Harness::new();
    let device = mouse();
    h.add_device(&device);

    h.frame(&device, &[(Usage::BTN_LEFT, 1)], 0);
    h.frame(&device, &[(Usage::BTN_LEFT, 0)], 5);
    h.frame(&device, &[(Usage::BTN_LEFT, 1)], 10);
    h.frame(&device, &[(Usage::BTN_LEFT, 0)], 100);
    h.system.flush_timers(300_000);

    assert_eq!(
        h.emitted_events(),
        vec![(Usage::BTN_LEFT, 1, 0), (Usage::BTN_LEFT, 0, 100)]
    );
}

#[test]
fn wheel_and_motion_pass_through_with_hi_res() {
    let mut h = Harness::new();
    let device = mouse();
    h.add_device(&device);
    assert!(device.has_usage(Usage::REL_WHEEL_HI_RES));

    h.frame(&device, &[(Usage::REL_X, 2), (Usage::REL_WHEEL, 1)], 10);

    assert_eq!(
        h.emitted(),
        vec![(
            vec![
                (Usage::REL_X, 2),
                (Usage::REL_WHEEL, 1),
                (Usage::REL_WHEEL_HI_RES, 120),
            ],
            10
        )]
    );
}

#[test]
fn toolless_tablet_gets_pen_proximity_managed() {
    // A tablet that reports bare axis frames: the forced-tool plugin keeps a
    // pen bit on every frame, and the proximity timer synthesizes the
    // missing prox-out after 50ms of silence.
    let mut h = Harness::new();
    let device = quirky_tablet();
    h.add_device(&device);

    h.frame(&device, &[(Usage::ABS_X, 100)], 0);
    h.frame(&device, &[(Usage::ABS_X, 101), (Usage::ABS_Y, 50)], 10);

    h.system.flush_timers(60_000);

    // Forced prox-in again once the pen reappears.
    h.frame(&device, &[(Usage::ABS_X, 102)], 100);

    let emitted = h.emitted();
    assert_eq!(
        emitted[0],
        (vec![(Usage::ABS_X, 100), (Usage::BTN_TOOL_PEN, 1)], 0)
    );
    assert_eq!(
        emitted[1],
        (
            vec![
                (Usage::ABS_X, 101),
                (Usage::ABS_Y, 50),
                (Usage::BTN_TOOL_PEN, 1),
            ],
            10
        )
    );
    // The synthesized prox-out after the idle window.
    assert_eq!(emitted[2], (vec![(Usage::BTN_TOOL_PEN, 0)], 60));
    assert_eq!(
        emitted[3],
        (vec![(Usage::ABS_X, 102), (Usage::BTN_TOOL_PEN, 1)], 100)
    );
}

#[test]
fn double_tool_tablet_switches_to_the_eraser() {
    let mut h = Harness::new();
    let device = DeviceBuilder::new("Test Pen Tablet", "event12")
        .capability(DeviceCapability::TABLET_TOOL)
        .usage(Usage::BTN_TOOL_PEN)
        .usage(Usage::BTN_TOOL_RUBBER)
        .usage(Usage::ABS_X)
        .build();
    h.add_device(&device);

    // Keep the frames close enough together that the proximity timer stays
    // quiet.
    h.frame(&device, &[(Usage::BTN_TOOL_PEN, 1), (Usage::ABS_X, 10)], 0);
    h.frame(&device, &[(Usage::BTN_TOOL_RUBBER, 1), (Usage::ABS_X, 11)], 10);

    let emitted = h.emitted();
    assert_eq!(
        emitted[0],
        (vec![(Usage::ABS_X, 10), (Usage::BTN_TOOL_PEN, 1)], 0)
    );
    assert_eq!(
        emitted[1],
        (vec![(Usage::ABS_X, 11), (Usage::BTN_TOOL_PEN, 0)], 10)
    );
    assert_eq!(
        emitted[2],
        (vec![(Usage::ABS_X, 11), (Usage::BTN_TOOL_RUBBER, 1)], 10)
    );
    assert_eq!(emitted.len(), 3);
}

#[test]
fn devices_are_independent() {
    let mut h = Harness::new();
    let mouse = mouse();
    let tablet = quirky_tablet();
    h.add_device(&mouse);
    h.add_device(&tablet);

    h.frame(&mouse, &[(Usage::BTN_LEFT, 1)], 0);
    h.frame(&tablet, &[(Usage::ABS_X, 7)], 5);
    h.frame(&mouse, &[(Usage::BTN_LEFT, 0)], 100);

    let events = h.emitted_events();
    assert_eq!(events[0], (Usage::BTN_LEFT, 1, 0));
    assert_eq!(events[1], (Usage::ABS_X, 7, 5));
    assert_eq!(events[2], (Usage::BTN_TOOL_PEN, 1, 5));
    // The tablet went idle past its proximity window while the mouse kept
    // going.
    assert_eq!(events[3], (Usage::BTN_TOOL_PEN, 0, 100));
    assert_eq!(events[4], (Usage::BTN_LEFT, 0, 100));
}

#[test]
fn removed_devices_stop_flowing() {
    let mut h = Harness::new();
    let device = mouse();
    h.add_device(&device);

    h.frame(&device, &[(Usage::REL_X, 1)], 0);
    h.system.device_removed(&device);

    // Dispatching for a removed device is a caller bug; the frame is
    // dropped.
    h.frame(&device, &[(Usage::REL_X, 2)], 10);

    assert_eq!(h.emitted_events(), vec![(Usage::REL_X, 1, 0)]);
}
