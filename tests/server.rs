use tessera::compositor::blend::blend_pixel;
use tessera::compositor::cursor::CursorRef;
use tessera::compositor::screen::MemoryScreen;
use tessera::input::{key_input, RawInput};
use tessera::shared::LocalBuffer;
use tessera::{Config, DisplayServer, ServerNotice};
use tessera_proto::{Buttons, ClientId, Command, Event, Modifiers, Rect, Region, WindowId};

const BACKGROUND: u32 = 0xff10_2030;
const RED: u32 = 0xffff_0000;
const GREEN: u32 = 0xff00_ff00;

fn config() -> Config {
    let mut config = Config::default();
    config.display.width = 200;
    config.display.height = 200;
    config.compositor.background = BACKGROUND;
    config.compositor.software_cursor = false;
    config.screensaver.enabled = false;
    config
}

fn server_with(config: Config) -> DisplayServer {
    let (w, h) = (config.display.width, config.display.height);
    let mut server = DisplayServer::new(config, Box::new(MemoryScreen::new(w, h)));
    server.start();
    server.take_notices();
    server
}

fn server() -> DisplayServer {
    server_with(config())
}

fn pixel(server: &DisplayServer, x: i32, y: i32) -> u32 {
    let width = server.screen().width() as usize;
    server.screen().pixels()[y as usize * width + x as usize]
}

fn damage(notices: &[ServerNotice]) -> Region {
    notices
        .iter()
        .filter_map(|n| match n {
            ServerNotice::Damage { region } => Some(region.clone()),
            _ => None,
        })
        .fold(Region::new(), |acc, r| acc.union(&r))
}

fn granted_id(server: &mut DisplayServer, client: ClientId) -> WindowId {
    server
        .take_events(client)
        .into_iter()
        .find_map(|e| match e {
            Event::Creation { first_id, .. } => Some(first_id),
            _ => None,
        })
        .unwrap()
}

fn solid(server: &mut DisplayServer, owner: ClientId, rect: Rect, color: u32) -> WindowId {
    server
        .create_local_window(
            owner,
            Region::from_rect(rect),
            LocalBuffer::new(rect.width as u32, rect.height as u32, color),
        )
        .unwrap()
}

fn mouse_targets(events: Vec<Event>) -> Vec<WindowId> {
    events
        .into_iter()
        .filter_map(|e| match e {
            Event::Mouse { window, .. } => Some(window),
            _ => None,
        })
        .collect()
}

#[test]
fn destroyed_window_is_replaced_by_background() {
    let mut server = server();
    let client = server.connect_local();
    let window = granted_id(&mut server, client);

    let rect = Region::from_rect(Rect::new(0, 0, 100, 100));
    server.queue_command(
        client,
        Command::Region {
            window,
            shm_key: 0,
            width: 100,
            height: 100,
            opaque: true,
            region: rect.clone(),
        },
    );
    server.dispatch_pending();
    assert_eq!(
        server.take_events(client),
        vec![Event::RegionModified {
            window,
            ack: true,
            region: rect.clone()
        }]
    );
    server.take_notices();

    server.queue_command(client, Command::RegionDestroy { window });
    server.dispatch_pending();
    let notices = server.take_notices();
    assert_eq!(damage(&notices), rect);
    assert!(notices.contains(&ServerNotice::WindowDestroyed {
        window,
        owner: client
    }));
    assert_eq!(pixel(&server, 0, 0), BACKGROUND);
    assert_eq!(pixel(&server, 99, 99), BACKGROUND);
}

#[test]
fn raise_repaints_only_the_overlap() {
    let mut server = server();
    let a = server.connect_local();
    let b = server.connect_local();
    let lower = solid(&mut server, a, Rect::new(0, 0, 50, 50), RED);
    let upper = solid(&mut server, b, Rect::new(25, 0, 50, 50), GREEN);
    assert_eq!(server.windows().index_of(upper), Some(0));
    assert_eq!(pixel(&server, 30, 10), GREEN);
    server.take_notices();

    server.queue_command(
        a,
        Command::ChangeAltitude {
            window: lower,
            altitude: 0,
            fixed: false,
        },
    );
    server.dispatch_pending();
    assert_eq!(
        damage(&server.take_notices()),
        Region::from_rect(Rect::new(25, 0, 25, 50))
    );
    assert_eq!(server.windows().index_of(lower), Some(0));
    assert_eq!(pixel(&server, 30, 10), RED);
    assert_eq!(pixel(&server, 60, 10), GREEN);
}

#[test]
fn local_painting_shows_up() {
    let mut server = server();
    let client = server.connect_local();
    let window = solid(&mut server, client, Rect::new(10, 10, 20, 20), RED);
    server.take_notices();
    server
        .paint_local(window, |buffer| buffer.fill(GREEN))
        .unwrap();
    assert_eq!(pixel(&server, 15, 15), GREEN);
    assert_eq!(
        damage(&server.take_notices()),
        Region::from_rect(Rect::new(10, 10, 20, 20))
    );
    assert!(server.paint_local(9999, |_| {}).is_err());
}

#[test]
fn override_cursor_wins_over_window_cursor() {
    let mut config = config();
    config.compositor.software_cursor = true;
    let mut server = server_with(config);
    let client = server.connect_local();
    let window = solid(&mut server, client, Rect::new(0, 0, 100, 100), GREEN);
    server.queue_command(client, Command::SelectCursor { window, id: u32::MAX });
    server.dispatch_pending();
    // Blank cursor: nothing drawn at the hotspot
    assert_eq!(pixel(&server, 0, 0), GREEN);

    server.push_override_cursor(CursorRef::ARROW);
    assert_eq!(pixel(&server, 0, 0), 0xff00_0000);
    server.pop_override_cursor();
    assert_eq!(pixel(&server, 0, 0), GREEN);
}

#[test]
fn front_window_hides_the_one_behind() {
    let mut server = server();
    let client = server.connect_local();
    solid(&mut server, client, Rect::new(0, 0, 100, 100), GREEN);
    solid(&mut server, client, Rect::new(20, 20, 40, 40), RED);
    assert_eq!(pixel(&server, 30, 30), RED);
    assert_eq!(pixel(&server, 10, 10), GREEN);
    assert_eq!(pixel(&server, 150, 150), BACKGROUND);
}

#[test]
fn opacity_bounds() {
    let mut server = server();
    let client = server.connect_local();
    solid(&mut server, client, Rect::new(0, 0, 100, 100), GREEN);
    let top = solid(&mut server, client, Rect::new(0, 0, 50, 50), RED);

    let set = |server: &mut DisplayServer, opacity: u8| {
        server.queue_command(client, Command::SetOpacity { window: top, opacity });
        server.dispatch_pending();
        pixel(server, 10, 10)
    };
    assert_eq!(set(&mut server, 0), GREEN);
    assert_eq!(set(&mut server, 128), blend_pixel(RED, GREEN, 128));
    assert_eq!(set(&mut server, 255), RED);
}

#[test]
fn repeated_repaint_is_stable() {
    let mut server = server();
    let client = server.connect_local();
    solid(&mut server, client, Rect::new(0, 0, 100, 100), GREEN);
    let top = solid(&mut server, client, Rect::new(30, 30, 50, 50), RED);
    server.queue_command(client, Command::SetOpacity { window: top, opacity: 90 });
    server.dispatch_pending();
    let first = server.screen().pixels().to_vec();

    for _ in 0..2 {
        server.queue_command(
            client,
            Command::RepaintRegion {
                window: top,
                region: Region::from_rect(Rect::new(0, 0, 200, 200)),
            },
        );
        server.dispatch_pending();
    }
    assert_eq!(server.screen().pixels(), &first[..]);
}

#[test]
fn button_press_grabs_until_release() {
    let mut server = server();
    let a = server.connect_local();
    let b = server.connect_local();
    let wa = solid(&mut server, a, Rect::new(0, 0, 100, 100), RED);
    let wb = solid(&mut server, b, Rect::new(100, 0, 100, 100), GREEN);
    server.take_events(a);
    server.take_events(b);

    let pointer = |x, y, buttons| RawInput::Pointer {
        x,
        y,
        buttons,
        wheel: 0,
    };
    server.handle_input(pointer(50, 50, Buttons::LEFT));
    server.handle_input(pointer(150, 50, Buttons::LEFT));
    server.handle_input(pointer(150, 50, Buttons::empty()));
    assert_eq!(mouse_targets(server.take_events(a)), vec![wa, wa, wa]);
    assert!(mouse_targets(server.take_events(b)).is_empty());

    server.handle_input(pointer(151, 50, Buttons::empty()));
    assert_eq!(mouse_targets(server.take_events(b)), vec![wb]);
}

#[test]
fn disconnect_releases_grabs_and_focus() {
    let mut server = server();
    let a = server.connect_local();
    let b = server.connect_local();
    let wb = solid(&mut server, b, Rect::new(0, 0, 200, 200), GREEN);
    let wa = solid(&mut server, a, Rect::new(0, 0, 50, 50), RED);
    server.queue_command(b, Command::RequestFocus { window: wb, gain: true });
    server.queue_command(a, Command::RequestFocus { window: wa, gain: true });
    server.queue_command(a, Command::GrabMouse { window: wa, grab: true });
    server.queue_command(a, Command::GrabKeyboard { window: wa, grab: true });
    server.dispatch_pending();
    assert_eq!(server.input().mouse_grabber(), Some(wa));
    server.take_events(b);

    server.disconnect_client(a);
    assert_eq!(server.input().mouse_grabber(), None);
    assert_eq!(server.input().keyboard_grabber(), None);
    assert_eq!(server.input().focused(), Some(wb));
    assert!(!server.windows().contains(wa));
    assert_eq!(pixel(&server, 10, 10), GREEN);

    server.handle_input(RawInput::Pointer {
        x: 10,
        y: 10,
        buttons: Buttons::empty(),
        wheel: 0,
    });
    server.handle_input(RawInput::Key(key_input(30, 'a' as u32, Modifiers::empty(), true)));
    let events = server.take_events(b);
    assert_eq!(events[0], Event::Focus { window: wb, gained: true });
    assert!(matches!(events[1], Event::Mouse { window, .. } if window == wb));
    assert!(matches!(events[2], Event::Key { window, unicode, .. } if window == wb && unicode == 'a' as u32));
}

#[test]
fn destroying_the_focused_window_tells_both_owners() {
    let mut server = server();
    let a = server.connect_local();
    let b = server.connect_local();
    let wb = solid(&mut server, b, Rect::new(0, 0, 100, 100), GREEN);
    let wa = solid(&mut server, a, Rect::new(50, 50, 100, 100), RED);
    server.queue_command(b, Command::RequestFocus { window: wb, gain: true });
    server.queue_command(a, Command::RequestFocus { window: wa, gain: true });
    server.dispatch_pending();
    server.take_events(a);
    server.take_events(b);

    server.queue_command(a, Command::RegionDestroy { window: wa });
    server.dispatch_pending();

    assert!(server.is_connected(a));
    assert!(server
        .take_events(a)
        .contains(&Event::Focus { window: wa, gained: false }));
    assert_eq!(
        server.take_events(b),
        vec![Event::Focus { window: wb, gained: true }]
    );
    assert_eq!(server.input().focused(), Some(wb));
}

#[test]
fn modal_window_limits_pointer_to_its_client() {
    let mut server = server();
    let a = server.connect_local();
    let b = server.connect_local();
    let wa = solid(&mut server, a, Rect::new(0, 0, 100, 100), RED);
    solid(&mut server, b, Rect::new(100, 0, 100, 100), GREEN);
    server.set_modal(Some(wa));
    server.take_events(b);

    server.handle_input(RawInput::Pointer {
        x: 150,
        y: 10,
        buttons: Buttons::LEFT,
        wheel: 0,
    });
    assert!(server.take_events(b).is_empty());
}

#[test]
fn stays_on_top_windows_stay_in_front() {
    let mut server = server();
    let client = server.connect_local();
    let pinned = solid(&mut server, client, Rect::new(0, 0, 10, 10), RED);
    server.queue_command(
        client,
        Command::ChangeAltitude {
            window: pinned,
            altitude: 1,
            fixed: true,
        },
    );
    server.dispatch_pending();

    let mut others = Vec::new();
    for i in 0..4 {
        others.push(solid(&mut server, client, Rect::new(i * 5, 0, 10, 10), GREEN));
    }
    server.queue_command(
        client,
        Command::ChangeAltitude {
            window: others[0],
            altitude: 0,
            fixed: false,
        },
    );
    server.dispatch_pending();
    assert_eq!(server.windows().index_of(pinned), Some(0));
    assert_eq!(server.windows().index_of(others[0]), Some(1));
    assert_eq!(pixel(&server, 2, 2), RED);

    server.queue_command(
        client,
        Command::ChangeAltitude {
            window: pinned,
            altitude: -1,
            fixed: false,
        },
    );
    server.dispatch_pending();
    assert_eq!(server.windows().index_of(pinned), Some(4));
    assert_eq!(pixel(&server, 2, 2), GREEN);
}

#[test]
fn screensaver_wake_swallows_input() {
    let mut config = config();
    config.screensaver.enabled = true;
    config.screensaver.timeouts_ms = vec![10];
    let mut server = server_with(config);
    let client = server.connect_local();
    let window = solid(&mut server, client, Rect::new(0, 0, 50, 50), RED);
    server.queue_command(client, Command::RequestFocus { window, gain: true });
    server.dispatch_pending();
    server.take_events(client);

    let later = std::time::Instant::now() + std::time::Duration::from_secs(1);
    server.screensaver_tick(later);
    assert!(server.compositor().is_suspended());
    assert_eq!(pixel(&server, 10, 10), 0xff00_0000);

    let key = RawInput::Key(key_input(30, 'a' as u32, Modifiers::empty(), true));
    server.handle_input(key);
    assert!(!server.compositor().is_suspended());
    assert_eq!(pixel(&server, 10, 10), RED);
    assert!(server.take_events(client).is_empty());

    server.handle_input(key);
    assert_eq!(server.take_events(client).len(), 1);
}

#[test]
fn shutdown_disconnects_everyone() {
    let mut server = server();
    let a = server.connect_local();
    solid(&mut server, a, Rect::new(0, 0, 50, 50), RED);
    server.shutdown();
    assert!(!server.is_connected(a));
    assert!(server.windows().is_empty());
    assert_eq!(pixel(&server, 10, 10), BACKGROUND);
}
