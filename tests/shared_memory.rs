use std::fs::File;

use nix::fcntl::OFlag;
use nix::sys::mman::shm_open;
use nix::sys::stat::Mode;
use tessera::compositor::screen::MemoryScreen;
use tessera::shared::LocalBuffer;
use tessera::{Config, DisplayServer, ServerNotice};
use tessera_proto::shm::{shm_name, SharedBuffer, ShmError};
use tessera_proto::{ClientId, Command, Event, Rect, Region, WindowId};

const BACKGROUND: u32 = 0xff10_2030;
const BLUE: u32 = 0xff00_00ff;

fn server() -> DisplayServer {
    let mut config = Config::default();
    config.display.width = 100;
    config.display.height = 100;
    config.compositor.background = BACKGROUND;
    config.compositor.software_cursor = false;
    config.screensaver.enabled = false;
    let mut server = DisplayServer::new(config, Box::new(MemoryScreen::new(100, 100)));
    server.start();
    server.take_notices();
    server
}

fn pixel(server: &DisplayServer, x: i32, y: i32) -> u32 {
    let width = server.screen().width() as usize;
    server.screen().pixels()[y as usize * width + x as usize]
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

/// A client showing a shared buffer of `rect`'s size filled with `color`
fn shared_window(
    server: &mut DisplayServer,
    rect: Rect,
    color: u32,
    salt: u32,
) -> Option<(ClientId, WindowId, SharedBuffer)> {
    let key = 0x3d00_0000 | (salt << 12) | (std::process::id() & 0xfff);
    let mut buffer = match SharedBuffer::create(key, rect.width as u32, rect.height as u32) {
        Ok(buffer) => buffer,
        // No /dev/shm in this environment
        Err(ShmError::Open { .. }) => return None,
        Err(e) => panic!("unexpected error: {}", e),
    };
    buffer.pixels_mut().fill(color);

    let client = server.connect_local();
    let window = granted_id(server, client);
    server.queue_command(
        client,
        Command::Region {
            window,
            shm_key: key,
            width: rect.width as u32,
            height: rect.height as u32,
            opaque: true,
            region: Region::from_rect(rect),
        },
    );
    server.dispatch_pending();
    server.take_events(client);
    Some((client, window, buffer))
}

fn truncate(key: u32) {
    let fd = shm_open(shm_name(key).as_str(), OFlag::O_RDWR, Mode::empty()).unwrap();
    File::from(fd).set_len(0).unwrap();
}

#[test]
fn shrunk_buffer_drops_only_its_owner() {
    let mut server = server();
    let rect = Rect::new(0, 0, 40, 40);
    let Some((client, window, buffer)) = shared_window(&mut server, rect, BLUE, 1) else {
        return;
    };
    assert_eq!(pixel(&server, 39, 39), BLUE);

    let bystander = server.connect_local();
    let other = server
        .create_local_window(
            bystander,
            Region::from_rect(Rect::new(60, 60, 20, 20)),
            LocalBuffer::new(20, 20, 0xff00_ff00),
        )
        .unwrap();
    server.take_notices();

    truncate(buffer.key());
    server.queue_command(
        client,
        Command::RepaintRegion {
            window,
            region: Region::from_rect(rect),
        },
    );
    server.dispatch_pending();

    assert!(!server.is_connected(client));
    assert!(server.windows().get(window).is_none());
    assert!(server
        .take_notices()
        .contains(&ServerNotice::ClientDisconnected(client)));
    assert_eq!(pixel(&server, 39, 39), BACKGROUND);

    assert!(server.is_connected(bystander));
    assert!(server.windows().get(other).is_some());
    assert_eq!(pixel(&server, 70, 70), 0xff00_ff00);

    SharedBuffer::unlink(buffer.key());
}

#[test]
fn busy_buffer_is_painted_once_released() {
    let mut server = server();
    let rect = Rect::new(10, 10, 30, 30);
    let Some((client, window, mut buffer)) = shared_window(&mut server, rect, BLUE, 2) else {
        return;
    };
    assert!(!server.has_deferred_damage());

    buffer.pixels_mut().fill(0xffff_ff00);
    let painting = buffer.try_lock_exclusive().unwrap();
    server.queue_command(
        client,
        Command::RepaintRegion {
            window,
            region: Region::from_rect(rect),
        },
    );
    server.dispatch_pending();
    // The old frame stays up instead of a torn one
    assert_eq!(pixel(&server, 20, 20), BLUE);
    assert!(server.has_deferred_damage());
    assert!(server.is_connected(client));

    drop(painting);
    server.repaint_deferred();
    assert!(!server.has_deferred_damage());
    assert_eq!(pixel(&server, 20, 20), 0xffff_ff00);

    SharedBuffer::unlink(buffer.key());
}
