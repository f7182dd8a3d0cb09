// Host window front-end: composites the guest framebuffer and overlays into
// one pixel buffer, pushes it to a minifb window, and feeds key and mouse
// events back into the bus devices. Guest pixels are BGRA bytes in RAM,
// which read little-endian as exactly the 0RGB words the window wants.

use crate::bus::Bus;
use crate::devices::Overlay;
use crate::memory::Memory;
use minifb::{Key, MouseButton, MouseMode, Scale, Window, WindowOptions};

pub const SCREEN_WIDTH: usize = 640;
pub const SCREEN_HEIGHT: usize = 480;
pub const FRAMEBUFFER_ADDRESS: u32 = 0x0200_0000;

pub struct Screen {
    window: Window,
    buffer: Vec<u32>,
    held_keys: Vec<Key>,
    mouse_down: bool,
    last_mouse: (f32, f32),
}

impl Screen {
    pub fn new(scale: u32, filtering: u32) -> Result<Screen, minifb::Error> {
        if filtering != 0 {
            log::debug!("linear filtering is not supported by this window backend");
        }
        let window = Window::new(
            "fox32 emulator",
            SCREEN_WIDTH,
            SCREEN_HEIGHT,
            WindowOptions { scale: scale_of(scale), ..WindowOptions::default() },
        )?;
        Ok(Screen {
            window,
            buffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            held_keys: Vec::new(),
            mouse_down: false,
            last_mouse: (0.0, 0.0),
        })
    }

    pub fn is_open(&self) -> bool {
        self.window.is_open()
    }

    pub fn draw(&mut self, mem: &Memory, overlays: &[Overlay]) {
        self.composite(mem, overlays);
        if let Err(err) = self.window.update_with_buffer(&self.buffer, SCREEN_WIDTH, SCREEN_HEIGHT)
        {
            log::warn!("screen update failed: {}", err);
        }
    }

    fn composite(&mut self, mem: &Memory, overlays: &[Overlay]) {
        let base = FRAMEBUFFER_ADDRESS as usize;
        if let Some(framebuffer) = mem.ram.get(base..base + SCREEN_WIDTH * SCREEN_HEIGHT * 4) {
            for (pixel, bytes) in self.buffer.iter_mut().zip(framebuffer.chunks_exact(4)) {
                *pixel = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
        }
        for overlay in overlays.iter().filter(|overlay| overlay.enabled) {
            let width = overlay.width as usize;
            for row in 0..overlay.height as usize {
                let dst_y = overlay.y as usize + row;
                if dst_y >= SCREEN_HEIGHT {
                    break;
                }
                for col in 0..width {
                    let dst_x = overlay.x as usize + col;
                    if dst_x >= SCREEN_WIDTH {
                        break;
                    }
                    let src = overlay.pointer as usize + (row * width + col) * 4;
                    if let Some(bytes) = mem.ram.get(src..src + 4) {
                        self.buffer[dst_y * SCREEN_WIDTH + dst_x] =
                            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    }
                }
            }
        }
    }

    // Translate this frame's window state into device events: key make and
    // break codes for the scancode queue, deltas and button edges for the
    // mouse.
    pub fn pump(&mut self, bus: &mut Bus) {
        let keys = self.window.get_keys().unwrap_or_default();
        for key in &keys {
            if !self.held_keys.contains(key) {
                if let Some(code) = keycode(*key) {
                    bus.keyboard.put(code);
                }
            }
        }
        for key in &self.held_keys {
            if !keys.contains(key) {
                if let Some(code) = keycode(*key) {
                    bus.keyboard.put(code | 0x80);
                }
            }
        }
        self.held_keys = keys;

        if let Some((x, y)) = self.window.get_mouse_pos(MouseMode::Discard) {
            let dx = (x - self.last_mouse.0) as i32;
            let dy = (y - self.last_mouse.1) as i32;
            if dx != 0 || dy != 0 {
                bus.mouse.moved(dx, dy);
            }
            self.last_mouse = (x, y);
        }
        let down = self.window.get_mouse_down(MouseButton::Left);
        if down && !self.mouse_down {
            bus.mouse.press();
        }
        if !down && self.mouse_down {
            bus.mouse.release();
        }
        self.mouse_down = down;
    }
}

fn scale_of(scale: u32) -> Scale {
    match scale {
        0 | 1 => Scale::X1,
        2 | 3 => Scale::X2,
        4..=7 => Scale::X4,
        8..=15 => Scale::X8,
        16..=31 => Scale::X16,
        _ => Scale::X32,
    }
}

// Host keys map onto the fixed scancode table the ROM expects; anything
// without an entry is dropped.
pub fn keycode(key: Key) -> Option<u8> {
    Some(match key {
        Key::Escape => 0x01,
        Key::Key1 | Key::NumPad1 => 0x02,
        Key::Key2 | Key::NumPad2 => 0x03,
        Key::Key3 | Key::NumPad3 => 0x04,
        Key::Key4 | Key::NumPad4 => 0x05,
        Key::Key5 | Key::NumPad5 => 0x06,
        Key::Key6 | Key::NumPad6 => 0x07,
        Key::Key7 | Key::NumPad7 => 0x08,
        Key::Key8 | Key::NumPad8 => 0x09,
        Key::Key9 | Key::NumPad9 => 0x0A,
        Key::Key0 | Key::NumPad0 => 0x0B,
        Key::Minus => 0x0C,
        Key::Equal => 0x0D,
        Key::Backspace => 0x0E,
        Key::Tab => 0x0F,
        Key::Q => 0x10,
        Key::W => 0x11,
        Key::E => 0x12,
        Key::R => 0x13,
        Key::T => 0x14,
        Key::Y => 0x15,
        Key::U => 0x16,
        Key::I => 0x17,
        Key::O => 0x18,
        Key::P => 0x19,
        Key::LeftBracket => 0x1A,
        Key::RightBracket => 0x1B,
        Key::Enter | Key::NumPadEnter => 0x1C,
        Key::LeftCtrl => 0x1D,
        Key::A => 0x1E,
        Key::S => 0x1F,
        Key::D => 0x20,
        Key::F => 0x21,
        Key::G => 0x22,
        Key::H => 0x23,
        Key::J => 0x24,
        Key::K => 0x25,
        Key::L => 0x26,
        Key::Semicolon => 0x27,
        Key::Apostrophe => 0x28,
        Key::Backquote => 0x29,
        Key::LeftShift => 0x2A,
        Key::Backslash => 0x2B,
        Key::Z => 0x2C,
        Key::X => 0x2D,
        Key::C => 0x2E,
        Key::V => 0x2F,
        Key::B => 0x30,
        Key::N => 0x31,
        Key::M => 0x32,
        Key::Comma => 0x33,
        Key::Period => 0x34,
        Key::Slash => 0x35,
        Key::RightShift => 0x36,
        Key::LeftAlt => 0x38,
        Key::Space => 0x39,
        Key::CapsLock => 0x3A,
        Key::F1 => 0x3B,
        Key::F2 => 0x3C,
        Key::F3 => 0x3D,
        Key::F4 => 0x3E,
        Key::F5 => 0x3F,
        Key::F6 => 0x40,
        Key::F7 => 0x41,
        Key::F8 => 0x42,
        Key::F9 => 0x43,
        Key::F10 => 0x44,
        Key::F11 => 0x57,
        Key::F12 => 0x58,
        Key::Up => 0x67,
        Key::Left => 0x69,
        Key::Right => 0x6A,
        Key::Down => 0x6C,
        _ => return None,
    })
}
