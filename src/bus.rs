// Programmed-I/O dispatch. The CPU hands every IN/OUT here with a 32-bit
// port number; ranges select a device, unmatched ports read as zero and
// swallow writes. Disk DMA is the only operation that touches guest RAM,
// which is why the accessors take the memory alongside the port.

use crate::devices::{DiskController, KeyQueue, Mouse, Overlay, Rtc, Serial};
use crate::memory::Memory;
use crate::processor::VmError;
use crate::sound::{AudioState, CONTROL_BITS16, CONTROL_ENABLE, CONTROL_LOOP, CONTROL_VOLUME};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub const OVERLAY_COUNT: usize = 32;

pub struct Bus {
    pub serial: Serial,
    pub keyboard: KeyQueue,
    pub mouse: Mouse,
    pub overlays: [Overlay; OVERLAY_COUNT],
    pub disk: DiskController,
    pub audio: Arc<AudioState>,
    pub rtc: Rtc,
    pub exit_requested: bool,
}

impl Bus {
    pub fn new() -> Bus {
        Bus {
            serial: Serial::new(),
            keyboard: KeyQueue::new(),
            mouse: Mouse::new(),
            overlays: [Overlay::default(); OVERLAY_COUNT],
            disk: DiskController::new(),
            audio: Arc::new(AudioState::default()),
            rtc: Rtc::new(),
            exit_requested: false,
        }
    }

    pub fn io_read(&mut self, _mem: &mut Memory, port: u32) -> Result<u32, VmError> {
        Ok(match port {
            0x0000_0000 => self.serial.get() as u32,

            0x8000_0000..=0x8000_031F => {
                let number = (port & 0xFF) as usize;
                let setting = (port >> 8) & 0xFF;
                match self.overlays.get(number) {
                    Some(overlay) => match setting {
                        0x00 => (overlay.y << 16) | overlay.x,
                        0x01 => (overlay.height << 16) | overlay.width,
                        0x02 => overlay.pointer,
                        0x03 => overlay.enabled as u32,
                        _ => 0,
                    },
                    None => 0,
                }
            }

            0x8000_0400 => {
                let mut value = 0;
                if self.mouse.clicked {
                    value |= 0b001;
                }
                if self.mouse.released {
                    value |= 0b010;
                }
                if self.mouse.held {
                    value |= 0b100;
                }
                value
            }
            0x8000_0401 => ((self.mouse.y as u32) << 16) | self.mouse.x as u32,

            0x8000_0500 => self.keyboard.take() as u32,

            0x8000_0600..=0x8000_067F => {
                let id = port & 0xFF;
                let channel = &self.audio.channel[((id >> 4) & 0x7) as usize];
                match id & 0xF {
                    0x0 => channel.position.load(Ordering::Acquire),
                    0x1 => channel.data.load(Ordering::Acquire),
                    // the rate port reads back the phase accumulator
                    0x4 => channel.accumulator.load(Ordering::Acquire),
                    0x5 => channel.control.load(Ordering::Acquire),
                    0x6 => channel.pan.load(Ordering::Acquire),
                    _ => 0,
                }
            }
            0x8000_0680 => self.audio.base.load(Ordering::Acquire),

            0x8000_0700..=0x8000_0707 => self.rtc.read((port & 0xFF) as u8),

            0x8000_1000..=0x8000_2003 => {
                let id = (port & 0xFF) as usize;
                match (port >> 12) & 0xF {
                    // size doubles as the insert state: zero means empty
                    0x1 => self.disk.size(id) as u32,
                    0x2 => self.disk.buffer_pointer,
                    _ => 0,
                }
            }

            _ => 0,
        })
    }

    pub fn io_write(&mut self, mem: &mut Memory, port: u32, value: u32) -> Result<(), VmError> {
        match port {
            0x0000_0000 => self.serial.put(value as u8),

            0x8000_0000..=0x8000_031F => {
                let number = (port & 0xFF) as usize;
                let setting = (port >> 8) & 0xFF;
                if let Some(overlay) = self.overlays.get_mut(number) {
                    match setting {
                        0x00 => {
                            overlay.x = value & 0xFFFF;
                            overlay.y = value >> 16;
                        }
                        0x01 => {
                            overlay.width = value & 0xFFFF;
                            overlay.height = value >> 16;
                        }
                        0x02 => overlay.pointer = value,
                        0x03 => overlay.enabled = value != 0,
                        _ => {}
                    }
                }
            }

            0x8000_0400 => {
                self.mouse.clicked = value & 0b001 != 0;
                self.mouse.released = value & 0b010 != 0;
                self.mouse.held = value & 0b100 != 0;
            }
            0x8000_0401 => {
                self.mouse.x = (value & 0xFFFF) as u16;
                self.mouse.y = (value >> 16) as u16;
            }

            0x8000_0600..=0x8000_067F => {
                let id = port & 0xFF;
                let channel = &self.audio.channel[((id >> 4) & 0x7) as usize];
                match id & 0xF {
                    0x0 => channel.start.store(value, Ordering::Release),
                    0x1 => channel.end.store(value, Ordering::Release),
                    0x2 => channel.loop_start.store(value, Ordering::Release),
                    0x3 => channel.loop_end.store(value, Ordering::Release),
                    0x4 => channel.frequency.store(value, Ordering::Release),
                    0x5 => channel.control.store(
                        value & (CONTROL_VOLUME | CONTROL_LOOP | CONTROL_ENABLE | CONTROL_BITS16),
                        Ordering::Release,
                    ),
                    0x6 => channel.pan.store(value & 0xFFFF, Ordering::Release),
                    _ => {}
                }
            }
            0x8000_0680 => self.audio.base.store(value, Ordering::Release),

            0x8000_1000..=0x8000_5003 => {
                let id = (port & 0xFF) as usize;
                match (port >> 12) & 0xF {
                    0x2 => self.disk.buffer_pointer = value,
                    0x3 => {
                        self.disk.seek(id, value as u64);
                        self.disk.read_sector(id, &mut mem.ram);
                    }
                    0x4 => {
                        self.disk.seek(id, value as u64);
                        self.disk.write_sector(id, &mut mem.ram);
                    }
                    0x5 => self.disk.remove(id),
                    _ => {}
                }
            }

            0x8001_0000 => {
                if value == 0 {
                    self.exit_requested = true;
                }
            }

            _ => {}
        }
        Ok(())
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
