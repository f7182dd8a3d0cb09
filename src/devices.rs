// The machine's peripherals, each a plain value owned by the bus. Only the
// programmed-I/O surface lives here; the window front-end that feeds keys and
// mouse motion into these devices is in the screen module.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const SECTOR_SIZE: usize = 512;
pub const DISK_SLOTS: usize = 4;
pub const KEY_QUEUE_SIZE: usize = 256;

// Serial port: nonblocking reads from stdin, writes straight to stdout. The
// stdin reader is created on first use so that machines which never touch
// port zero do not spawn it. The output sink is replaceable for tests.
pub struct Serial {
    input: Option<termion::AsyncReader>,
    pub output: Box<dyn Write + Send>,
}

impl Serial {
    pub fn new() -> Serial {
        Serial { input: None, output: Box::new(io::stdout()) }
    }
    pub fn get(&mut self) -> u8 {
        let reader = self.input.get_or_insert_with(termion::async_stdin);
        let mut buffer = [0u8; 1];
        match reader.read(&mut buffer) {
            Ok(1) => buffer[0],
            _ => 0,
        }
    }
    pub fn put(&mut self, value: u8) {
        let _ = self.output.write_all(&[value]);
        let _ = self.output.flush();
    }
}

// Scancode FIFO as a bounded ring: zero is reserved for "empty", overflow
// drops the incoming code rather than allocating.
pub struct KeyQueue {
    buffer: [u8; KEY_QUEUE_SIZE],
    head: usize,
    len: usize,
}

impl KeyQueue {
    pub fn new() -> KeyQueue {
        KeyQueue { buffer: [0; KEY_QUEUE_SIZE], head: 0, len: 0 }
    }
    pub fn put(&mut self, code: u8) {
        if code == 0 || self.len == KEY_QUEUE_SIZE {
            return;
        }
        self.buffer[(self.head + self.len) % KEY_QUEUE_SIZE] = code;
        self.len += 1;
    }
    pub fn take(&mut self) -> u8 {
        if self.len == 0 {
            return 0;
        }
        let code = self.buffer[self.head];
        self.head = (self.head + 1) % KEY_QUEUE_SIZE;
        self.len -= 1;
        code
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct Mouse {
    pub x: u16,
    pub y: u16,
    pub clicked: bool,
    pub released: bool,
    pub held: bool,
}

impl Mouse {
    pub fn new() -> Mouse {
        Mouse { x: 0, y: 0, clicked: false, released: false, held: false }
    }
    // Deltas accumulate on the 16-bit coordinates; anything that wandered
    // negative lands past 0x8000 and snaps back to the origin.
    pub fn moved(&mut self, dx: i32, dy: i32) {
        self.x = self.x.wrapping_add(dx as u16);
        self.y = self.y.wrapping_add(dy as u16);
        if self.x > 0x8000 {
            self.x = 0;
        }
        if self.x > 640 {
            self.x = 640;
        }
        if self.y > 0x8000 {
            self.y = 0;
        }
        if self.y > 480 {
            self.y = 480;
        }
    }
    pub fn press(&mut self) {
        self.clicked = true;
        self.held = true;
    }
    pub fn release(&mut self) {
        self.released = true;
        self.held = false;
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct Overlay {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub pointer: u32,
    pub enabled: bool,
}

pub struct Disk {
    file: File,
    size: u64,
}

// Four slots of raw-sector images; one shared DMA buffer pointer. All
// transfers move exactly one 512-byte sector between guest RAM and the
// image. Out-of-range requests report on stdout and yield sentinels, they
// never take the machine down.
pub struct DiskController {
    pub disks: [Option<Disk>; DISK_SLOTS],
    pub buffer_pointer: u32,
}

impl DiskController {
    pub fn new() -> DiskController {
        DiskController { disks: [None, None, None, None], buffer_pointer: 0 }
    }

    pub fn mount(&mut self, id: usize, path: &Path) -> io::Result<()> {
        if id >= DISK_SLOTS {
            println!("attempting to insert disk with ID > 3");
            return Ok(());
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        log::info!("inserting {} as disk ID {}", path.display(), id);
        self.disks[id] = Some(Disk { file, size });
        Ok(())
    }

    // A dropped file lands in the slot numbered by how many slots are
    // occupied, which is only the first free slot while there are no gaps;
    // kept for compatibility with existing images and muscle memory.
    pub fn mount_dropped(&mut self, path: &Path) -> io::Result<()> {
        let id = self.disks.iter().filter(|disk| disk.is_some()).count();
        self.mount(id, path)
    }

    pub fn remove(&mut self, id: usize) {
        if id >= DISK_SLOTS {
            println!("attempting to remove disk with ID > 3");
            return;
        }
        if self.disks[id].take().is_some() {
            log::info!("removing disk ID {}", id);
        }
    }

    pub fn size(&self, id: usize) -> u64 {
        if id >= DISK_SLOTS {
            println!("attempting to access disk size with ID > 3");
            return 0;
        }
        self.disks[id].as_ref().map(|disk| disk.size).unwrap_or(0)
    }

    pub fn seek(&mut self, id: usize, sector: u64) {
        if id >= DISK_SLOTS {
            println!("attempting to set disk sector with ID > 3");
            return;
        }
        if let Some(disk) = &mut self.disks[id] {
            let _ = disk.file.seek(SeekFrom::Start(sector * SECTOR_SIZE as u64));
        }
    }

    // One sector from the image into RAM at the buffer pointer. Short reads
    // at the end of the image leave the tail of the buffer untouched.
    pub fn read_sector(&mut self, id: usize, ram: &mut [u8]) -> usize {
        if id >= DISK_SLOTS {
            println!("attempting to read disk with ID > 3");
            return 0;
        }
        let buffer = match Self::dma_buffer(ram, self.buffer_pointer) {
            Some(buffer) => buffer,
            None => return 0,
        };
        let disk = match &mut self.disks[id] {
            Some(disk) => disk,
            None => return 0,
        };
        let mut total = 0;
        while total < SECTOR_SIZE {
            match disk.file.read(&mut buffer[total..]) {
                Ok(0) => break,
                Ok(count) => total += count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        total
    }

    pub fn write_sector(&mut self, id: usize, ram: &mut [u8]) -> usize {
        if id >= DISK_SLOTS {
            println!("attempting to write disk with ID > 3");
            return 0;
        }
        let buffer = match Self::dma_buffer(ram, self.buffer_pointer) {
            Some(buffer) => buffer,
            None => return 0,
        };
        let disk = match &mut self.disks[id] {
            Some(disk) => disk,
            None => return 0,
        };
        match disk.file.write_all(buffer) {
            Ok(()) => SECTOR_SIZE,
            Err(_) => 0,
        }
    }

    fn dma_buffer(ram: &mut [u8], pointer: u32) -> Option<&mut [u8]> {
        let start = pointer as usize;
        let buffer = ram.get_mut(start..start.checked_add(SECTOR_SIZE)?);
        if buffer.is_none() {
            println!("disk buffer pointer is outside of memory");
        }
        buffer
    }
}

// Calendar fields come from the host clock at read time; uptime is a
// millisecond counter the outer loop advances between budget slices.
pub struct Rtc {
    pub uptime_ms: u32,
}

impl Rtc {
    pub fn new() -> Rtc {
        Rtc { uptime_ms: 0 }
    }
    pub fn read(&self, field: u8) -> u32 {
        let now = Local::now();
        match field {
            0x00 => now.year() as u32,
            0x01 => now.month(),
            0x02 => now.day(),
            0x03 => now.hour(),
            0x04 => now.minute(),
            0x05 => now.second(),
            0x06 => self.uptime_ms,
            0x07 => dst_active(&now) as u32,
            _ => 0,
        }
    }
}

// The local zone observes DST when its current UTC offset exceeds the
// smaller of the midwinter and midsummer offsets.
fn dst_active(now: &DateTime<Local>) -> bool {
    let january = Local.with_ymd_and_hms(now.year(), 1, 1, 12, 0, 0).single();
    let july = Local.with_ymd_and_hms(now.year(), 7, 1, 12, 0, 0).single();
    match (january, july) {
        (Some(january), Some(july)) => {
            let base = january
                .offset()
                .local_minus_utc()
                .min(july.offset().local_minus_utc());
            now.offset().local_minus_utc() > base
        }
        _ => false,
    }
}

impl Default for Serial {
    fn default() -> Self {
        Self::new()
    }
}
impl Default for KeyQueue {
    fn default() -> Self {
        Self::new()
    }
}
impl Default for Mouse {
    fn default() -> Self {
        Self::new()
    }
}
impl Default for DiskController {
    fn default() -> Self {
        Self::new()
    }
}
impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}
