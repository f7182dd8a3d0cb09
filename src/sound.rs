// Eight-channel PCM mixer. The bus thread pokes the channel registers
// through the I/O ports; the playback thread owned by the audio backend
// pulls interleaved stereo samples out of the Mixer. The two sides share
// nothing but these word-sized atomics and a read-only view of guest RAM,
// with release/acquire ordering on every register; a torn sample read is an
// acceptable click.

use crate::memory::Memory;
use rodio::Source;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const AUDIO_CHANNELS: usize = 8;
pub const SAMPLE_RATE: u32 = 48000;

// AUDxCONTROL bits, identical to the port encoding.
pub const CONTROL_VOLUME: u32 = 0x7F;
pub const CONTROL_LOOP: u32 = 1 << 7;
pub const CONTROL_ENABLE: u32 = 1 << 8;
pub const CONTROL_BITS16: u32 = 1 << 9;

#[derive(Default)]
pub struct ChannelRegs {
    pub start: AtomicU32,
    pub end: AtomicU32,
    pub loop_start: AtomicU32,
    pub loop_end: AtomicU32,
    pub frequency: AtomicU32,
    pub control: AtomicU32,
    pub pan: AtomicU32, // right volume in the low byte, left volume above it
    pub position: AtomicU32,
    pub accumulator: AtomicU32,
    pub data: AtomicU32, // last fetched sample, an i16 in the low half
}

#[derive(Default)]
pub struct AudioState {
    pub channel: [ChannelRegs; AUDIO_CHANNELS],
    pub base: AtomicU32,
}

// Read-only window onto guest RAM for the playback thread.
//
// Safety: the RAM allocation is created once at machine init and is neither
// resized nor freed while an audio sink holds this view; the front-end keeps
// the machine alive longer than the sink. Racing reads against CPU stores is
// intended and tolerated.
pub struct RamView {
    ptr: *const u8,
    len: usize,
}

unsafe impl Send for RamView {}

impl RamView {
    pub fn new(mem: &Memory) -> RamView {
        RamView { ptr: mem.ram.as_ptr(), len: mem.ram.len() }
    }
    fn read8(&self, address: u32) -> u8 {
        if (address as usize) < self.len {
            unsafe { self.ptr.add(address as usize).read_volatile() }
        } else {
            0
        }
    }
}

pub struct Mixer {
    state: Arc<AudioState>,
    ram: RamView,
    last_enable: [bool; AUDIO_CHANNELS],
    pending_right: Option<i16>,
}

impl Mixer {
    pub fn new(state: Arc<AudioState>, ram: RamView) -> Mixer {
        Mixer { state, ram, last_enable: [false; AUDIO_CHANNELS], pending_right: None }
    }

    // Produce one stereo frame. Each enabled channel runs a phase
    // accumulator against the 48 kHz output rate; crossing 1<<16 fetches the
    // next PCM sample from RAM. A channel running off its end disables
    // itself unless it loops.
    fn step(&mut self) -> (i32, i32) {
        let mut out_left = 0i32;
        let mut out_right = 0i32;
        let base = self.state.base.load(Ordering::Acquire);
        for (index, ch) in self.state.channel.iter().enumerate() {
            let control = ch.control.load(Ordering::Acquire);
            let enable = control & CONTROL_ENABLE != 0;
            if enable && !self.last_enable[index] {
                ch.position.store(ch.start.load(Ordering::Acquire), Ordering::Release);
            } else if !enable && self.last_enable[index] {
                ch.position.store(ch.end.load(Ordering::Acquire), Ordering::Release);
                ch.data.store(0, Ordering::Release);
            }

            if enable {
                let mut accumulator = ch
                    .accumulator
                    .load(Ordering::Acquire)
                    .wrapping_add(ch.frequency.load(Ordering::Acquire));
                if accumulator >= 1 << 16 {
                    accumulator -= 1 << 16;
                    let mut position = ch.position.load(Ordering::Acquire);
                    if position < ch.end.load(Ordering::Acquire) {
                        let address = base.wrapping_add(position);
                        let sample = if control & CONTROL_BITS16 != 0 {
                            let sample = i16::from_le_bytes([
                                self.ram.read8(address),
                                self.ram.read8(address.wrapping_add(1)),
                            ]);
                            position = position.wrapping_add(2);
                            sample
                        } else {
                            let sample = ((self.ram.read8(address) as u16) << 8) as i16;
                            position = position.wrapping_add(1);
                            sample
                        };
                        if control & CONTROL_LOOP != 0
                            && position >= ch.loop_end.load(Ordering::Acquire)
                        {
                            position = ch.loop_start.load(Ordering::Acquire);
                        }
                        ch.position.store(position, Ordering::Release);
                        ch.data.store(sample as u16 as u32, Ordering::Release);
                    } else {
                        // ran off the end: silence instead of a dangling sample
                        ch.control.fetch_and(!CONTROL_ENABLE, Ordering::AcqRel);
                        ch.data.store(0, Ordering::Release);
                    }
                }
                ch.accumulator.store(accumulator, Ordering::Release);
            } else {
                ch.data.store(0, Ordering::Release);
            }
            self.last_enable[index] = ch.control.load(Ordering::Acquire) & CONTROL_ENABLE != 0;

            let data = ch.data.load(Ordering::Acquire) as u16 as i16;
            let sum = data as f32 * ((control & CONTROL_VOLUME) as f32 / 127.0);
            let pan = ch.pan.load(Ordering::Acquire);
            out_left += (sum * (((pan >> 8) & 0xFF) as f32 / 255.0)) as i32;
            out_right += (sum * ((pan & 0xFF) as f32 / 255.0)) as i32;
        }
        (out_left, out_right)
    }
}

impl Iterator for Mixer {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if let Some(right) = self.pending_right.take() {
            return Some(right);
        }
        let (left, right) = self.step();
        self.pending_right = Some((right >> 1).clamp(-32768, 32767) as i16);
        Some((left >> 1).clamp(-32768, 32767) as i16)
    }
}

impl Source for Mixer {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }
    fn channels(&self) -> u16 {
        2
    }
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
