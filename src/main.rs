use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use fox32::memory::MEMORY_ROM;
use fox32::processor::CPU_HZ;
use fox32::screen::Screen;
use fox32::sound::{Mixer, RamView};
use fox32::{Machine, FPS, VSYNC_VECTOR};
use std::cmp::Ordering;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use std::{fs, io, process, thread};
use termion::raw::IntoRawMode;

#[derive(Parser, Debug)]
#[command(name = "fox32", about = "fox32 emulator", disable_version_flag = true)]
struct Args {
    /// Specify a disk image to use (may be repeated, slots are assigned in order)
    #[arg(long, value_name = "DISK")]
    disk: Vec<PathBuf>,

    /// Specify a ROM image to use
    #[arg(long, value_name = "ROM")]
    rom: PathBuf,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Headless mode: don't open a window
    #[arg(long)]
    headless: bool,

    /// Specify RAM size in MiB
    #[arg(long, value_name = "SIZE", default_value_t = 64)]
    memory: u32,

    /// Scale display by MULT
    #[arg(long, value_name = "MULT", default_value_t = 1)]
    scale: u32,

    /// Set scale filtering mode: 0 = nearest pixel, 1 = linear
    #[arg(long, value_name = "MODE", default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=1))]
    filtering: u32,

    /// Print info about options specified
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            process::exit(code);
        }
    };

    // CRLF line endings keep the log readable once the terminal goes raw.
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if args.verbose {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder
        .format(|buf, record| write!(buf, "[emulator] {}\r\n", record.args()))
        .init();

    if let Err(err) = run(args) {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let rom = fs::read(&args.rom)
        .with_context(|| format!("couldn't find ROM file {}", args.rom.display()))?;
    match rom.len().cmp(&MEMORY_ROM) {
        Ordering::Less => bail!("ROM file too small, must be {} bytes", MEMORY_ROM),
        Ordering::Greater => bail!("ROM file too large, must be {} bytes", MEMORY_ROM),
        Ordering::Equal => {}
    }
    log::info!("using {} as boot ROM", args.rom.display());

    let memory_size = args.memory as usize * 1024 * 1024;
    log::info!("memory size: {} bytes", memory_size);

    let mut machine = Machine::new(memory_size);
    machine.cpu.mem.load_rom(&rom);
    machine.cpu.debug = args.debug;
    machine.cpu.halted = false;

    for (id, path) in args.disk.iter().enumerate() {
        machine
            .bus
            .disk
            .mount(id, path)
            .with_context(|| format!("couldn't open disk file {}", path.display()))?;
    }

    // The terminal stays raw and echo-free for the whole session so the
    // serial port sees individual keystrokes; the guard restores it on exit.
    let _raw_terminal = io::stdout().into_raw_mode().ok();

    let mut screen = if args.headless {
        None
    } else {
        Some(Screen::new(args.scale, args.filtering).context("failed to create window")?)
    };

    // The mixer runs on the playback thread; it is dropped with the sink
    // before the machine, so its RAM view never outlives the allocation.
    let mut _audio_output = None;
    if !args.headless {
        match rodio::OutputStream::try_default()
            .map_err(anyhow::Error::from)
            .and_then(|(stream, handle)| Ok((stream, rodio::Sink::try_new(&handle)?)))
        {
            Ok((stream, sink)) => {
                sink.append(Mixer::new(
                    machine.bus.audio.clone(),
                    RamView::new(&machine.cpu.mem),
                ));
                _audio_output = Some((stream, sink));
            }
            Err(err) => log::warn!("audio unavailable: {}", err),
        }
    }

    let budget = CPU_HZ / FPS;
    let frame = Duration::from_micros(1_000_000 / FPS as u64);
    let mut last_tick = Instant::now();

    while !machine.bus.exit_requested {
        if let Some(screen) = &screen {
            if !screen.is_open() {
                break;
            }
        }

        let frame_start = Instant::now();
        let elapsed = frame_start.duration_since(last_tick).as_millis() as u32;
        machine.bus.rtc.uptime_ms = machine.bus.rtc.uptime_ms.wrapping_add(elapsed);
        last_tick = frame_start;

        if let Err(err) = machine.run(budget) {
            log::debug!("{}", err);
        }

        if let Some(screen) = &mut screen {
            screen.draw(&machine.cpu.mem, &machine.bus.overlays);
            screen.pump(&mut machine.bus);
        }

        let _ = machine.cpu.raise(VSYNC_VECTOR);
        machine.cpu.halted = false;

        let spent = frame_start.elapsed();
        if spent < frame {
            thread::sleep(frame - spent);
        }
    }

    Ok(())
}
