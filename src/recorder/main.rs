// This is free and unencumbered software released into the public domain.

#[cfg(not(feature = "std"))]
compile_error!("asimov-camera-recorder requires the 'std' feature");

use asimov_camera_recorder::{
    cli::{OutputFormat, handle_error, info_user, warn_user_with_error, write_event},
    shared::{
        CaptureConfig, DisplayQueue, Finalization, Recorder, RecorderError, RecorderEvent,
        RecorderPhase, SavedRecording, display_channel, open_platform,
    },
};
use asimov_module::SysexitsError::{self, *};
use clap::Parser;
use clientele::StandardOptions;
use futures::FutureExt;
use std::{
    error::Error as StdError,
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, TryRecvError},
    },
    time::{Duration, Instant},
};

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Parser)]
struct Options {
    #[clap(flatten)]
    flags: StandardOptions,

    /// Camera to record from (ffmpeg input name or AVFoundation unique ID).
    #[arg(long)]
    device: Option<String>,

    /// Record for this many seconds without prompting, then save.
    #[arg(short, long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Keep the latest preview frame in this PNG file.
    #[arg(short, long)]
    preview: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

enum Command {
    Toggle,
    Quit,
}

pub fn main() -> Result<SysexitsError, Box<dyn StdError>> {
    asimov_module::dotenv().ok();
    let args = asimov_module::args_os()?;
    let options = Options::parse_from(args);

    if options.flags.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(EX_OK);
    }

    if options.flags.license {
        print!("{}", include_str!("../../UNLICENSE"));
        return Ok(EX_OK);
    }

    #[cfg(feature = "tracing")]
    asimov_module::init_tracing_subscriber(&options.flags).expect("failed to initialize logging");

    let exit_code = match run_recorder(&options) {
        Ok(()) => EX_OK,
        Err(err) => handle_error(&err, &options.flags),
    };

    Ok(exit_code)
}

fn run_recorder(opts: &Options) -> Result<(), RecorderError> {
    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit2 = Arc::clone(&quit);
        ctrlc::set_handler(move || {
            quit2.store(true, Ordering::SeqCst);
        })
        .map_err(|e| RecorderError::driver("installing the Ctrl-C handler", e))?;
    }

    let mut config =
        CaptureConfig::default().with_diagnostics(opts.flags.debug || opts.flags.verbose >= 3);
    if let Some(device) = opts.device.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        config = config.with_device(device);
    }

    let platform = open_platform(&config)?;
    info_user(
        &opts.flags,
        &format!(
            "using {} backend, scratch file {}",
            platform.backend(),
            config.output_path().display()
        ),
    );

    let (display, queue) = display_channel();
    let mut screen = Screen {
        queue,
        output: opts.output,
        preview: opts.preview.clone(),
        flags: &opts.flags,
        quit: Arc::clone(&quit),
    };
    let mut recorder = Recorder::new(platform, config, display);

    match opts.duration {
        Some(duration) => record_for(&mut recorder, &mut screen, duration),
        None => record_interactive(&mut recorder, &mut screen),
    }
}

/// Records once for `duration` (or until Ctrl-C) and waits for the save.
fn record_for(
    recorder: &mut Recorder,
    screen: &mut Screen<'_>,
    duration: Duration,
) -> Result<(), RecorderError> {
    let started = recorder.start();
    screen.pump();
    started?;

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && !screen.quit_requested() {
        screen.pump_for(PUMP_INTERVAL);
    }

    match recorder.stop() {
        Some(finalization) => screen.await_finalization(finalization).map(|_| ()),
        None => Ok(()),
    }
}

fn record_interactive(recorder: &mut Recorder, screen: &mut Screen<'_>) -> Result<(), RecorderError> {
    let commands = spawn_stdin_reader();
    eprintln!("Press Enter to start or stop recording, q to quit.");
    screen.render(&RecorderEvent::Phase(recorder.phase()));

    let mut pending: Option<Finalization> = None;
    loop {
        screen.pump_for(PUMP_INTERVAL);
        if let Some(fin) = pending.as_mut() {
            if let Some(result) = fin.now_or_never() {
                pending = None;
                if let Err(err) = result {
                    warn_user_with_error(screen.flags, "recording was not saved", &err);
                }
            }
        }

        let command = match commands.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Command::Quit),
        };
        let command = if screen.quit_requested() {
            Some(Command::Quit)
        } else {
            command
        };

        match command {
            None => {},
            Some(Command::Toggle) => match recorder.phase() {
                RecorderPhase::Recording => pending = recorder.stop(),
                _ => {
                    // Start failures are shown as alerts; keep accepting input.
                    if let Err(err) = recorder.start() {
                        screen.pump();
                        screen.render(&RecorderEvent::Alert((&err).into()));
                    }
                },
            },
            Some(Command::Quit) => {
                if let Some(fin) = recorder.stop() {
                    pending = Some(fin);
                }
                if let Some(fin) = pending.take() {
                    screen.await_finalization(fin)?;
                }
                return Ok(());
            },
        }
    }
}

fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("asimov-recorder-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let command = match line {
                    Ok(line) if line.trim().eq_ignore_ascii_case("q") => Command::Quit,
                    Ok(_) => Command::Toggle,
                    Err(_) => Command::Quit,
                };
                let quit = matches!(command, Command::Quit);
                if tx.send(command).is_err() || quit {
                    return;
                }
            }
        });
    // Without a reader the sender is already gone and the loop sees a quit.
    drop(spawned);
    rx
}

/// The terminal stand-in for the toggle button, status label and preview view.
struct Screen<'a> {
    queue: DisplayQueue,
    output: OutputFormat,
    preview: Option<PathBuf>,
    flags: &'a StandardOptions,
    quit: Arc<AtomicBool>,
}

impl Screen<'_> {
    fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    fn pump(&mut self) {
        for event in self.queue.drain() {
            self.render(&event);
        }
    }

    fn pump_for(&mut self, timeout: Duration) {
        if let Some(event) = self.queue.next_timeout(timeout) {
            self.render(&event);
        }
        self.pump();
    }

    fn render(&mut self, event: &RecorderEvent) {
        if let RecorderEvent::PreviewReady = event {
            self.store_preview();
            return;
        }
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        if let Err(err) = write_event(self.output, event, &mut stdout, &mut stderr) {
            if err.kind() == io::ErrorKind::BrokenPipe {
                self.quit.store(true, Ordering::SeqCst);
            }
        }
        let _ = stdout.flush();
    }

    fn store_preview(&mut self) {
        let Some(image) = self.queue.take_preview() else {
            return;
        };
        let Some(path) = &self.preview else {
            return;
        };
        if let Err(err) = image.save(path) {
            warn_user_with_error(self.flags, "could not write the preview image", &err);
            self.preview = None;
        }
    }

    /// Keeps the screen updating until the recording is saved or has failed.
    fn await_finalization(
        &mut self,
        mut finalization: Finalization,
    ) -> Result<SavedRecording, RecorderError> {
        info_user(self.flags, "finishing the recording");
        loop {
            self.pump_for(PUMP_INTERVAL);
            if let Some(result) = (&mut finalization).now_or_never() {
                self.pump();
                if let Ok(saved) = &result {
                    info_user(
                        self.flags,
                        &format!("{} frames saved to {}", saved.frames, saved.location.display()),
                    );
                }
                return result;
            }
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("Invalid duration: {s}"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("Duration must be a positive number of seconds".to_string());
    }
    if secs > 24.0 * 3600.0 {
        return Err(format!("Duration {secs}s exceeds the maximum of one day"));
    }
    Ok(Duration::from_secs_f64(secs))
}
