mod ui;

use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event as TermEvent, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use maze_link::transport::{detect_device, DeviceTransport};
use maze_link::{Dir, Event, Game, Settings};

use crate::ui::Renderer;

fn main() -> io::Result<()> {
    let settings = Settings::from_env();
    if let Some(path) = &settings.log_file {
        init_logging(path)?;
    }

    let mut stdout = io::stdout();
    terminal::enable_raw_mode()?;
    stdout.execute(EnterAlternateScreen)?;
    stdout.execute(Hide)?;

    let result = run(&mut stdout, &settings);

    stdout.execute(Show)?;
    stdout.execute(LeaveAlternateScreen)?;
    terminal::disable_raw_mode()?;
    result
}

fn init_logging(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(filter)
        .init();
    Ok(())
}

fn run(stdout: &mut Stdout, settings: &Settings) -> io::Result<()> {
    let mut game = Game::new(rand::thread_rng(), settings);
    if let Some(target) = &settings.link {
        game.connect(target.transport(settings.baud_rate).as_ref());
    }

    let mut renderer = Renderer::new();
    let mut drawn = None;
    let frame_time = Duration::from_micros(1_000_000 / settings.fps.max(1));

    loop {
        let frame_start = Instant::now();
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                TermEvent::Key(key) => match key.kind {
                    KeyEventKind::Press | KeyEventKind::Repeat => match key.code {
                        KeyCode::Char('q') => return Ok(()),
                        KeyCode::Char('n') => game.handle(Event::NewMazeRequested, Instant::now()),
                        KeyCode::Char('c') => connect(&mut game, settings),
                        KeyCode::Char('x') => game.disconnect(),
                        code => {
                            if let Some(dir) = dir_for_key(code) {
                                game.handle(Event::MoveRequested(dir), Instant::now());
                            }
                        }
                    },
                    _ => {}
                },
                TermEvent::Resize(..) => renderer.invalidate(),
                _ => {}
            }
        }

        let now = Instant::now();
        game.pump_link(now);
        game.tick(now);

        if drawn != Some(game.revision()) || renderer.needs_full() {
            renderer.render(stdout, game.session())?;
            drawn = Some(game.revision());
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_time {
            thread::sleep(frame_time - elapsed);
        }
    }
}

fn connect<R: rand::Rng>(game: &mut Game<R>, settings: &Settings) {
    if let Some(target) = &settings.link {
        game.connect(target.transport(settings.baud_rate).as_ref());
        return;
    }
    match detect_device() {
        Some(path) => game.connect(&DeviceTransport::new(path, settings.baud_rate)),
        None => game.set_status("No serial device found - set MAZE_LINK (or MAZE_LINK=dry-run)"),
    }
}

fn dir_for_key(code: KeyCode) -> Option<Dir> {
    match code {
        KeyCode::Up | KeyCode::Char('w' | 'W' | 'k') => Some(Dir::Up),
        KeyCode::Down | KeyCode::Char('s' | 'S' | 'j') => Some(Dir::Down),
        KeyCode::Left | KeyCode::Char('a' | 'A' | 'h') => Some(Dir::Left),
        KeyCode::Right | KeyCode::Char('d' | 'D' | 'l') => Some(Dir::Right),
        _ => None,
    }
}
