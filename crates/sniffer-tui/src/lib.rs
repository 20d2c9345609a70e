//! Live status view (SPEC_FULL.md §4.10): a read-only `ratatui`/`crossterm`
//! terminal dashboard over the stream of events the Lifecycle Controller
//! already hands the embedder. Never influences capture behavior.

mod app;
mod event;
mod ui;

use std::io;

use crossterm::event::{KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::execute;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use sniffer_core::model::{HttpMessageRecord, PipelineStats};

pub use app::App;
use event::{Event, EventHandler};

/// One tick of ambient activity the dashboard cares about, beyond the
/// `HttpMessageRecord`s it already receives one-by-one: the cumulative
/// pipeline counters (SPEC_FULL.md §2.10/§4.10) plus the fatal-error
/// count, which arrives through a separate callback on the embedder side.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineCounters {
    pub stats: PipelineStats,
    pub errors: u64,
}

/// Run the dashboard until the user quits (`q` / Ctrl-C). `poll_messages`
/// is called once per tick and should drain whatever new records/counters
/// are available without blocking; the TUI owns no capture state itself.
pub fn run_tui(
    interface: &str,
    ports: &[u16],
    mut poll_messages: impl FnMut() -> (Vec<HttpMessageRecord>, PipelineCounters),
    mut should_stop: impl FnMut() -> bool,
) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(interface, ports);
    let events = EventHandler::new(100);

    while !app.should_quit {
        let (messages, counters) = poll_messages();
        for message in messages {
            app.push_message(message);
        }
        app.set_counters(counters);

        terminal.draw(|frame| ui::render(frame, &app))?;

        if should_stop() {
            break;
        }

        match events.poll()? {
            Event::Key(key) => {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') => app.should_quit = true,
                    KeyCode::Char('c')
                        if key.modifiers.contains(crossterm::event::KeyModifiers::CONTROL) =>
                    {
                        app.should_quit = true;
                    }
                    KeyCode::Char('j') | KeyCode::Down => app.move_down(),
                    KeyCode::Char('k') | KeyCode::Up => app.move_up(),
                    _ => {}
                }
            }
            Event::Tick => {}
        }
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
