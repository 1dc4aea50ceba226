use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use dashboard_core::{update, Msg, PageState};
use dashboard_engine::EngineHandle;
use dashboard_logging::{dash_info, dash_warn};

use super::config::AppConfig;
use super::effects::EffectRunner;
use super::{logging, render};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

const HELP: &str = "\
Type to search (each line replaces the search box; empty line submits).
Commands:
  :start           start the job
  :reset           reset the job
  :refresh         re-fetch the job result
  :gen <prompt>    generate a report
  :stop            cancel the report being generated
  :clear           clear the search box
  :help            show this help
  :quit            exit";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Page(Msg),
    Help,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(command) = line.strip_prefix(':') else {
        return if line.trim().is_empty() {
            Input::Page(Msg::SearchSubmitted)
        } else {
            Input::Page(Msg::SearchInputChanged(line.to_string()))
        };
    };
    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "start" => Input::Page(Msg::StartClicked),
        "reset" => Input::Page(Msg::ResetClicked),
        "refresh" => Input::Page(Msg::RefreshClicked),
        "gen" | "generate" => Input::Page(Msg::GenerateClicked {
            prompt: rest.to_string(),
        }),
        "stop" => Input::Page(Msg::CancelGenerationClicked),
        "clear" => Input::Page(Msg::SearchInputChanged(String::new())),
        "help" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

enum Event {
    Msg(Msg),
    Quit,
}

pub fn run_app() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let config = AppConfig::load(&cwd);
    logging::initialize(config.log_target, config.level());
    dash_info!(
        "dashboard page for job {} against {}",
        config.job_id,
        config.base_url
    );

    let engine = EngineHandle::new(config.engine_settings()).context("failed to start engine")?;

    let (event_tx, event_rx) = mpsc::channel::<Event>();
    let (msg_tx, msg_rx) = mpsc::channel::<Msg>();
    let runner = EffectRunner::new(engine, msg_tx);

    forward_messages(msg_rx, event_tx.clone());
    spawn_input_reader(event_tx.clone());
    spawn_ticker(event_tx.clone());
    drop(event_tx);

    println!("{HELP}");
    let mut state = PageState::new(config.job_id.clone());
    let mut pending_render = false;
    dispatch(&mut state, Msg::PageOpened, &runner);

    for event in event_rx {
        let msg = match event {
            Event::Msg(msg) => msg,
            Event::Quit => break,
        };
        let tick = msg == Msg::Tick;
        dispatch(&mut state, msg, &runner);
        pending_render |= state.consume_dirty();
        if tick && pending_render {
            pending_render = false;
            print_page(&render::render(&state.view()));
        }
    }

    dash_info!("dashboard page closed");
    Ok(())
}

fn dispatch(state: &mut PageState, msg: Msg, runner: &EffectRunner) {
    let (next, effects) = update(std::mem::take(state), msg);
    *state = next;
    runner.enqueue(effects);
}

fn print_page(page: &str) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{page}");
    let _ = stdout.flush();
}

fn forward_messages(msg_rx: mpsc::Receiver<Msg>, event_tx: mpsc::Sender<Event>) {
    thread::spawn(move || {
        for msg in msg_rx {
            if event_tx.send(Event::Msg(msg)).is_err() {
                break;
            }
        }
    });
}

fn spawn_input_reader(event_tx: mpsc::Sender<Event>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    dash_warn!("stdin read failed: {}", err);
                    break;
                }
            };
            let event = match parse_input(&line) {
                Input::Page(msg) => Event::Msg(msg),
                Input::Quit => Event::Quit,
                Input::Help => {
                    println!("{HELP}");
                    continue;
                }
                Input::Unknown(name) => {
                    println!("unknown command :{name} (try :help)");
                    continue;
                }
            };
            if event_tx.send(event).is_err() {
                return;
            }
        }
        // End of input closes the page.
        let _ = event_tx.send(Event::Quit);
    });
}

fn spawn_ticker(event_tx: mpsc::Sender<Event>) {
    thread::spawn(move || {
        while event_tx.send(Event::Msg(Msg::Tick)).is_ok() {
            thread::sleep(TICK_INTERVAL);
        }
    });
}
