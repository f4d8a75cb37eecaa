//! Headless front end: recognition results on stdout, single-key commands.

use crate::session::{Session, SessionEvent};
use anyhow::{bail, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use facewatch_core::Detections;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

const KEY_POLL: Duration = Duration::from_millis(30);

/// Restores cooked mode however the loop exits.
struct RawMode;

impl RawMode {
    fn enable() -> Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Raw mode does not translate `\n`, so lines end in `\r\n`.
fn say(line: impl AsRef<str>) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "{}\r\n", line.as_ref());
    let _ = out.flush();
}

pub fn run(session: &mut Session, video: &str) -> Result<()> {
    if session.gallery().is_empty() {
        bail!(
            "no known faces; add one first with `facewatch add <name> --image <photo>` \
             or put photos in {}",
            session.config().known_faces_dir().display()
        );
    }
    session.start_camera(video)?;
    println!(
        "Watching {} with {} known face(s). Keys: q quit, s screenshot, c capture face",
        session.source().unwrap_or(video),
        session.gallery().len()
    );

    let raw = RawMode::enable()?;
    let result = event_loop(session);
    drop(raw);
    session.shutdown();
    result
}

fn event_loop(session: &mut Session) -> Result<()> {
    let mut shown: Option<Arc<Detections>> = None;

    loop {
        for event in session.poll() {
            match event {
                SessionEvent::Logged(record) => say(format!(
                    "[{}] {} ({:.1}%)",
                    record.timestamp.format("%H:%M:%S"),
                    record.name,
                    record.confidence
                )),
                SessionEvent::UnknownSaved(path) => say(format!("unknown face saved to {}", path.display())),
                SessionEvent::CaptureEnded(reason) => {
                    say(format!("capture ended: {reason}"));
                    return Ok(());
                }
            }
        }

        if let Some(snapshot) = session.latest() {
            let changed = shown
                .as_ref()
                .map_or(true, |prev| prev.names() != snapshot.detections.names());
            if changed {
                let names = snapshot.detections.names();
                if !names.is_empty() {
                    say(format!("in view: {}", names.join(", ")));
                }
                shown = Some(Arc::clone(&snapshot.detections));
            }
        }

        if !event::poll(KEY_POLL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Char('s') => match session.save_screenshot() {
                Ok(path) => say(format!("screenshot saved to {}", path.display())),
                Err(e) => say(format!("screenshot failed: {e}")),
            },
            KeyCode::Char('c') => capture_face(session)?,
            _ => {}
        }
    }
}

fn capture_face(session: &mut Session) -> Result<()> {
    disable_raw_mode()?;
    print!("Name for the face in view: ");
    std::io::stdout().flush()?;
    let mut name = String::new();
    std::io::stdin().lock().read_line(&mut name)?;
    enable_raw_mode()?;

    let name = name.trim();
    if name.is_empty() {
        say("cancelled");
        return Ok(());
    }
    match session.add_face_from_frame(name) {
        Ok(path) => say(format!("added {name} ({})", path.display())),
        Err(e) => say(format!("could not add {name}: {e}")),
    }
    Ok(())
}
