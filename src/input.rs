/// input.rs – Dedicated terminal input thread for the live dashboard.
///
/// The thread owns raw mode for as long as it runs and only ever hands decoded
/// keys to the main loop; it never touches dashboard state itself.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{debug, error, warn};

use crate::event_loop::{LoopHandle, LoopTask};
use crate::keys::Key;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Raw mode held for the guard's lifetime; restored on every exit path.
struct RawModeGuard;

impl RawModeGuard {
    fn acquire() -> Result<Self> {
        enable_raw_mode().context("enabling raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal mode: {e}");
        }
    }
}

pub struct InputThread {
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InputThread {
    /// Start reading keys. The thread exits within one poll interval after
    /// `active` is cleared.
    pub fn spawn(active: Arc<AtomicBool>, loop_handle: LoopHandle) -> Result<Self> {
        let flag = Arc::clone(&active);
        let handle = std::thread::Builder::new()
            .name("dashboard-input".into())
            .spawn(move || run(&flag, &loop_handle))
            .context("spawning input thread")?;
        Ok(Self {
            active,
            handle: Some(handle),
        })
    }

    /// Clear the active flag and wait for the thread to release the terminal.
    pub fn stop(&mut self) -> Result<()> {
        self.active.store(false, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("input thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for InputThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("{e:#}");
        }
    }
}

fn run(active: &AtomicBool, loop_handle: &LoopHandle) {
    let _raw = match RawModeGuard::acquire() {
        Ok(guard) => guard,
        Err(e) => {
            error!("Input thread not started: {e:#}");
            return;
        }
    };
    debug!("Input thread running");

    while active.load(Ordering::Acquire) {
        match poll_task() {
            Ok(Some(task)) => {
                if !loop_handle.send(task) {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Key input error: {e:#}"),
        }
    }
    debug!("Input thread stopped");
}

fn poll_task() -> Result<Option<LoopTask>> {
    if !event::poll(POLL_INTERVAL)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) => Ok(map_key(key)),
        _ => Ok(None),
    }
}

/// Translate a terminal key event. Ctrl-C requests shutdown, since raw mode
/// swallows the signal.
pub fn map_key(event: KeyEvent) -> Option<LoopTask> {
    if event.kind == KeyEventKind::Release {
        return None;
    }
    if event.modifiers.contains(KeyModifiers::CONTROL) && event.code == KeyCode::Char('c') {
        return Some(LoopTask::Shutdown("ctrl-c"));
    }
    let key = match event.code {
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Esc,
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Char(c) => Key::from_char(c)?,
        _ => return None,
    };
    Some(LoopTask::Key(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn maps_recognized_keys() {
        assert!(matches!(
            map_key(press(KeyCode::Char('j'))),
            Some(LoopTask::Key(Key::Char('j')))
        ));
        assert!(matches!(
            map_key(press(KeyCode::Enter)),
            Some(LoopTask::Key(Key::Enter))
        ));
        assert!(matches!(
            map_key(press(KeyCode::Backspace)),
            Some(LoopTask::Key(Key::Backspace))
        ));
        assert!(map_key(press(KeyCode::Char('z'))).is_none());
        assert!(map_key(press(KeyCode::Up)).is_none());
    }

    #[test]
    fn ctrl_c_requests_shutdown() {
        let ev = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(matches!(map_key(ev), Some(LoopTask::Shutdown(_))));
    }

    #[test]
    fn releases_are_ignored() {
        let mut ev = press(KeyCode::Char('q'));
        ev.kind = KeyEventKind::Release;
        assert!(map_key(ev).is_none());
    }
}
