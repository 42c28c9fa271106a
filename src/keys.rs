/// keys.rs – Key decoding and the modal stop-loss input state machine.
///
/// The machine is pure: it never touches positions or the terminal. It is fed
/// decoded keys plus the currently selected position and answers with at
/// most one action and whether the view changed.
use crate::models::PositionId;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// `q j k x y`, digits, `.` and `-`.
    Char(char),
    Enter,
    Esc,
    Backspace,
}

impl Key {
    /// Decode a single raw terminal byte. Anything outside the recognized set
    /// is ignored.
    pub fn from_byte(byte: u8) -> Option<Key> {
        match byte {
            b'\r' | b'\n' => Some(Key::Enter),
            0x1b => Some(Key::Esc),
            0x7f | 0x08 => Some(Key::Backspace),
            b => Key::from_char(b as char),
        }
    }

    pub fn from_char(c: char) -> Option<Key> {
        match c {
            'q' | 'j' | 'k' | 'x' | 'y' => Some(Key::Char(c)),
            c if is_amount_char(c) => Some(Key::Char(c)),
            _ => None,
        }
    }
}

fn is_amount_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.' || c == '-'
}

// ---------------------------------------------------------------------------
// Input mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub enum InputMode {
    #[default]
    Idle,
    Armed {
        position_id: PositionId,
    },
    Typing {
        position_id: PositionId,
        buffer: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyAction {
    MoveSelection(isize),
    SetStopLoss { position_id: PositionId, value: f64 },
    ClosePosition(PositionId),
    ShowDetails(PositionId),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyOutcome {
    pub action: Option<KeyAction>,
    /// Mode, buffer or selection changed.
    pub render: bool,
}

impl KeyOutcome {
    fn none() -> Self {
        Self::default()
    }

    fn redraw() -> Self {
        Self {
            action: None,
            render: true,
        }
    }

    fn act(action: KeyAction, render: bool) -> Self {
        Self {
            action: Some(action),
            render,
        }
    }
}

#[derive(Debug, Default)]
pub struct KeyInput {
    mode: InputMode,
}

impl KeyInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &InputMode {
        &self.mode
    }

    pub fn reset(&mut self) {
        self.mode = InputMode::Idle;
    }

    /// Position an armed or typing prompt is bound to.
    pub fn target(&self) -> Option<PositionId> {
        match &self.mode {
            InputMode::Idle => None,
            InputMode::Armed { position_id } | InputMode::Typing { position_id, .. } => {
                Some(*position_id)
            }
        }
    }

    /// Keep an armed prompt pointed at the row under the cursor.
    pub fn retarget(&mut self, selected: Option<PositionId>) {
        if let (InputMode::Armed { position_id }, Some(id)) = (&mut self.mode, selected) {
            *position_id = id;
        }
    }

    /// Feed one key. `selected` is the position under the cursor, if any.
    pub fn handle(&mut self, key: Key, selected: Option<PositionId>) -> KeyOutcome {
        match &mut self.mode {
            InputMode::Armed { position_id } => match key {
                Key::Char('j') => return KeyOutcome::act(KeyAction::MoveSelection(1), true),
                Key::Char('k') => return KeyOutcome::act(KeyAction::MoveSelection(-1), true),
                Key::Esc => {
                    self.mode = InputMode::Idle;
                    return KeyOutcome::redraw();
                }
                Key::Char(c) if is_amount_char(c) => {
                    let position_id = *position_id;
                    self.mode = InputMode::Typing {
                        position_id,
                        buffer: c.to_string(),
                    };
                    return KeyOutcome::redraw();
                }
                _ => {}
            },
            InputMode::Typing {
                position_id,
                buffer,
            } => {
                return match key {
                    Key::Enter => {
                        let position_id = *position_id;
                        let parsed = buffer.trim().parse::<f64>().ok().filter(|v| v.is_finite());
                        self.mode = InputMode::Idle;
                        match parsed {
                            Some(v) => KeyOutcome::act(
                                KeyAction::SetStopLoss {
                                    position_id,
                                    value: v.abs(),
                                },
                                true,
                            ),
                            None => KeyOutcome::redraw(),
                        }
                    }
                    Key::Esc => {
                        self.mode = InputMode::Idle;
                        KeyOutcome::redraw()
                    }
                    Key::Backspace => {
                        buffer.pop();
                        KeyOutcome::redraw()
                    }
                    Key::Char(c) if is_amount_char(c) => {
                        buffer.push(c);
                        KeyOutcome::redraw()
                    }
                    _ => KeyOutcome::none(),
                };
            }
            InputMode::Idle => {
                if key == Key::Char('y') {
                    return match selected {
                        Some(position_id) => {
                            self.mode = InputMode::Armed { position_id };
                            KeyOutcome::redraw()
                        }
                        None => KeyOutcome::none(),
                    };
                }
            }
        }

        match key {
            Key::Char('q') => KeyOutcome::act(KeyAction::Exit, false),
            Key::Char('j') => KeyOutcome::act(KeyAction::MoveSelection(1), true),
            Key::Char('k') => KeyOutcome::act(KeyAction::MoveSelection(-1), true),
            Key::Char('x') => match selected {
                Some(id) => KeyOutcome::act(KeyAction::ClosePosition(id), false),
                None => KeyOutcome::none(),
            },
            Key::Enter => match selected {
                Some(id) => KeyOutcome::act(KeyAction::ShowDetails(id), true),
                None => KeyOutcome::none(),
            },
            _ => KeyOutcome::none(),
        }
    }

    /// Footer prompt for the current mode.
    pub fn prompt(&self, currency: &str) -> Option<String> {
        match &self.mode {
            InputMode::Idle => None,
            InputMode::Armed { position_id } => Some(format!(
                "SL for position {position_id} [{currency}]: type a number, Enter=save, Esc=cancel, j/k moves target"
            )),
            InputMode::Typing {
                position_id,
                buffer,
            } => Some(format!(
                "SL for position {position_id} [{currency}]: {buffer}_  (Enter=save, Esc=cancel, Backspace=delete)"
            )),
        }
    }
}
