use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, BufRead, Write};
use tally_storage::Credentials;

#[derive(Debug, PartialEq, Eq)]
enum Entry {
    Typing,
    Done,
    Cancelled,
}

fn apply_key(password: &mut String, key: KeyEvent) -> Entry {
    if key.kind != KeyEventKind::Press {
        return Entry::Typing;
    }
    match key.code {
        KeyCode::Enter => Entry::Done,
        KeyCode::Esc => Entry::Cancelled,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Entry::Cancelled,
        KeyCode::Backspace => {
            password.pop();
            Entry::Typing
        }
        KeyCode::Char(c) => {
            password.push(c);
            Entry::Typing
        }
        _ => Entry::Typing,
    }
}

fn read_hidden() -> io::Result<String> {
    enable_raw_mode()?;
    let result = read_keys();
    disable_raw_mode()?;
    result
}

fn read_keys() -> io::Result<String> {
    let mut password = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        match apply_key(&mut password, key) {
            Entry::Typing => {}
            Entry::Done => return Ok(password),
            Entry::Cancelled => {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "password entry cancelled",
                ))
            }
        }
    }
}

/// Ask on the terminal for the login used to open server books for writing.
/// The password is not echoed.
pub fn ask_credentials() -> io::Result<Credentials> {
    let mut stderr = io::stderr();
    write!(stderr, "Username: ")?;
    stderr.flush()?;
    let mut username = String::new();
    io::stdin().lock().read_line(&mut username)?;

    write!(stderr, "Password: ")?;
    stderr.flush()?;
    let password = read_hidden()?;
    writeln!(stderr)?;

    Ok(Credentials::new(username.trim_end_matches(['\r', '\n']), password))
}
