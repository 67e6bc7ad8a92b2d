//! "Thinking..." spinner shown until the first fragment arrives.
//!
//! The spinner is a tokio task that shares a `watch` signal with the
//! stream consumer. It redraws one line every 80ms and clears that line
//! before it exits.

use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};
use std::io::Write;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const FRAME_INTERVAL: Duration = Duration::from_millis(80);
const MESSAGE: &str = "Thinking...";

pub struct ProgressIndicator {
    first_fragment: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ProgressIndicator {
    /// Spinner on stderr, or a no-op when animation is off or stderr is not
    /// a terminal.
    pub fn for_terminal(enabled: bool, color: Color) -> Self {
        if enabled && atty::is(atty::Stream::Stderr) {
            Self::start(std::io::stderr(), color)
        } else {
            Self::disabled()
        }
    }

    /// An indicator that never draws anything.
    pub fn disabled() -> Self {
        let (first_fragment, _) = watch::channel(false);
        Self {
            first_fragment,
            task: None,
        }
    }

    /// Start drawing on `writer` in a background task.
    pub fn start<W>(mut writer: W, color: Color) -> Self
    where
        W: Write + Send + 'static,
    {
        let (first_fragment, mut received) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut frame = 0usize;
            loop {
                let done = *received.borrow();
                if done {
                    break;
                }
                let spinner = SPINNER_FRAMES[frame % SPINNER_FRAMES.len()];
                let _ = draw_frame(&mut writer, spinner, color);
                frame += 1;
                tokio::select! {
                    changed = received.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(FRAME_INTERVAL) => {}
                }
            }
            let _ = clear_line(&mut writer);
        });

        debug!("Progress indicator started");
        Self {
            first_fragment,
            task: Some(task),
        }
    }

    /// Signal that the first fragment arrived and wait until the line is
    /// cleared. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.first_fragment.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
            debug!("Progress indicator stopped");
        }
    }
}

impl Drop for ProgressIndicator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn draw_frame<W: Write>(writer: &mut W, frame: &str, color: Color) -> std::io::Result<()> {
    queue!(
        writer,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        SetForegroundColor(color),
        Print(frame),
        ResetColor,
        Print(" "),
        Print(MESSAGE)
    )?;
    writer.flush()
}

fn clear_line<W: Write>(writer: &mut W) -> std::io::Result<()> {
    queue!(writer, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    writer.flush()
}
