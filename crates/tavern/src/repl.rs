//! The terminal front-end.

use std::io::{self, Write};
use std::pin::pin;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tavern_core::AgentEvent;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::session::Session;

const BAR_CHAR: &str = "▎";
const EXIT_COMMAND: &str = "/exit";

/// Runs a read-eval-print loop over `session` until the input ends, the
/// user types `/exit` or `shutdown` resolves.
///
/// The session is always ended before returning, which flushes the chat
/// store when persistence is enabled. A turn interrupted by `shutdown` is
/// dropped without being recorded.
pub async fn run_repl<R, W, S>(
    mut session: Session,
    input: R,
    mut output: W,
    shutdown: S,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
    S: Future<Output = ()>,
{
    let result = repl_loop(&mut session, input, &mut output, shutdown).await;
    session.end().await;
    result
}

async fn repl_loop<R, W, S>(
    session: &mut Session,
    input: R,
    output: &mut W,
    shutdown: S,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
    S: Future<Output = ()>,
{
    let mut lines = input.lines();
    let mut shutdown = pin!(shutdown);
    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    loop {
        write!(output, "> ")?;
        output.flush()?;

        let line = select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => {
                writeln!(output)?;
                info!("interrupted while waiting for input");
                return Ok(());
            }
        };
        let Some(line) = line else {
            writeln!(output)?;
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == EXIT_COMMAND {
            return Ok(());
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut turn = pin!(session.on_message_streaming(line, move |event| {
            event_tx.send(event).ok();
        }));
        let mut renderer = Renderer::new(output);
        let mut progress_bar: Option<ProgressBar> = None;

        let result = loop {
            if renderer.thinking {
                progress_bar
                    .get_or_insert_with(|| {
                        let progress_bar = ProgressBar::new_spinner();
                        progress_bar.set_style(progress_style.clone());
                        progress_bar.set_message("🤔 Thinking...");
                        progress_bar
                    })
                    .inc(1);
            }

            select! {
                biased;
                Some(event) = event_rx.recv() => {
                    // Finish the progress bar before printing anything else.
                    if let Some(progress_bar) = progress_bar.take() {
                        progress_bar.finish_and_clear();
                    }
                    renderer.render(event)?;
                }
                result = &mut turn => break Some(result),
                _ = &mut shutdown => break None,
                _ = sleep(Duration::from_millis(100)) => {}
            }
        };
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }

        let Some(result) = result else {
            renderer.end_line()?;
            writeln!(renderer.output, "{}", "Interrupted.".dimmed())?;
            info!("interrupted during a turn");
            return Ok(());
        };
        while let Ok(event) = event_rx.try_recv() {
            renderer.render(event)?;
        }
        renderer.end_line()?;
        if let Err(err) = result {
            writeln!(renderer.output, "{} {err}", "error:".bright_red().bold())?;
        }
        writeln!(renderer.output)?;
    }
}

struct Renderer<'a, W> {
    output: &'a mut W,
    at_line_start: bool,
    thinking: bool,
}

impl<'a, W: Write> Renderer<'a, W> {
    fn new(output: &'a mut W) -> Self {
        Self {
            output,
            at_line_start: true,
            thinking: true,
        }
    }

    fn render(&mut self, event: AgentEvent) -> io::Result<()> {
        match event {
            AgentEvent::MessageDelta(delta) => {
                self.thinking = false;
                if self.at_line_start {
                    write!(self.output, "{}🤖 ", BAR_CHAR.bright_cyan())?;
                }
                write!(self.output, "{}", delta.bright_white())?;
                self.at_line_start = delta.ends_with('\n');
                self.output.flush()?;
            }
            AgentEvent::ToolCall { name, arguments } => {
                self.thinking = false;
                self.end_line()?;
                let line = format!("{BAR_CHAR}🎲 {name} {arguments}");
                writeln!(self.output, "{}", line.dimmed())?;
            }
            AgentEvent::ToolResult {
                output, is_error, ..
            } => {
                self.thinking = true;
                let output = output.replace('\n', "\n   ");
                let line = format!("{BAR_CHAR}  → {output}");
                if is_error {
                    writeln!(self.output, "{}", line.red())?;
                } else {
                    writeln!(self.output, "{}", line.dimmed())?;
                }
            }
        }
        Ok(())
    }

    fn end_line(&mut self) -> io::Result<()> {
        if !self.at_line_start {
            writeln!(self.output)?;
            self.at_line_start = true;
        }
        Ok(())
    }
}
