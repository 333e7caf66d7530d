use crate::api::Confirm;
use crate::Result;
use anyhow::Context;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Stdin};
use tracing::debug;

/// Asks on the terminal and reads the answer from stdin. Only `y` and `yes` count as agreement.
/// One buffered reader is kept for every prompt, so answers typed ahead or piped in are not lost.
pub(crate) struct StdinConfirm<R = Stdin> {
    input: BufReader<R>,
}

impl StdinConfirm {
    pub(crate) fn new() -> Self {
        Self::from_reader(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin + Send> StdinConfirm<R> {
    pub(crate) fn from_reader(reader: R) -> Self {
        Self {
            input: BufReader::new(reader),
        }
    }
}

#[async_trait::async_trait]
impl<R: AsyncRead + Unpin + Send> Confirm for StdinConfirm<R> {
    async fn confirm(&mut self, prompt: &str) -> Result<bool> {
        {
            let mut stdout = std::io::stdout().lock();
            write!(stdout, "{prompt} ").context("Unable to write to stdout")?;
            stdout.flush().context("Unable to flush stdout")?;
        }
        let mut line = String::new();
        self.input
            .read_line(&mut line)
            .await
            .context("Unable to read the answer from stdin")?;
        Ok(is_yes(&line))
    }
}

/// Gives the same answer every time without asking. Backs `--yes`.
pub(crate) struct FixedConfirm {
    answer: bool,
}

impl FixedConfirm {
    pub(crate) fn new(answer: bool) -> Self {
        Self { answer }
    }
}

#[async_trait::async_trait]
impl Confirm for FixedConfirm {
    async fn confirm(&mut self, prompt: &str) -> Result<bool> {
        debug!("{prompt} -> {}", if self.answer { "yes" } else { "no" });
        Ok(self.answer)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("yes\n"));
        assert!(is_yes(" Y "));
        assert!(!is_yes(""));
        assert!(!is_yes("yeah"));
        assert!(!is_yes("no"));
    }

    #[tokio::test]
    async fn test_fixed_confirm() {
        assert!(FixedConfirm::new(true).confirm("go?").await.unwrap());
        assert!(!FixedConfirm::new(false).confirm("go?").await.unwrap());
    }

    #[tokio::test]
    async fn test_answers_are_read_one_per_prompt() {
        let mut confirm = StdinConfirm::from_reader(&b"yes\nno\ny\n"[..]);
        assert!(confirm.confirm("keep a.pdf?").await.unwrap());
        assert!(!confirm.confirm("keep b.pdf?").await.unwrap());
        assert!(confirm.confirm("proceed?").await.unwrap());
        assert!(!confirm.confirm("again?").await.unwrap());
    }
}
