// src/application/operator.rs
//
// Terminal chamber operator
//
// Reads verdicts from stdin, one line each:
//   v [tag]   verify (optionally tagged)
//   r         reject
//   i         ice
//   e <text>  append text and render again
//   q         stop

use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::domain::Request;
use crate::error::AppResult;
use crate::services::{HandledRequest, Operator, Verdict};

pub struct TerminalOperator {
    id: String,
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl TerminalOperator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lines: Mutex::new(BufReader::new(io::stdin()).lines()),
        }
    }

    async fn prompt(&self, text: &str) -> AppResult<Option<String>> {
        let mut stdout = io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        Ok(self.lines.lock().await.next_line().await?)
    }

    async fn print(&self, text: &str) -> AppResult<()> {
        let mut stdout = io::stdout();
        stdout.write_all(format!("{}\n", text).as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

/// Parse one verdict line; `None` for anything unrecognized
pub fn parse_verdict(line: &str) -> Option<Verdict> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head.to_lowercase().as_str() {
        "v" | "verify" => Some(Verdict::Verify {
            tag: (!rest.is_empty()).then(|| rest.to_string()),
        }),
        "r" | "reject" => Some(Verdict::Reject),
        "i" | "ice" => Some(Verdict::Ice),
        "e" | "edit" if !rest.is_empty() => Some(Verdict::Edit(rest.to_string())),
        "q" | "quit" => Some(Verdict::Timeout),
        _ => None,
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn show(&self, request: &Request, handled: &HandledRequest) -> AppResult<()> {
        let mut text = format!("\n[{}] {}\n{}\n", request.id, request.effective_comment(), handled.caption);
        for image in &handled.images {
            text.push_str(&format!("  -> {}\n", image.display()));
        }
        if let Some(info) = &handled.info_comment {
            text.push_str(info);
            text.push('\n');
        }
        self.print(&text).await
    }

    async fn verdict(&self) -> AppResult<Verdict> {
        loop {
            let line = match self.prompt("verdict [v [tag] | r | i | e <text> | q]: ").await? {
                Some(line) => line,
                None => return Ok(Verdict::Timeout),
            };
            match parse_verdict(&line) {
                Some(verdict) => return Ok(verdict),
                None => self.print("Unknown verdict").await?,
            }
        }
    }

    async fn show_error(&self, request: &Request, message: &str) -> AppResult<()> {
        self.print(&format!("[{}] {}", request.id, message)).await
    }

    async fn ask_continue(&self) -> AppResult<bool> {
        let answer = self.prompt("continue? [Y/n]: ").await?;
        Ok(matches!(
            answer.as_deref().map(str::trim),
            Some("") | Some("y") | Some("Y") | Some("yes")
        ))
    }
}
