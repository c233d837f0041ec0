//! Output routing for the `wi` binary: JSON for scripts, plain text for
//! people, nothing but errors in quiet mode.

use serde::Serialize;
use std::fmt::Write as _;

use crate::error::Result;
use crate::format::{IssueDetail, IssueView};
use crate::query::{Page, PageResults};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Plain text
    Plain,
    /// JSON output only
    Json,
    /// Minimal output (quiet mode)
    Quiet,
}

/// Central output coordinator that respects json/quiet modes.
#[derive(Debug, Clone, Copy)]
pub struct OutputContext {
    mode: OutputMode,
}

impl OutputContext {
    #[must_use]
    pub const fn from_flags(json: bool, quiet: bool) -> Self {
        let mode = if json {
            OutputMode::Json
        } else if quiet {
            OutputMode::Quiet
        } else {
            OutputMode::Plain
        };
        Self { mode }
    }

    #[must_use]
    pub const fn mode(&self) -> OutputMode {
        self.mode
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Print `value` as pretty JSON in JSON mode, or `text()` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        match self.mode {
            OutputMode::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputMode::Plain => {
                let rendered = text();
                if !rendered.is_empty() {
                    println!("{}", rendered.trim_end());
                }
            }
            OutputMode::Quiet => {}
        }
        Ok(())
    }

    pub fn success(&self, message: &str) {
        if self.mode == OutputMode::Plain {
            println!("✓ {message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if self.mode != OutputMode::Json {
            eprintln!("Warning: {message}");
        }
    }
}

/// One issue as a single line: `#seq [priority] name (state)`.
#[must_use]
pub fn issue_line(issue: &IssueView) -> String {
    let mut line = format!("#{:<4} [{}] {}", issue.sequence_id, issue.priority, issue.name);
    if let Some(group) = issue.state_group {
        let _ = write!(line, " ({group})");
    }
    if issue.is_draft {
        line.push_str(" [draft]");
    }
    let _ = write!(line, "  {}", issue.id);
    line
}

/// Text rendering of a page, grouped or not.
#[must_use]
pub fn render_page(page: &Page<IssueView>) -> String {
    let mut out = String::new();
    match &page.results {
        PageResults::Flat(items) => {
            for issue in items {
                out.push_str(&issue_line(issue));
                out.push('\n');
            }
        }
        PageResults::Grouped(groups) => {
            for (key, group) in groups.iter() {
                let _ = writeln!(out, "{key} ({})", group.total_results);
                for issue in &group.results {
                    let _ = writeln!(out, "  {}", issue_line(issue));
                }
            }
        }
        PageResults::SubGrouped(groups) => {
            for (key, sub) in groups.iter() {
                let _ = writeln!(out, "{key} ({})", sub.total_results);
                for (sub_key, group) in sub.results.iter() {
                    let _ = writeln!(out, "  {sub_key} ({})", group.total_results);
                    for issue in &group.results {
                        let _ = writeln!(out, "    {}", issue_line(issue));
                    }
                }
            }
        }
    }
    let _ = write!(out, "{} of {} issue(s)", page.count, page.total_count);
    if page.next_page_results {
        let _ = write!(out, "; next: --cursor {}", page.next_cursor);
    }
    out
}

/// Text rendering of the detail view.
#[must_use]
pub fn render_detail(detail: &IssueDetail) -> String {
    let issue = &detail.issue;
    let mut out = issue_line(issue);
    out.push('\n');
    if let Some(description) = &issue.description_html {
        let _ = writeln!(out, "\n{description}\n");
    }
    let _ = writeln!(out, "created: {}", issue.created_at.to_rfc3339());
    let _ = writeln!(out, "updated: {}", issue.updated_at.to_rfc3339());
    if let Some(completed) = issue.completed_at {
        let _ = writeln!(out, "completed: {}", completed.to_rfc3339());
    }
    let _ = writeln!(
        out,
        "sub-issues: {}  links: {}  attachments: {}  subscribed: {}",
        issue.sub_issues_count, issue.link_count, issue.attachment_count, detail.is_subscribed
    );
    for link in &detail.links {
        let _ = writeln!(out, "link: {} {}", link.url, link.title.as_deref().unwrap_or(""));
    }
    for attachment in &detail.attachments {
        let _ = writeln!(out, "attachment: {} ({} bytes)", attachment.asset, attachment.size);
    }
    for reaction in &detail.reactions {
        let _ = writeln!(out, "reaction: {} by {}", reaction.reaction, reaction.actor_id);
    }
    out
}
