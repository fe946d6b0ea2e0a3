use crate::format::FormattedChat;
use crate::importer::{Role, short_id};
use crate::utils;
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Html,
    Json,
    Markdown,
}

impl ExportFormat {
    /// Lenient parse: anything unrecognized is HTML.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => ExportFormat::Json,
            "md" | "markdown" => ExportFormat::Markdown,
            _ => ExportFormat::Html,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Html => "text/html; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Download name used by the HTTP export endpoint.
pub fn attachment_filename(session_id: &str, format: ExportFormat) -> String {
    format!("cursor-chat-{}.{}", short_id(session_id), format.extension())
}

/// File name for an export written to disk: `<id8>_<slug>.<ext>`.
pub fn export_filename(chat: &FormattedChat, format: ExportFormat) -> String {
    let label = if chat.title.trim().is_empty() {
        &chat.project.name
    } else {
        &chat.title
    };
    let mut slug = slug::slugify(label);
    if slug.len() > 60 {
        slug.truncate(60);
        // Avoid trailing hyphens after truncation
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        slug = "chat".to_string();
    }
    format!("{}_{}.{}", short_id(&chat.session_id), slug, format.extension())
}

pub fn render(chat: &FormattedChat, format: ExportFormat) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        ExportFormat::Html => write_html(&mut buf, chat)?,
        ExportFormat::Json => write_json(&mut buf, chat)?,
        ExportFormat::Markdown => write_markdown(&mut buf, chat)?,
    }
    Ok(buf)
}

/// Write `chat` into `target_dir`, creating it if needed.
pub fn export_to_dir(chat: &FormattedChat, target_dir: &Path, format: ExportFormat) -> Result<PathBuf> {
    fs::create_dir_all(target_dir)
        .wrap_err_with(|| format!("Failed to create target directory: {}", target_dir.display()))?;
    let path = target_dir.join(export_filename(chat, format));
    let bytes = render(chat, format).wrap_err("Failed to render chat")?;
    fs::write(&path, bytes).wrap_err_with(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub fn write_json<W: Write>(writer: &mut W, chat: &FormattedChat) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, chat).map_err(io::Error::other)?;
    writeln!(writer)
}

#[derive(Serialize)]
struct Frontmatter<'a> {
    title: &'a str,
    project: &'a str,
    root_path: &'a str,
    session_id: &'a str,
    workspace_id: &'a str,
    date: DateTime<Utc>,
}

pub fn write_markdown<W: Write>(writer: &mut W, chat: &FormattedChat) -> io::Result<()> {
    let fm = Frontmatter {
        title: &chat.title,
        project: &chat.project.name,
        root_path: &chat.project.root_path,
        session_id: &chat.session_id,
        workspace_id: &chat.workspace_id,
        date: utils::epoch_secs_to_utc(chat.date),
    };

    writeln!(writer, "---")?;
    let yaml = serde_yaml::to_string(&fm).map_err(io::Error::other)?;
    write!(writer, "{}", yaml)?;
    writeln!(writer, "---")?;
    writeln!(writer)?;

    for msg in &chat.messages {
        let role_name = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        writeln!(writer, "## {}", role_name)?;
        writeln!(writer)?;
        writeln!(writer, "{}", msg.content)?;
        writeln!(writer)?;
    }

    Ok(())
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escaped message body: fenced blocks become `<pre><code>`, other newlines `<br>`.
fn render_content(content: &str) -> String {
    let mut out = String::new();
    let mut in_code = false;
    for line in escape_html(content).split('\n') {
        // The info string after an opening fence is dropped.
        if line.trim().starts_with("```") {
            out.push_str(if in_code { "</code></pre>\n" } else { "<pre><code>" });
            in_code = !in_code;
            continue;
        }
        out.push_str(line);
        out.push_str(if in_code { "\n" } else { "<br>" });
    }
    if in_code {
        out.push_str("</code></pre>");
    }
    out
}

const STYLE: &str = "body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 900px; margin: 20px auto; padding: 20px; color: #333; background-color: #f9f9f9; line-height: 1.6; }
    .header { background: linear-gradient(90deg, #f0f4ff 0%, #eef6ff 100%); color: #2c3e50; padding: 20px; border-radius: 8px; margin-bottom: 20px; }
    .chat-info { display: flex; flex-wrap: wrap; gap: 10px 20px; margin-bottom: 20px; background-color: #fff; padding: 12px 15px; border-radius: 8px; font-size: 0.9em; }
    .info-label { font-weight: bold; color: #555; margin-right: 5px; }
    .message { margin-bottom: 20px; }
    .message-header { display: flex; align-items: center; margin-bottom: 8px; }
    .avatar { width: 32px; height: 32px; border-radius: 50%; color: white; display: flex; justify-content: center; align-items: center; margin-right: 10px; }
    .sender { font-weight: bold; }
    .message-content { padding: 15px; border-radius: 8px; }
    pre { background-color: #eef; padding: 15px; border-radius: 5px; overflow-x: auto; }
    code { font-family: 'Courier New', Courier, monospace; font-size: 0.9em; }
    .footer { text-align: center; font-size: 0.8em; color: #999; margin-top: 30px; }";

pub fn write_html<W: Write>(writer: &mut W, chat: &FormattedChat) -> io::Result<()> {
    let title = escape_html(&chat.title);
    let project = escape_html(&chat.project.name);
    let root_path = escape_html(&chat.project.root_path);
    let date = escape_html(&utils::format_epoch_secs(chat.date));

    writeln!(writer, "<!DOCTYPE html>")?;
    writeln!(writer, "<html lang=\"en\">")?;
    writeln!(writer, "<head>")?;
    writeln!(writer, "  <meta charset=\"UTF-8\">")?;
    writeln!(writer, "  <title>Cursor Chat - {}</title>", title)?;
    writeln!(writer, "  <style>\n    {}\n  </style>", STYLE)?;
    writeln!(writer, "</head>")?;
    writeln!(writer, "<body>")?;
    writeln!(writer, "  <div class=\"header\"><h1>{}</h1></div>", title)?;
    writeln!(writer, "  <div class=\"chat-info\">")?;
    writeln!(writer, "    <div><span class=\"info-label\">Project:</span><span>{}</span></div>", project)?;
    writeln!(writer, "    <div><span class=\"info-label\">Path:</span><span>{}</span></div>", root_path)?;
    writeln!(writer, "    <div><span class=\"info-label\">Date:</span><span>{}</span></div>", date)?;
    writeln!(
        writer,
        "    <div><span class=\"info-label\">Session ID:</span><span>{}</span></div>",
        escape_html(&chat.session_id)
    )?;
    writeln!(writer, "  </div>")?;
    writeln!(writer, "  <h2>Conversation History</h2>")?;
    writeln!(writer, "  <div class=\"messages\">")?;

    if chat.messages.is_empty() {
        writeln!(writer, "<p>No messages found in this conversation.</p>")?;
    }
    for msg in &chat.messages {
        let (avatar, name, bg, border, margin) = match msg.role {
            Role::User => ("👤", "You", "#f0f7ff", "#3f51b5", "margin-right: 40px;"),
            Role::Assistant => ("🤖", "Cursor Assistant", "#f0fff7", "#00796b", "margin-left: 40px;"),
        };
        writeln!(writer, "    <div class=\"message\">")?;
        writeln!(writer, "      <div class=\"message-header\">")?;
        writeln!(
            writer,
            "        <div class=\"avatar\" style=\"background-color: {};\">{}</div>",
            border, avatar
        )?;
        writeln!(writer, "        <div class=\"sender\">{}</div>", name)?;
        writeln!(writer, "      </div>")?;
        writeln!(
            writer,
            "      <div class=\"message-content\" style=\"background-color: {}; border-left: 4px solid {}; {}\">{}</div>",
            bg,
            border,
            margin,
            render_content(&msg.content)
        )?;
        writeln!(writer, "    </div>")?;
    }

    writeln!(writer, "  </div>")?;
    writeln!(writer, "  <div class=\"footer\">Exported from cursor-chat-export</div>")?;
    writeln!(writer, "</body>")?;
    writeln!(writer, "</html>")?;
    Ok(())
}
