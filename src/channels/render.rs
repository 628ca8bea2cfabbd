//! Plain renderings of a `NotificationBatch` for the transports.

use crate::pipeline::batcher::{BatchEntry, NotificationBatch};

/// Twilio rejects WhatsApp bodies above this many characters.
pub const WHATSAPP_MAX_CHARS: usize = 1600;

const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━━";

pub fn subject(batch: &NotificationBatch) -> String {
    let n = batch.len();
    format!("{n} Job Match{} - Job Agent", if n == 1 { "" } else { "es" })
}

fn headline(entry: &BatchEntry) -> String {
    let job = &entry.job;
    let mut line = job.title.clone();
    let place = [job.company.as_str(), job.location.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" • ");
    if !place.is_empty() {
        line.push('\n');
        line.push_str(&place);
    }
    line
}

/// Full plain-text body (email text part, dry-run log).
pub fn plain_text(batch: &NotificationBatch) -> String {
    let mut out = format!(
        "Found {} matched job(s) from {} posting(s) received.\n",
        batch.total_passed, batch.total_candidates_seen
    );

    for (idx, entry) in batch.entries.iter().enumerate() {
        let result = &entry.result;
        out.push_str(&format!("\n{SEPARATOR}\n"));
        out.push_str(&format!("{}. Score: {}/100", idx + 1, result.score));
        if entry.carried_over {
            out.push_str(" (resent)");
        }
        out.push('\n');
        out.push_str(&headline(entry));
        out.push_str("\n\n");
        out.push_str(&result.reasoning);
        out.push('\n');

        if !result.strong_matches.is_empty() {
            out.push_str("\nMatches:\n");
            for m in &result.strong_matches {
                out.push_str(&format!("  + {m}\n"));
            }
        }
        if !result.gaps.is_empty() {
            out.push_str("\nGaps:\n");
            for g in &result.gaps {
                out.push_str(&format!("  - {g}\n"));
            }
        }
        if !result.cv_suggestions.is_empty() {
            out.push_str("\nCV suggestions:\n");
            for s in &result.cv_suggestions {
                out.push_str(&format!("  * {s}\n"));
            }
        }
        if let Some(url) = &entry.job.source_url {
            out.push_str(&format!("\n{url}\n"));
        }
    }

    out.push_str(&format!("\nRun {}\n", batch.run_id));
    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn html_list(title: &str, items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let lis: String = items
        .iter()
        .map(|i| format!("<li>{}</li>", escape_html(i)))
        .collect();
    format!("<p><strong>{title}</strong></p><ul>{lis}</ul>")
}

/// Basic HTML body for the email alternative part.
pub fn html(batch: &NotificationBatch) -> String {
    let mut out = String::from(
        "<html><body style=\"font-family: sans-serif; max-width: 640px; margin: auto;\">",
    );
    out.push_str(&format!(
        "<h2>{} Matched Job(s)</h2><p style=\"color:#6b7280\">{} posting(s) received</p>",
        batch.total_passed, batch.total_candidates_seen
    ));

    for entry in &batch.entries {
        let job = &entry.job;
        let result = &entry.result;
        out.push_str("<div style=\"border:1px solid #e5e7eb; border-radius:8px; padding:16px; margin:16px 0;\">");
        let title = escape_html(&job.title);
        match &job.source_url {
            Some(url) => out.push_str(&format!(
                "<h3><a href=\"{}\">{title}</a></h3>",
                escape_html(url)
            )),
            None => out.push_str(&format!("<h3>{title}</h3>")),
        }
        out.push_str(&format!(
            "<p>{} {} <strong>Score: {}/100</strong>{}</p>",
            escape_html(&job.company),
            escape_html(&job.location),
            result.score,
            if entry.carried_over { " (resent)" } else { "" }
        ));
        out.push_str(&format!("<p>{}</p>", escape_html(&result.reasoning)));
        out.push_str(&html_list("Matches", &result.strong_matches));
        out.push_str(&html_list("Gaps", &result.gaps));
        out.push_str(&html_list("CV suggestions", &result.cv_suggestions));
        out.push_str("</div>");
    }

    out.push_str("</body></html>");
    out
}

/// Compact per-job sections for WhatsApp, packed into messages that stay
/// under `WHATSAPP_MAX_CHARS`.
pub fn whatsapp_messages(batch: &NotificationBatch) -> Vec<String> {
    let n = batch.len();
    let header = format!("Found {n} Matched Job{}\n", if n == 1 { "" } else { "s" });

    let sections: Vec<String> = batch
        .entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let result = &entry.result;
            let mut lines = vec![
                SEPARATOR.to_string(),
                format!("{}. Score: {}/100", idx + 1, result.score),
                headline(entry),
                String::new(),
            ];
            if !result.strong_matches.is_empty() {
                lines.push("Matches:".into());
                lines.extend(result.strong_matches.iter().take(3).map(|m| format!("  • {m}")));
            }
            if !result.gaps.is_empty() {
                lines.push("Gaps:".into());
                lines.extend(result.gaps.iter().take(2).map(|g| format!("  • {g}")));
            }
            if result.strong_matches.is_empty() && result.gaps.is_empty() {
                lines.push(result.reasoning.clone());
            }
            if let Some(url) = &entry.job.source_url {
                lines.push(String::new());
                lines.push(url.clone());
            }
            truncate_chars(&lines.join("\n"), WHATSAPP_MAX_CHARS - header.chars().count() - 1)
        })
        .collect();

    let mut messages = Vec::new();
    let mut current = header.clone();
    for section in sections {
        let needed = current.chars().count() + section.chars().count() + 1;
        if needed > WHATSAPP_MAX_CHARS && current != header {
            messages.push(std::mem::replace(&mut current, header.clone()));
        }
        current.push_str(&section);
        current.push('\n');
    }
    if current != header {
        messages.push(current);
    }
    messages
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
