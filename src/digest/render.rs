//! Plain-text and HTML renderings of a digest.

use std::fmt::Write as _;

use crate::digest::Digest;

/// Shown instead of an item list when the batch is empty.
pub const NO_EMAILS: &str = "No emails found.";

const HTML_STYLE: &str = "\
body{font-family:Arial,Helvetica,sans-serif;margin:0;padding:24px;background:#f6f7fb;}
.card{max-width:720px;margin:0 auto;background:#ffffff;border:1px solid #e9ecf1;border-radius:12px;overflow:hidden;}
.hdr{background:#0b5fff;color:white;padding:16px 20px;font-size:18px;font-weight:700;}
.meta{padding:12px 20px;color:#344054;font-size:14px;border-bottom:1px solid #eef1f6;}
.chip{display:inline-block;background:#eef2ff;color:#334155;padding:3px 10px;border-radius:16px;margin-right:8px;margin-bottom:6px;font-size:12px;}
.item{padding:14px 20px;border-bottom:1px solid #f1f4f9;}
.prio{font-weight:700;margin-right:6px}
.cat{color:#475569;margin-right:8px}
.subj{font-weight:600;color:#111827}
.from{color:#64748b;font-size:12px;margin-top:2px}
.sum{color:#334155;margin-top:6px}
.ft{padding:14px 20px;color:#6b7280;font-size:12px;}";

/// Render the digest as plain text with at most `cap` ranked items.
///
/// The result is never empty.
pub fn render_text(digest: &Digest, cap: usize) -> String {
    let mut out = String::with_capacity(256);
    let _ = writeln!(
        out,
        "📬 Daily Email Digest ({} emails in {})",
        digest.total_count(),
        digest.window_label()
    );

    if digest.is_empty() {
        out.push_str(NO_EMAILS);
        return out;
    }

    let counts: Vec<String> = digest
        .category_counts()
        .iter()
        .map(|(category, count)| format!("{category}: {count}"))
        .collect();
    let _ = writeln!(out, "By category: {}", counts.join(", "));
    out.push('\n');

    for (i, item) in digest.ranked(cap).iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{}] {} — {}",
            i + 1,
            item.priority,
            item.category,
            display_subject(item.subject())
        );
        let _ = writeln!(out, "   {}", item.summary);
    }

    out.trim_end().to_string()
}

/// Render the digest as a self-contained HTML email body.
///
/// Every field that originates from a sender is escaped.
pub fn render_html(digest: &Digest, title: &str, cap: usize) -> String {
    let chips = if digest.category_counts().is_empty() {
        "No categories".to_string()
    } else {
        digest
            .category_counts()
            .iter()
            .map(|(category, count)| format!(r#"<span class="chip">{category}: {count}</span>"#))
            .collect::<Vec<_>>()
            .join("")
    };

    let rows = if digest.is_empty() {
        format!(r#"<div class="item">{NO_EMAILS}</div>"#)
    } else {
        let mut rows = String::new();
        for item in digest.ranked(cap) {
            let _ = write!(
                rows,
                r#"
          <div class="item">
            <div><span class="prio">[{priority}]</span>
                 <span class="cat">{category}</span>
                 <span class="subj">{subject}</span></div>
            <div class="from">{from}</div>
            <div class="sum">{summary}</div>
          </div>"#,
                priority = item.priority,
                category = item.category,
                subject = escape_html(display_subject(item.subject())),
                from = escape_html(item.from()),
                summary = escape_html(&item.summary),
            );
        }
        rows
    };

    format!(
        r#"<html>
  <head><meta charset="utf-8"><style>{style}</style></head>
  <body>
    <div class="card">
      <div class="hdr">{title}</div>
      <div class="meta">{chips}</div>
      {rows}
      <div class="ft">Generated automatically by Smart Inbox · {total} emails scanned</div>
    </div>
  </body>
</html>
"#,
        style = HTML_STYLE,
        title = escape_html(title),
        total = digest.total_count(),
    )
}

/// Escape text for an HTML element body or attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn display_subject(subject: &str) -> &str {
    let subject = subject.trim();
    if subject.is_empty() {
        "(no subject)"
    } else {
        subject
    }
}
