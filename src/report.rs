use crate::diff::{Breakdowns, GroupBreakdown, MetricResult};
use chrono::{DateTime, Utc};

const DATE_FMT: &str = "%Y-%b-%d %H:%M:%S UTC";

/// A rendered report, ready to be handed to a `Deliver` implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Document {
    pub subject: String,
    pub html: String,
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn stamp(at: &DateTime<Utc>) -> String {
    at.format(DATE_FMT).to_string()
}

fn count_item(html: &mut String, title: &str, count: usize, breakdown: Option<&GroupBreakdown>) {
    html.push_str(&format!("  <li>{title}: {count}</li>\n"));
    if let Some(breakdown) = breakdown {
        html.push_str(&format!(
            "  <ul>\n    <li>AND in Training Group: {}</li>\n    <li>AND in Non Training Group: {}</li>\n  </ul>\n",
            breakdown.training.len(),
            breakdown.non_training.len()
        ));
    }
}

fn identifier_list(html: &mut String, title: &str, identifiers: &[String]) {
    if identifiers.is_empty() {
        return;
    }
    html.push_str(&format!("<h4>{title}</h4>\n<ul>\n"));
    for identifier in identifiers {
        html.push_str(&format!("  <li>{}</li>\n", escape(identifier)));
    }
    html.push_str("</ul>\n");
}

pub(crate) fn render(metrics: &MetricResult, breakdowns: Option<&Breakdowns>) -> Document {
    let subject = format!(
        "Account report: {} to {}",
        metrics.from.taken_at.format("%Y-%m-%d"),
        metrics.to.taken_at.format("%Y-%m-%d")
    );
    let mut html = format!(
        "<p>Account Reporting: {} ({}) to {} ({}) ({} days)</p>\n<ul>\n",
        escape(&metrics.from.name),
        stamp(&metrics.from.taken_at),
        escape(&metrics.to.name),
        stamp(&metrics.to.taken_at),
        metrics.days()
    );
    count_item(
        &mut html,
        "New Accounts Requested",
        metrics.new_requests.len(),
        breakdowns.map(|b| &b.requests),
    );
    count_item(
        &mut html,
        "New Accounts Accepted",
        metrics.new_accepted.len(),
        breakdowns.map(|b| &b.accepted),
    );
    count_item(&mut html, "Unclassified Accounts", metrics.unclassified.len(), None);
    html.push_str("</ul>\n");

    identifier_list(&mut html, "New account requests", &metrics.new_requests);
    identifier_list(&mut html, "New accounts accepted", &metrics.new_accepted);
    identifier_list(
        &mut html,
        "Unclassified accounts (unrecognized status)",
        &metrics.unclassified,
    );
    Document { subject, html }
}
