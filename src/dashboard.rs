//! Read-side queries over the history ledger.
//!
//! This is the data layer a dashboard sits on: filters, headline numbers,
//! per-day trends and top senders. It only reads the ledger and treats a
//! missing or empty one as "no data".

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::history::HistoryRecord;
use crate::pipeline::types::{Category, Priority};

/// Rows listed under "recent emails".
pub const RECENT_LIMIT: usize = 200;

/// Senders listed under "top senders".
pub const TOP_SENDERS: usize = 10;

static ANGLE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<.*?>").expect("valid address pattern"));

/// Row filter. Empty category/priority lists mean "all".
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub categories: Vec<Category>,
    pub priorities: Vec<Priority>,
    /// Case-insensitive substring matched against subject and summary.
    pub search: Option<String>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &HistoryRecord) -> bool {
        if self.since.is_some_and(|d| record.date < d) {
            return false;
        }
        if self.until.is_some_and(|d| record.date > d) {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&record.category) {
            return false;
        }
        if !self.priorities.is_empty() && !self.priorities.contains(&record.priority) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => {
                let q = q.to_lowercase();
                record.subject.to_lowercase().contains(&q)
                    || record.summary.to_lowercase().contains(&q)
            }
            _ => true,
        }
    }

    /// Rows that pass the filter, in ledger order.
    pub fn apply<'a>(&self, records: &'a [HistoryRecord]) -> Vec<&'a HistoryRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

/// Everything the dashboard shows for one filter.
#[derive(Debug, Clone, Default)]
pub struct DashboardSummary {
    /// Rows in the whole ledger, before filtering.
    pub ledger_rows: usize,
    /// Rows after filtering.
    pub filtered: usize,
    /// Distinct dates among filtered rows.
    pub days_covered: usize,
    pub top_category: Option<Category>,
    pub high_priority: usize,
    /// Emails per day, oldest first.
    pub per_day: Vec<(NaiveDate, usize)>,
    /// Category counts per day, oldest first; categories in label order.
    pub categories_per_day: Vec<(NaiveDate, Vec<(Category, usize)>)>,
    /// Most frequent senders, display names only.
    pub top_senders: Vec<(String, usize)>,
    /// Newest rows first.
    pub recent: Vec<HistoryRecord>,
}

impl DashboardSummary {
    pub fn is_empty(&self) -> bool {
        self.filtered == 0
    }
}

/// Compute the dashboard for `records` under `filter`.
pub fn summarize(records: &[HistoryRecord], filter: &HistoryFilter) -> DashboardSummary {
    let rows = filter.apply(records);

    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    let mut cat_day: BTreeMap<NaiveDate, BTreeMap<Category, usize>> = BTreeMap::new();
    let mut cat_totals: Vec<(Category, usize)> = Vec::new();
    let mut senders: HashMap<String, (usize, usize)> = HashMap::new();

    for (idx, row) in rows.iter().enumerate() {
        *per_day.entry(row.date).or_default() += 1;
        *cat_day
            .entry(row.date)
            .or_default()
            .entry(row.category)
            .or_default() += 1;

        match cat_totals.iter_mut().find(|(c, _)| *c == row.category) {
            Some((_, n)) => *n += 1,
            None => cat_totals.push((row.category, 1)),
        }

        let entry = senders.entry(sender_name(&row.from)).or_insert((0, idx));
        entry.0 += 1;
    }

    // Highest count wins; ties go to the category seen first.
    let top_category = cat_totals
        .iter()
        .fold(None::<(Category, usize)>, |best, &(c, n)| match best {
            Some((_, top)) if top >= n => best,
            _ => Some((c, n)),
        })
        .map(|(c, _)| c);

    let mut top_senders: Vec<(String, usize, usize)> = senders
        .into_iter()
        .map(|(name, (count, first))| (name, count, first))
        .collect();
    top_senders.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    let top_senders = top_senders
        .into_iter()
        .take(TOP_SENDERS)
        .map(|(name, count, _)| (name, count))
        .collect();

    let mut recent: Vec<HistoryRecord> = rows.iter().map(|r| (*r).clone()).collect();
    // Stable: rows from the same day keep ledger order.
    recent.sort_by(|a, b| b.date.cmp(&a.date));
    recent.truncate(RECENT_LIMIT);

    DashboardSummary {
        ledger_rows: records.len(),
        filtered: rows.len(),
        days_covered: per_day.len(),
        top_category,
        high_priority: rows.iter().filter(|r| r.priority == Priority::High).count(),
        per_day: per_day.into_iter().collect(),
        categories_per_day: cat_day
            .into_iter()
            .map(|(d, cats)| (d, cats.into_iter().collect()))
            .collect(),
        top_senders,
        recent,
    }
}

/// Sender display name with any `<address>` part removed.
pub fn sender_name(from: &str) -> String {
    let name = ANGLE_ADDRESS.replace_all(from, "");
    let name = name.trim().trim_matches('"').trim();
    if name.is_empty() {
        from.trim().to_string()
    } else {
        name.to_string()
    }
}

/// Plain-text report of a dashboard summary.
pub fn render_report(summary: &DashboardSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📬 Smart Inbox Dashboard");

    if summary.ledger_rows == 0 {
        out.push_str("No history yet. Run `smart-inbox` at least once to generate it.");
        return out;
    }
    if summary.is_empty() {
        out.push_str("No emails match the current filters.");
        return out;
    }

    let _ = writeln!(out, "Emails (filtered): {}", summary.filtered);
    let _ = writeln!(out, "Days covered:      {}", summary.days_covered);
    let _ = writeln!(
        out,
        "Top category:      {}",
        summary
            .top_category
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into())
    );
    let _ = writeln!(out, "High priority:     {}", summary.high_priority);

    out.push_str("\nEmails per day\n");
    for (date, count) in &summary.per_day {
        let _ = writeln!(out, "  {date}  {count:>4}");
    }

    out.push_str("\nCategories over time\n");
    for (date, cats) in &summary.categories_per_day {
        let cells: Vec<String> = cats.iter().map(|(c, n)| format!("{c}: {n}")).collect();
        let _ = writeln!(out, "  {date}  {}", cells.join(", "));
    }

    out.push_str("\nTop senders\n");
    for (name, count) in &summary.top_senders {
        let _ = writeln!(out, "  {count:>4}  {name}");
    }

    out.push_str("\nRecent emails\n");
    for row in &summary.recent {
        let _ = writeln!(
            out,
            "  {} [{}] {} — {}\n      {}",
            row.date, row.priority, row.category, row.subject, row.summary
        );
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(date: &str, from: &str, subject: &str, category: Category) -> HistoryRecord {
        HistoryRecord {
            date: date.parse().unwrap(),
            from: from.into(),
            subject: subject.into(),
            category,
            priority: category.priority(),
            summary: format!("summary of {subject}"),
        }
    }

    fn ledger() -> Vec<HistoryRecord> {
        vec![
            row("2026-10-14", "Alice <alice@x.com>", "Standup", Category::Work),
            row("2026-10-14", "Bank <alerts@bank.com>", "Statement ready", Category::Finance),
            row("2026-10-15", "Alice <alice@x.com>", "Planning", Category::Work),
            row("2026-10-16", "\"Shop\" <deals@shop.com>", "Big sale", Category::Promo),
            row("2026-10-16", "Alice <alice@x.com>", "Retro", Category::Work),
            row("2026-10-17", "bob@x.com", "Invoice due", Category::Finance),
        ]
    }

    #[test]
    fn empty_filter_matches_everything() {
        let rows = ledger();
        assert_eq!(HistoryFilter::default().apply(&rows).len(), rows.len());
    }

    #[test]
    fn date_range_is_inclusive() {
        let filter = HistoryFilter {
            since: Some("2026-10-15".parse().unwrap()),
            until: Some("2026-10-16".parse().unwrap()),
            ..Default::default()
        };
        assert_eq!(filter.apply(&ledger()).len(), 3);
    }

    #[test]
    fn category_and_priority_filters() {
        let rows = ledger();
        let filter = HistoryFilter {
            categories: vec![Category::Work, Category::Promo],
            ..Default::default()
        };
        assert_eq!(filter.apply(&rows).len(), 4);

        let filter = HistoryFilter {
            priorities: vec![Priority::High],
            ..Default::default()
        };
        assert_eq!(filter.apply(&rows).len(), 2);

        let filter = HistoryFilter {
            priorities: vec![Priority::Low],
            ..Default::default()
        };
        assert!(filter.apply(&rows).is_empty());
    }

    #[test]
    fn search_is_case_insensitive_over_subject_and_summary() {
        let rows = ledger();
        let filter = HistoryFilter {
            search: Some("INVOICE".into()),
            ..Default::default()
        };
        assert_eq!(filter.apply(&rows).len(), 1);

        let filter = HistoryFilter {
            search: Some("summary of".into()),
            ..Default::default()
        };
        assert_eq!(filter.apply(&rows).len(), rows.len());

        let filter = HistoryFilter {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(filter.apply(&rows).len(), rows.len());
    }

    #[test]
    fn summary_kpis() {
        let s = summarize(&ledger(), &HistoryFilter::default());
        assert_eq!(s.ledger_rows, 6);
        assert_eq!(s.filtered, 6);
        assert_eq!(s.days_covered, 4);
        assert_eq!(s.top_category, Some(Category::Work));
        assert_eq!(s.high_priority, 2);
    }

    #[test]
    fn summary_trends() {
        let s = summarize(&ledger(), &HistoryFilter::default());
        let counts: Vec<usize> = s.per_day.iter().map(|(_, n)| *n).collect();
        assert_eq!(counts, [2, 1, 2, 1]);

        let (day, cats) = &s.categories_per_day[2];
        assert_eq!(day.to_string(), "2026-10-16");
        assert_eq!(cats, &[(Category::Work, 1), (Category::Promo, 1)]);
    }

    #[test]
    fn summary_top_senders_strip_addresses() {
        let s = summarize(&ledger(), &HistoryFilter::default());
        assert_eq!(s.top_senders[0], ("Alice".to_string(), 3));
        assert!(s.top_senders.iter().any(|(n, _)| n == "Shop"));
        assert!(s.top_senders.iter().any(|(n, _)| n == "bob@x.com"));
    }

    #[test]
    fn summary_recent_is_newest_first() {
        let s = summarize(&ledger(), &HistoryFilter::default());
        assert_eq!(s.recent[0].subject, "Invoice due");
        assert_eq!(s.recent[1].subject, "Big sale");
        assert_eq!(s.recent[2].subject, "Retro");
    }

    #[test]
    fn top_category_tie_goes_to_first_seen() {
        let rows = vec![
            row("2026-10-14", "a", "x", Category::Promo),
            row("2026-10-14", "b", "y", Category::Urgent),
        ];
        let s = summarize(&rows, &HistoryFilter::default());
        assert_eq!(s.top_category, Some(Category::Promo));
    }

    #[test]
    fn no_data_report() {
        let s = summarize(&[], &HistoryFilter::default());
        assert!(s.is_empty());
        assert!(s.top_category.is_none());
        assert!(render_report(&s).contains("No history yet"));
    }

    #[test]
    fn filtered_out_report() {
        let filter = HistoryFilter {
            search: Some("nothing like this".into()),
            ..Default::default()
        };
        let s = summarize(&ledger(), &filter);
        assert!(render_report(&s).contains("No emails match"));
    }

    #[test]
    fn report_lists_sections() {
        let report = render_report(&summarize(&ledger(), &HistoryFilter::default()));
        assert!(report.contains("Emails (filtered): 6"));
        assert!(report.contains("Top category:      Work"));
        assert!(report.contains("Emails per day"));
        assert!(report.contains("Top senders"));
        assert!(report.contains("2026-10-17 [High] Finance — Invoice due"));
    }
}
