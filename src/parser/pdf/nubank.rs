// Digital-bank (Nubank) account statements: "05 MAR 2024 Transferência enviada ... 150,00"

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use super::{PageExtraction, YearReference};
use crate::locale::parse_amount;
use crate::normalize::fold;
use crate::transaction::{ParsingIssue, Transaction};

const MONTHS: [(&str, u32); 19] = [
    ("jan", 1),
    ("fev", 2),
    ("feb", 2),
    ("mar", 3),
    ("abr", 4),
    ("apr", 4),
    ("mai", 5),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("ago", 8),
    ("aug", 8),
    ("set", 9),
    ("sep", 9),
    ("out", 10),
    ("oct", 10),
    ("nov", 11),
    ("dez", 12),
    ("dec", 12),
];

const OUTFLOW_KEYWORDS: [&str; 6] = ["enviad", "pagamento", "compra", "debito", "saque", "tarifa"];
const INFLOW_KEYWORDS: [&str; 5] = ["recebid", "estorno", "deposito", "rendimento", "resgate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Inflows,
    Outflows,
}

fn month_number(abbreviation: &str) -> Option<u32> {
    let key = fold(abbreviation);
    MONTHS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, n)| *n)
}

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(\d{1,2})\s+([a-zç]{3})\.?\s+(?:(\d{4})\s+)?(.+?)\s+((?:[-+]\s*)?(?:R\$\s*)?[\d.]*\d,\d{2})\s*$",
        )
        .unwrap()
    })
}

fn dated_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*\d{1,2}\s+([a-zç]{3})\b").unwrap())
}

fn section_change(folded: &str) -> Option<Section> {
    let trimmed = folded.trim();
    if trimmed.starts_with("total de entradas") || trimmed.starts_with("entradas") {
        Some(Section::Inflows)
    } else if trimmed.starts_with("total de saidas") || trimmed.starts_with("saidas") {
        Some(Section::Outflows)
    } else {
        None
    }
}

/// Explicit sign first, then the current section, then description keywords.
fn is_outflow(amount_text: &str, section: Option<Section>, description: &str) -> bool {
    if amount_text.trim_start().starts_with('-') {
        return true;
    }
    match section {
        Some(Section::Outflows) => true,
        Some(Section::Inflows) => false,
        None => {
            let folded = fold(description);
            !INFLOW_KEYWORDS.iter().any(|k| folded.contains(k))
                && OUTFLOW_KEYWORDS.iter().any(|k| folded.contains(k))
        }
    }
}

pub fn extract(pages: &[String], reference: YearReference) -> PageExtraction {
    let mut out = PageExtraction::default();
    let mut section = None;

    for (page_index, page) in pages.iter().enumerate() {
        for (line_index, line) in page.lines().enumerate() {
            let folded = fold(line);
            if let Some(next) = section_change(&folded) {
                section = Some(next);
                continue;
            }
            if folded.contains("saldo") {
                continue;
            }

            let location = format!("page {} line {}", page_index + 1, line_index + 1);
            let Some(caps) = line_regex().captures(line) else {
                let dated = dated_prefix_regex()
                    .captures(line)
                    .and_then(|c| month_number(&c[1]))
                    .is_some();
                if dated {
                    out.issues.push(ParsingIssue {
                        location,
                        message: "dated line without a usable amount".to_string(),
                    });
                }
                continue;
            };

            let Some(month) = month_number(&caps[2]) else {
                continue;
            };
            let printed_year: Option<i32> = caps.get(3).and_then(|y| y.as_str().parse().ok());
            let resolved = caps[1].parse().ok().and_then(|day| match printed_year {
                Some(year) => NaiveDate::from_ymd_opt(year, month, day),
                None => reference.resolve(month, day),
            });
            let date = match resolved {
                Some(date) => date,
                None => {
                    out.issues.push(ParsingIssue {
                        location,
                        message: format!("invalid date '{} {}'", &caps[1], &caps[2]),
                    });
                    continue;
                }
            };

            let amount_text = &caps[5];
            let amount = match parse_amount(amount_text) {
                Ok(amount) if !amount.is_zero() => amount.abs(),
                Ok(_) => continue,
                Err(e) => {
                    out.issues.push(ParsingIssue {
                        location,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let description = caps[4].trim();
            let amount = if is_outflow(amount_text, section, description) {
                -amount
            } else {
                amount
            };
            out.transactions.push(
                Transaction::statement(date, description, amount)
                    .on_page(page_index + 1)
                    .at_line(line_index + 1),
            );
        }
    }
    out
}
