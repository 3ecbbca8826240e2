// 🏦 OFX statements
// Works on both XML-style OFX 2.x and SGML tag-soup OFX 1.x: only <STMTTRN> blocks are read.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use super::{decode_text, SourceFormat, SourceParser};
use crate::error::Result;
use crate::locale::parse_amount;
use crate::transaction::{IssueLog, ParseOutput, Transaction};

pub const MISSING_DESCRIPTION: &str = "No description";

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<STMTTRN>(.*?)</STMTTRN>").unwrap())
}

/// Value of `<TAG>` up to the next tag or line break.
fn tag_value<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let start = block.to_ascii_uppercase().find(&open)? + open.len();
    let rest = &block[start..];
    let end = rest.find(['<', '\r', '\n']).unwrap_or(rest.len());
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// `20240301`, `20240301120000[-3:BRT]` → 2024-03-01
fn parse_ofx_date(value: &str) -> Option<NaiveDate> {
    let digits = value.get(..8)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::from_ymd_opt(
        digits[..4].parse().ok()?,
        digits[4..6].parse().ok()?,
        digits[6..8].parse().ok()?,
    )
}

pub struct OfxParser;

impl OfxParser {
    pub fn new() -> Self {
        OfxParser
    }

    pub fn parse_text(&self, text: &str, strict: bool) -> Result<ParseOutput> {
        let mut issues = IssueLog::new(strict);
        let mut transactions = Vec::new();

        for (index, caps) in block_regex().captures_iter(text).enumerate() {
            let block_number = index + 1;
            let location = format!("block {}", block_number);
            let block = caps.get(1).map_or("", |m| m.as_str());

            let Some(date) = tag_value(block, "DTPOSTED").and_then(parse_ofx_date) else {
                issues.record(location, "missing or invalid DTPOSTED")?;
                continue;
            };

            let amount = match tag_value(block, "TRNAMT").map(parse_amount) {
                Some(Ok(amount)) => amount,
                Some(Err(e)) => {
                    issues.record(location, format!("invalid TRNAMT: {}", e))?;
                    continue;
                }
                None => {
                    issues.record(location, "missing TRNAMT")?;
                    continue;
                }
            };
            if amount.is_zero() {
                continue;
            }

            let description = tag_value(block, "MEMO")
                .or_else(|| tag_value(block, "NAME"))
                .unwrap_or(MISSING_DESCRIPTION);
            let document = tag_value(block, "FITID")
                .or_else(|| tag_value(block, "CHECKNUM"))
                .unwrap_or("");

            transactions.push(
                Transaction::statement(date, description, amount)
                    .with_document(document)
                    .at_line(block_number),
            );
        }

        tracing::debug!(
            transactions = transactions.len(),
            issues = issues.len(),
            "ofx parsed"
        );
        Ok(issues.finish(transactions))
    }
}

impl Default for OfxParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for OfxParser {
    fn parse(&self, raw: &[u8], strict: bool) -> Result<ParseOutput> {
        self.parse_text(&decode_text(raw), strict)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::StatementOfx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const SGML: &str = "OFXHEADER:100\nDATA:OFXSGML\n<OFX><BANKMSGSRSV1><STMTTRNRS><STMTRS><BANKTRANLIST>\n\
        <STMTTRN>\n<TRNTYPE>DEBIT\n<DTPOSTED>20240301120000[-3:BRT]\n<TRNAMT>-150.00\n<FITID>NF100\n<MEMO>PAGTO FORNECEDOR\n</STMTTRN>\n\
        <STMTTRN>\n<TRNTYPE>CREDIT\n<DTPOSTED>20240302\n<TRNAMT>200.00\n<CHECKNUM>778\n<NAME>CLIENTE XPTO\n</STMTTRN>\n\
        <STMTTRN>\n<TRNTYPE>OTHER\n<TRNAMT>10.00\n</STMTTRN>\n\
        <STMTTRN>\n<DTPOSTED>20240303\n<TRNAMT>5.00\n</STMTTRN>\n\
        </BANKTRANLIST></STMTRS></STMTTRNRS></BANKMSGSRSV1></OFX>";

    #[test]
    fn test_sgml_blocks() {
        let out = OfxParser::new().parse_text(SGML, false).unwrap();

        assert_eq!(out.transactions.len(), 3);
        let first = &out.transactions[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(first.amount, Decimal::from_str("-150.00").unwrap());
        assert_eq!(first.document_number.as_deref(), Some("NF100"));
        assert_eq!(first.description, "PAGTO FORNECEDOR");

        let second = &out.transactions[1];
        assert_eq!(second.document_number.as_deref(), Some("778"));
        assert_eq!(second.description, "CLIENTE XPTO");

        assert_eq!(out.transactions[2].description, MISSING_DESCRIPTION);
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].location, "block 3");
    }

    #[test]
    fn test_xml_style_closing_tags() {
        let xml = "<OFX><STMTTRN><DTPOSTED>20240310</DTPOSTED><TRNAMT>-42.5</TRNAMT>\
                   <FITID>abc1</FITID><MEMO>Energia</MEMO></STMTTRN></OFX>";
        let out = OfxParser::new().parse_text(xml, false).unwrap();
        assert_eq!(out.transactions.len(), 1);
        assert_eq!(out.transactions[0].amount, Decimal::from_str("-42.5").unwrap());
        assert_eq!(out.transactions[0].description, "Energia");
    }

    #[test]
    fn test_ofx_date_prefix() {
        assert_eq!(parse_ofx_date("20241231235959"), NaiveDate::from_ymd_opt(2024, 12, 31));
        assert_eq!(parse_ofx_date("2024123"), None);
        assert_eq!(parse_ofx_date("20241332"), None);
    }
}
