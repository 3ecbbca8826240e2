// 🧹 Text normalization shared by parsers, matcher and deduplication

use regex::Regex;
use std::sync::OnceLock;

/// Lowercase and strip Latin accents ("Tarifa Bancária" → "tarifa bancaria").
pub fn fold(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Folded, punctuation replaced by spaces, whitespace collapsed.
pub fn normalize_description(text: &str) -> String {
    let folded: String = fold(text)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Header names for column-role matching: folded, alphanumerics only, single spaces.
pub fn normalize_header(text: &str) -> String {
    normalize_description(text.trim_start_matches('\u{feff}'))
}

/// Words that describe the payment rail rather than the counterparty.
const PAYMENT_TAGS: [&str; 20] = [
    "pix", "ted", "doc", "tef", "boleto", "cartao", "debito", "credito", "pgto", "pagto", "pag",
    "pagamento", "transf", "transferencia", "enviado", "enviada", "recebido", "recebida", "compra",
    "automatico",
];

fn tax_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // CNPJ first (longer), then CPF
    RE.get_or_init(|| {
        Regex::new(r"\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}|\d{3}\.?\d{3}\.?\d{3}-?\d{2}").unwrap()
    })
}

fn document_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:nf-?e?|nota fiscal|documento|doc|fatura|n[º°o])\s*[:#.\-]?\s*\d[\w\-/]*").unwrap()
    })
}

fn long_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4,}\b").unwrap())
}

/// Normalization used for description similarity: tax ids, document references,
/// long digit runs and payment-rail tags are removed. Falls back to the plain
/// normalized description when nothing would be left.
pub fn strip_boilerplate(text: &str) -> String {
    let without_ids = tax_id_regex().replace_all(text, " ");
    let without_refs = document_ref_regex().replace_all(&without_ids, " ");
    let normalized = normalize_description(&without_refs);
    let without_numbers = long_number_regex().replace_all(&normalized, " ");

    let kept: Vec<&str> = without_numbers
        .split_whitespace()
        .filter(|word| !PAYMENT_TAGS.contains(word))
        .collect();

    if kept.is_empty() {
        normalize_description(text)
    } else {
        kept.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_strips_accents() {
        assert_eq!(fold("Tarifa Bancária - AÇÃO"), "tarifa bancaria - acao");
        assert_eq!(normalize_description("  Pgto.  Fornecedor/ÁGUA "), "pgto fornecedor agua");
    }

    #[test]
    fn test_strip_boilerplate_removes_ids_and_tags() {
        assert_eq!(
            strip_boilerplate("PIX ENVIADO 123.456.789-09 Joao da Silva"),
            "joao da silva"
        );
        assert_eq!(
            strip_boilerplate("TED 12.345.678/0001-90 ACME LTDA NF 4471"),
            "acme ltda"
        );
        assert_eq!(strip_boilerplate("Boleto 23793381286000 Energia"), "energia");
    }

    #[test]
    fn test_strip_boilerplate_falls_back_when_empty() {
        assert_eq!(strip_boilerplate("PIX"), "pix");
    }
}
