//! Price string contracts shared by the feed, the alert engine and the UI.
//!
//! Wire prices arrive as `.`-grouped digit strings ("2.885.222"); user input
//! is free text such as "Rp 2.800.000". Every function here is total and
//! resolves malformed input to `None` or an empty string.

pub const CURRENCY_PREFIX: &str = "Rp";
pub const MISSING_PRICE_PLACEHOLDER: &str = "-";

const GROUP_SEPARATOR: char = '.';
const NO_BREAK_SPACE: char = '\u{00A0}';

pub fn parse_price_wire(raw: Option<&str>) -> Option<i64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    let digits: String = raw.chars().filter(|ch| *ch != GROUP_SEPARATOR).collect();
    digits.parse::<i64>().ok()
}

pub fn parse_price_input(raw: Option<&str>) -> Option<i64> {
    let digits: String = raw?.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok()
}

pub fn format_price_input(value: Option<i64>) -> String {
    match value {
        Some(value) if value < 0 => format!("-{}", group_digits(value.unsigned_abs())),
        Some(value) => group_digits(value.unsigned_abs()),
        None => String::new(),
    }
}

pub fn format_price_input_text(raw: &str) -> String {
    format_price_input(parse_price_input(Some(raw)))
}

pub fn format_price_display(value: Option<i64>) -> String {
    match value {
        Some(value) => {
            let sign = if value < 0 { "-" } else { "" };
            format!(
                "{sign}{CURRENCY_PREFIX}{NO_BREAK_SPACE}{}",
                group_digits(value.unsigned_abs())
            )
        }
        None => MISSING_PRICE_PLACEHOLDER.to_string(),
    }
}

fn group_digits(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);

    let leading = digits.len() % 3;
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (index + 3 - leading) % 3 == 0 {
            grouped.push(GROUP_SEPARATOR);
        }
        grouped.push(ch);
    }
    grouped
}
