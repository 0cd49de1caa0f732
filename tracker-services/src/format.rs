//! Message formatting helpers

use rust_decimal::Decimal;

/// Format a USD amount as `1,234.56` (two decimals, thousands separators)
pub(crate) fn format_usd(amount: &Decimal) -> String {
    let rounded = amount.round_dp(2);
    let text = format!("{:.2}", rounded);

    let (raw_int, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));
    let (sign, digits) = match raw_int.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw_int),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}{}.{}", sign, grouped, frac)
}
