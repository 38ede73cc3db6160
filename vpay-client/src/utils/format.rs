//! Display formatting
//!
//! Amounts stay integer minor units everywhere else; they are only turned
//! into text here.

/// Format minor units (cents) as dollars
///
/// ```
/// use vpay_lib::utils::format::format_minor_units;
///
/// assert_eq!(format_minor_units(2000), "$20.00");
/// assert_eq!(format_minor_units(-505), "-$5.05");
/// ```
pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}

/// Format an amount in the given currency
///
/// USD (or an unspecified currency) uses the `$` form; anything else is
/// written as `12.34 EUR`.
pub fn format_amount(amount: i64, currency: Option<&str>) -> String {
    match currency.map(str::trim) {
        None | Some("") => format_minor_units(amount),
        Some(code) if code.eq_ignore_ascii_case("usd") => format_minor_units(amount),
        Some(code) => {
            let sign = if amount < 0 { "-" } else { "" };
            let abs = amount.unsigned_abs();
            format!("{}{}.{:02} {}", sign, abs / 100, abs % 100, code.to_ascii_uppercase())
        }
    }
}

/// Format a 0.0..=1.0 ratio as a percentage with one decimal
///
/// ```
/// use vpay_lib::utils::format::format_percentage;
///
/// assert_eq!(format_percentage(0.93), "93.0%");
/// ```
pub fn format_percentage(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}
