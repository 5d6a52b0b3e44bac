//! Parsing of user-entered token amounts.
//!
//! Amounts arrive as decimal text and must be validated before any
//! instruction is built. A valid amount is a positive decimal number with at
//! most `decimals` fractional digits whose scaled value fits in a `u64`.

use crate::error::TokenError;

/// Parse `text` as a whole-unit amount and scale it to raw base units.
///
/// `"2"` with 9 decimals yields `2_000_000_000`. Empty, non-numeric,
/// negative, zero and overflowing inputs are rejected, as are inputs with
/// more fractional digits than the token supports.
pub fn parse_ui_amount(text: &str, decimals: u8) -> Result<u64, TokenError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(invalid(text, "amount is empty"));
    }
    if trimmed.starts_with('-') {
        return Err(invalid(text, "amount must not be negative"));
    }

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid(text, "amount is not a number"));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid(text, "amount is not a number"));
    }
    if fraction.len() > usize::from(decimals) {
        return Err(invalid(
            text,
            &format!("at most {decimals} decimal places are supported"),
        ));
    }

    let whole_units: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| invalid(text, "amount is too large"))?
    };

    let mut padded = fraction.to_string();
    padded.extend(std::iter::repeat('0').take(usize::from(decimals) - fraction.len()));
    let fractional_units: u64 = if padded.is_empty() {
        0
    } else {
        padded
            .parse()
            .map_err(|_| invalid(text, "amount is not a number"))?
    };

    let raw = ui_to_raw(whole_units, decimals)
        .and_then(|scaled| scaled.checked_add(fractional_units))
        .ok_or_else(|| invalid(text, "amount is too large"))?;

    if raw == 0 {
        return Err(invalid(text, "amount must be greater than zero"));
    }
    Ok(raw)
}

/// Scale whole units to raw base units, `None` on overflow.
pub fn ui_to_raw(units: u64, decimals: u8) -> Option<u64> {
    10u64
        .checked_pow(u32::from(decimals))
        .and_then(|factor| units.checked_mul(factor))
}

fn invalid(text: &str, reason: &str) -> TokenError {
    TokenError::InvalidInput(format!("{reason}: `{text}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_amount_is_scaled() {
        assert_eq!(parse_ui_amount("2", 9).unwrap(), 2_000_000_000);
        assert_eq!(parse_ui_amount(" 1 ", 9).unwrap(), 1_000_000_000);
    }

    #[test]
    fn fractional_amount_is_scaled() {
        assert_eq!(parse_ui_amount("1.5", 9).unwrap(), 1_500_000_000);
        assert_eq!(parse_ui_amount("0.000000001", 9).unwrap(), 1);
        assert_eq!(parse_ui_amount(".25", 9).unwrap(), 250_000_000);
        assert_eq!(parse_ui_amount("3.", 9).unwrap(), 3_000_000_000);
    }

    #[test]
    fn non_numeric_is_rejected() {
        for text in ["abc", "1e9", "1,5", "1.2.3", ".", "+1", "0x10"] {
            let err = parse_ui_amount(text, 9).unwrap_err();
            assert_eq!(err.kind(), "invalid_input", "{text}");
        }
    }

    #[test]
    fn empty_negative_and_zero_are_rejected() {
        assert!(parse_ui_amount("", 9).unwrap_err().to_string().contains("empty"));
        assert!(parse_ui_amount("-1", 9)
            .unwrap_err()
            .to_string()
            .contains("negative"));
        assert!(parse_ui_amount("0", 9)
            .unwrap_err()
            .to_string()
            .contains("greater than zero"));
        assert!(parse_ui_amount("0.000", 9).is_err());
    }

    #[test]
    fn too_many_decimals_is_rejected() {
        let err = parse_ui_amount("0.0000000001", 9).unwrap_err();
        assert!(err.to_string().contains("at most 9 decimal places"));
        assert!(parse_ui_amount("1.5", 0).is_err());
        assert_eq!(parse_ui_amount("7", 0).unwrap(), 7);
    }

    #[test]
    fn overflow_is_rejected() {
        // u64::MAX / 10^9 is about 1.8e10.
        assert!(parse_ui_amount("18446744074", 9).is_err());
        assert!(parse_ui_amount("99999999999999999999999", 9).is_err());
        assert_eq!(parse_ui_amount("18446744073", 9).unwrap(), 18_446_744_073_000_000_000);
    }

    #[test]
    fn ui_to_raw_scales_and_detects_overflow() {
        assert_eq!(ui_to_raw(1, 9), Some(1_000_000_000));
        assert_eq!(ui_to_raw(u64::MAX, 1), None);
        assert_eq!(ui_to_raw(5, 0), Some(5));
    }
}
