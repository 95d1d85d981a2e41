/// Format a raw token quantity into a decimal string in whole-token units.
///
/// Uses integer division so large quantities keep exact precision. Trailing
/// zeros in the fractional part are trimmed; whole amounts render without a
/// decimal point.
pub fn format_base_units(amount: u128, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }

    let scale = 10u128.pow(decimals);
    let whole = amount / scale;
    let frac = amount % scale;

    if frac == 0 {
        return whole.to_string();
    }

    let frac_str = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_amount() {
        assert_eq!(format_base_units(2_000_000_000_000_000_000, 18), "2");
    }

    #[test]
    fn test_fractional_amount() {
        assert_eq!(format_base_units(1_500_000_000_000_000_000, 18), "1.5");
        assert_eq!(format_base_units(42, 18), "0.000000000000000042");
    }

    #[test]
    fn test_zero_decimals() {
        assert_eq!(format_base_units(7, 0), "7");
    }

    #[test]
    fn test_exceeds_u64() {
        // 10^21 base units at 18 decimals is 1000 whole tokens
        assert_eq!(format_base_units(10u128.pow(21), 18), "1000");
    }
}
