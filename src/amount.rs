use ethers_core::types::U256;
use tracing::warn;

const WEI_PER_ETH: f64 = 1e18;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Converts a hex encoded wei amount (`0x` prefix optional) into ETH.
///
/// The integer part is split off with 256-bit integer division before
/// narrowing, so large balances keep their precision. Leading zeros are
/// ignored. Malformed input, or a value wider than 256 bits, is logged and
/// counts as zero.
pub fn parse_value(raw: &str) -> f64 {
    let lowered = raw.to_lowercase();
    let digits = lowered.strip_prefix("0x").unwrap_or(&lowered);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        warn!("Failed to parse value '{}' as hexadecimal", raw);
        return 0.0;
    }

    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return 0.0;
    }
    let Ok(wei) = U256::from_str_radix(significant, 16) else {
        warn!("Value '{}' does not fit in 256 bits", raw);
        return 0.0;
    };

    let (eth, remainder) = wei.div_mod(U256::exp10(18));
    u256_to_f64(eth) + remainder.as_u64() as f64 / WEI_PER_ETH
}

fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * TWO_POW_64 + *limb as f64)
}
