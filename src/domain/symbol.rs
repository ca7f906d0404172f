//! Shared symbol normalization (spec §6).
//!
//! Grounded in the same normalize/denormalize pairing
//! `rustrade::domain::trading::types` uses for exchange wire formats, but
//! producing the canonical no-separator uppercase form this engine keys
//! ring buffers and alert scopes on (`BTCUSDT`, not `BTC/USDT`).

const PERPETUAL_SUFFIXES: &[&str] = &[".P", "-PERP", "PERP", "-SWAP", "_PERP"];
const SEPARATORS: &[char] = &['/', '_', '-'];

/// Canonicalize a raw symbol as seen from an adapter or a stored alert:
/// trim, uppercase, strip separators, strip perpetual suffixes, and fold
/// the `USDTM` quote alias onto `USDT`.
pub fn normalize(raw: &str) -> String {
    let mut s = raw.trim().to_uppercase();

    for suffix in PERPETUAL_SUFFIXES {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped.to_string();
            break;
        }
    }

    s.retain(|c| !SEPARATORS.contains(&c));

    if let Some(stripped) = s.strip_suffix("USDTM") {
        s = format!("{stripped}USDT");
    }

    s
}

/// `normalize(normalize(s)) == normalize(s)` (§8 invariant 8) holds because
/// `normalize` is a pure function of its own output once separators and
/// perpetual suffixes are gone — verified in tests below.
pub fn is_normalized(s: &str) -> bool {
    normalize(s) == s
}

/// `SYMBOL` and `SYMBOL.P` are accepted interchangeably on lookup (§4.E,
/// §6). Both sides are normalized first so any wire-format perpetual
/// suffix collapses to the same canonical key.
pub fn symbols_equivalent(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// True if the canonical symbol is a USDT-quoted pair — the "all" scope
/// test of §4.E.
pub fn is_usdt_pair(canonical: &str) -> bool {
    canonical.ends_with("USDT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_separators_and_uppercases() {
        assert_eq!(normalize("btc/usdt"), "BTCUSDT");
        assert_eq!(normalize("eth-usdt"), "ETHUSDT");
        assert_eq!(normalize("sol_usdt"), "SOLUSDT");
        assert_eq!(normalize("  BtcUsdt  "), "BTCUSDT");
    }

    #[test]
    fn strips_perpetual_suffixes() {
        assert_eq!(normalize("BTCUSDT.P"), "BTCUSDT");
        assert_eq!(normalize("BTCUSDT-PERP"), "BTCUSDT");
        assert_eq!(normalize("BTCUSDTPERP"), "BTCUSDT");
        assert_eq!(normalize("BTCUSDT-SWAP"), "BTCUSDT");
        assert_eq!(normalize("BTCUSDT_PERP"), "BTCUSDT");
    }

    #[test]
    fn folds_usdtm_alias() {
        assert_eq!(normalize("BTCUSDTM"), "BTCUSDT");
    }

    #[test]
    fn round_trip_is_idempotent() {
        for raw in ["btc/usdt", "ETHUSDT.P", "sol-usdt-perp", "BNBUSDTM"] {
            let once = normalize(raw);
            let twice = normalize(&once);
            assert_eq!(once, twice);
            assert!(is_normalized(&once));
        }
    }

    #[test]
    fn accepts_perpetual_alias_both_ways() {
        assert!(symbols_equivalent("BTCUSDT", "BTCUSDT.P"));
        assert!(symbols_equivalent("btc/usdt", "BTCUSDT-PERP"));
        assert!(!symbols_equivalent("BTCUSDT", "ETHUSDT"));
    }

    #[test]
    fn usdt_pair_detection_ignores_perpetual_suffix() {
        assert!(is_usdt_pair(&normalize("BTCUSDT.P")));
        assert!(!is_usdt_pair(&normalize("BTCUSD.P")));
    }
}
