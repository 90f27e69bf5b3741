//! Constant-product bonding curve math
//!
//! Buy and sell quotes run in checked u128 arithmetic against the curve
//! constant `k = virtual_sol * virtual_tokens`. Display helpers at the bottom
//! use f64 and are never fed back into state.

use crate::error::CurveError;

/// Total supply minted per launch (9 decimals).
pub const REAL_SUPPLY: u128 = 1_000_000_000_000_000_000;

pub const LAMPORTS_PER_SOL: u128 = 1_000_000_000;
pub const MICRO_USD_PER_USD: u128 = 1_000_000;

/// Implied token reserve before a trade: `k / virtual_sol_reserve`.
pub fn virtual_token_reserve(virtual_sol_reserve: u64, k: u128) -> Result<u128, CurveError> {
    if virtual_sol_reserve == 0 {
        return Err(CurveError::ZeroReserve);
    }
    let tokens = k / virtual_sol_reserve as u128;
    if tokens == 0 {
        return Err(CurveError::ZeroReserve);
    }
    Ok(tokens)
}

/// Buy quote: tokens received for `sol_in` lamports.
///
/// `tokens_out = k / x - k / (x + sol_in)`. Floor division on both terms keeps
/// consecutive buys summing exactly to one combined buy.
pub fn tokens_for_sol(sol_in: u64, virtual_sol_reserve: u64, k: u128) -> Result<u128, CurveError> {
    let tokens_before = virtual_token_reserve(virtual_sol_reserve, k)?;
    let sol_after = (virtual_sol_reserve as u128)
        .checked_add(sol_in as u128)
        .ok_or(CurveError::Overflow)?;
    let tokens_after = k / sol_after;

    tokens_before
        .checked_sub(tokens_after)
        .ok_or(CurveError::Underflow)
}

/// Sell quote: lamports returned for `tokens_in`.
///
/// `sol_out = x * tokens_in / (y + tokens_in)`. Only SOL actually raised can
/// leave the curve, so a quote larger than `x - virtual_sol_init` is an
/// underflow, not a clamp.
pub fn sol_for_tokens(
    tokens_in: u128,
    virtual_sol_reserve: u64,
    virtual_sol_init: u64,
    k: u128,
) -> Result<u64, CurveError> {
    let tokens_before = virtual_token_reserve(virtual_sol_reserve, k)?;
    let real_sol = virtual_sol_reserve
        .checked_sub(virtual_sol_init)
        .ok_or(CurveError::Underflow)?;

    let numerator = (virtual_sol_reserve as u128)
        .checked_mul(tokens_in)
        .ok_or(CurveError::Overflow)?;
    let denominator = tokens_before
        .checked_add(tokens_in)
        .ok_or(CurveError::Overflow)?;
    let sol_out = numerator / denominator;

    if sol_out > real_sol as u128 {
        return Err(CurveError::Underflow);
    }
    Ok(sol_out as u64)
}

/// Launch market cap in micro-USD, same formula the launch program uses:
/// `virtual_sol * price * REAL_SUPPLY / virtual_tokens / 1e9`.
pub fn launch_market_cap_micro_usd(
    virtual_sol_reserve: u64,
    k: u128,
    sol_price_micro_usd: u64,
) -> Result<u128, CurveError> {
    let virtual_tokens = virtual_token_reserve(virtual_sol_reserve, k)?;
    let scaled = (virtual_sol_reserve as u128)
        .checked_mul(sol_price_micro_usd as u128)
        .and_then(|v| v.checked_mul(REAL_SUPPLY))
        .ok_or(CurveError::Overflow)?;
    Ok(scaled / virtual_tokens / LAMPORTS_PER_SOL)
}

/// Lamports to micro-USD at `sol_price_micro_usd`.
pub fn lamports_to_micro_usd(lamports: u64, sol_price_micro_usd: u64) -> u128 {
    lamports as u128 * sol_price_micro_usd as u128 / LAMPORTS_PER_SOL
}

// ---- Display math ----

/// Percent of the SOL target raised, capped at 100.
pub fn progress_percent(sol_raised: u64, target_sol: u64) -> f64 {
    if target_sol == 0 {
        return 0.0;
    }
    (sol_raised as f64 / target_sol as f64 * 100.0).min(100.0)
}

/// Spot price in SOL per whole token (both sides carry 9 decimals).
pub fn price_per_token_sol(virtual_sol_reserve: u64, k: u128) -> Option<f64> {
    let tokens = virtual_token_reserve(virtual_sol_reserve, k).ok()?;
    Some(virtual_sol_reserve as f64 / tokens as f64)
}

pub fn micro_usd_to_usd(micro: u128) -> f64 {
    micro as f64 / MICRO_USD_PER_USD as f64
}

/// Seconds until `deadline`, never negative.
pub fn time_remaining_secs(deadline: i64, now: i64) -> i64 {
    deadline.saturating_sub(now).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tier 1 launch parameters as the launch program sets them
    const VSOL_INIT: u64 = 353_000_000;
    const K: u128 = 378_769_000_000_000_000_000_000;

    #[test]
    fn test_initial_token_reserve_matches_virtual_supply() {
        let y = virtual_token_reserve(VSOL_INIT, K).unwrap();
        assert_eq!(y, 1_073_000_000_000_000);
    }

    #[test]
    fn test_buy_is_positive_and_increasing() {
        for reserve in [VSOL_INIT, VSOL_INIT + 500_000_000, 3_000_000_000] {
            let mut last = 0u128;
            let max_in = reserve as u128 * 10;
            let step = (max_in / 50) as u64;
            let mut sol_in = 1u64;
            while (sol_in as u128) < max_in {
                let out = tokens_for_sol(sol_in, reserve, K).unwrap();
                assert!(out > 0, "no tokens for {} at reserve {}", sol_in, reserve);
                assert!(out > last, "not increasing at {}", sol_in);
                last = out;
                sol_in += step;
            }
        }
    }

    #[test]
    fn test_buys_compose() {
        let cases = [
            (VSOL_INIT, 10_000_000u64, 25_000_000u64),
            (VSOL_INIT + 123_456_789, 1, 999_999_999),
            (2_000_000_000, 700_000_000, 3),
        ];
        for (reserve, a, b) in cases {
            let first = tokens_for_sol(a, reserve, K).unwrap();
            let second = tokens_for_sol(b, reserve + a, K).unwrap();
            let combined = tokens_for_sol(a + b, reserve, K).unwrap();
            assert_eq!(first + second, combined);
        }
    }

    #[test]
    fn test_zero_reserve_is_an_error() {
        assert_eq!(tokens_for_sol(1, 0, K), Err(CurveError::ZeroReserve));
        // k smaller than the reserve leaves no tokens to sell
        assert_eq!(tokens_for_sol(1, 1_000, 999), Err(CurveError::ZeroReserve));
    }

    #[test]
    fn test_market_cap_overflow() {
        assert_eq!(
            launch_market_cap_micro_usd(u64::MAX, u128::MAX, u64::MAX),
            Err(CurveError::Overflow)
        );
    }

    #[test]
    fn test_sell_inverts_buy_within_rounding() {
        let sol_in = 250_000_000u64;
        let tokens = tokens_for_sol(sol_in, VSOL_INIT, K).unwrap();
        let back = sol_for_tokens(tokens, VSOL_INIT + sol_in, VSOL_INIT, K).unwrap();
        assert!(back <= sol_in);
        assert!(sol_in - back < 10, "lost {} lamports", sol_in - back);
    }

    #[test]
    fn test_sell_cannot_drain_virtual_liquidity() {
        // Nothing raised yet, so any sell would pay out virtual SOL
        assert_eq!(
            sol_for_tokens(10_000_000_000_000_000, VSOL_INIT, VSOL_INIT, K),
            Err(CurveError::Underflow)
        );
        assert_eq!(
            sol_for_tokens(1, VSOL_INIT - 1, VSOL_INIT, K),
            Err(CurveError::Underflow)
        );
    }

    #[test]
    fn test_launch_market_cap_at_start() {
        // $100 SOL at launch: 0.353e9 * 100e6 * 1e18 / 1.073e15 / 1e9
        let mc = launch_market_cap_micro_usd(VSOL_INIT, K, 100_000_000).unwrap();
        assert_eq!(mc, 32_898_415_657);
        assert!((micro_usd_to_usd(mc) - 32_898.415657).abs() < 1e-6);
    }

    #[test]
    fn test_display_helpers() {
        assert_eq!(progress_percent(500_000_000, 1_000_000_000), 50.0);
        assert_eq!(progress_percent(5_000_000_000, 1_000_000_000), 100.0);
        assert_eq!(progress_percent(1, 0), 0.0);
        assert_eq!(time_remaining_secs(100, 40), 60);
        assert_eq!(time_remaining_secs(100, 400), 0);
        assert!(price_per_token_sol(0, K).is_none());
        let p = price_per_token_sol(VSOL_INIT, K).unwrap();
        assert!(p > 0.0 && p < 1e-6);
        assert_eq!(lamports_to_micro_usd(12_000_000_000, 100_000_000), 1_200_000_000);
    }
}
