//! Matching an observed payment against merchant-stated payment options.
//!
//! An option matches when the recipient agrees, the observed amount covers
//! the required amount (overpayment is accepted), and the asset agrees under
//! the three aliasing classes: native symbol vs. the literal `"native"`,
//! case-insensitive symbol equality, and case-insensitive contract-address
//! equality. The first matching option wins, in the order supplied.

use crate::transfer::CONTRACT_INTERACTION;
use crate::types::{PaymentOption, TokenAmount, VetAddress};

/// What was actually paid (or declared), reduced to the fields matching
/// cares about.
#[derive(Debug, Clone)]
pub struct ObservedPayment {
    pub to: VetAddress,
    pub amount: TokenAmount,
    /// Token symbol, contract address string, or the opaque-interaction
    /// sentinel.
    pub token: String,
}

/// Why no payment option matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFailure {
    /// The observed payment is an opaque contract interaction; it never
    /// matches any option.
    ContractInteraction,
    /// Single option: the recipient differs.
    Recipient,
    /// Single option: the amount is below the required amount.
    Amount,
    /// Single option: the asset does not agree under any aliasing class.
    Asset,
    /// Several options and none matched.
    NoMatch,
}

/// Returns the first option the observed payment satisfies, evaluated in
/// the supplied order.
pub fn match_options<'a>(
    observed: &ObservedPayment,
    options: &'a [PaymentOption],
) -> Result<&'a PaymentOption, MatchFailure> {
    if observed.token == CONTRACT_INTERACTION {
        return Err(MatchFailure::ContractInteraction);
    }
    for option in options {
        if option_matches(observed, option) {
            return Ok(option);
        }
    }
    // With a single option the caller gets the specific mismatch; across
    // several disagreeing options only the aggregate outcome is meaningful.
    if let [only] = options {
        if observed.to != only.recipient {
            return Err(MatchFailure::Recipient);
        }
        if observed.amount < only.amount {
            return Err(MatchFailure::Amount);
        }
        return Err(MatchFailure::Asset);
    }
    Err(MatchFailure::NoMatch)
}

fn option_matches(observed: &ObservedPayment, option: &PaymentOption) -> bool {
    observed.to == option.recipient
        && observed.amount >= option.amount
        && asset_matches(&observed.token, &option.asset)
}

fn asset_matches(token: &str, asset: &str) -> bool {
    if token.eq_ignore_ascii_case(asset) {
        return true;
    }
    // The native token may be named by symbol or by the literal "native".
    let native = |s: &str| s.eq_ignore_ascii_case("VET") || s.eq_ignore_ascii_case("native");
    native(token) && native(asset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn addr(tail: u8) -> VetAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = tail;
        VetAddress(Address::from(bytes))
    }

    fn option(asset: &str, amount: u64, recipient: VetAddress) -> PaymentOption {
        PaymentOption {
            network: "eip155:100009".to_string(),
            asset: asset.to_string(),
            amount: TokenAmount::from_u64(amount),
            recipient,
        }
    }

    fn observed(token: &str, amount: u64, to: VetAddress) -> ObservedPayment {
        ObservedPayment {
            to,
            amount: TokenAmount::from_u64(amount),
            token: token.to_string(),
        }
    }

    #[test]
    fn exact_amount_matches() {
        let options = [option("VET", 100, addr(1))];
        assert!(match_options(&observed("VET", 100, addr(1)), &options).is_ok());
    }

    #[test]
    fn one_unit_below_fails_one_above_passes() {
        let options = [option("VET", 100, addr(1))];
        assert_eq!(
            match_options(&observed("VET", 99, addr(1)), &options),
            Err(MatchFailure::Amount)
        );
        // Overpayment is accepted.
        assert!(match_options(&observed("VET", 101, addr(1)), &options).is_ok());
    }

    #[test]
    fn recipient_mismatch_reported_for_single_option() {
        let options = [option("VET", 100, addr(1))];
        assert_eq!(
            match_options(&observed("VET", 100, addr(2)), &options),
            Err(MatchFailure::Recipient)
        );
    }

    #[test]
    fn asset_aliasing_classes() {
        let recipient = addr(1);
        // native vs symbol, both directions
        assert!(match_options(
            &observed("VET", 10, recipient),
            &[option("native", 10, recipient)]
        )
        .is_ok());
        assert!(match_options(
            &observed("native", 10, recipient),
            &[option("VET", 10, recipient)]
        )
        .is_ok());
        // case-insensitive symbols
        assert!(match_options(
            &observed("vtho", 10, recipient),
            &[option("VTHO", 10, recipient)]
        )
        .is_ok());
        // case-insensitive contract addresses
        assert!(match_options(
            &observed("0xABC0000000000000000000000000000000000001", 10, recipient),
            &[option("0xabc0000000000000000000000000000000000001", 10, recipient)]
        )
        .is_ok());
        // no cross-token leniency
        assert_eq!(
            match_options(
                &observed("VTHO", 10, recipient),
                &[option("B3TR", 10, recipient)]
            ),
            Err(MatchFailure::Asset)
        );
    }

    #[test]
    fn first_matching_option_wins_in_supplied_order() {
        let recipient = addr(1);
        let options = [
            option("VTHO", 10, recipient),
            option("VET", 10, recipient),
            option("VET", 5, recipient),
        ];
        let matched = match_options(&observed("VET", 10, recipient), &options).unwrap();
        assert_eq!(matched.amount, TokenAmount::from_u64(10));
    }

    #[test]
    fn contract_interaction_never_matches() {
        let recipient = addr(1);
        let options = [option(CONTRACT_INTERACTION, 0, recipient)];
        assert_eq!(
            match_options(&observed(CONTRACT_INTERACTION, 1000, recipient), &options),
            Err(MatchFailure::ContractInteraction)
        );
    }

    #[test]
    fn several_options_collapse_to_no_match() {
        let options = [option("VET", 100, addr(1)), option("VTHO", 100, addr(2))];
        assert_eq!(
            match_options(&observed("B3TR", 100, addr(3)), &options),
            Err(MatchFailure::NoMatch)
        );
    }
}
