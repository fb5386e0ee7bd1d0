//! Currency arithmetic on `rust_decimal::Decimal`
//!
//! Amounts are exact decimals with two fractional digits. Nothing in the ledger touches
//! binary floating point.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits carried by every persisted amount.
pub const CURRENCY_SCALE: u32 = 2;

/// Largest magnitude a `NUMERIC(19, 2)` column holds: `99999999999999999.99`.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_313_682_943, 2_328_306_436, 0, false, CURRENCY_SCALE);

/// True when `amount` fits a `NUMERIC(19, 2)` column.
pub fn within_amount_range(amount: Decimal) -> bool {
    amount.abs() <= MAX_AMOUNT
}

/// Sum of `amounts`, or `None` when it overflows or leaves the `NUMERIC(19, 2)` range.
pub fn checked_sum<I>(amounts: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |total, amount| total.checked_add(amount))
        .filter(|total| within_amount_range(*total))
}

/// Round half-up (away from zero on a tie) to two decimal places.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// True when `amount` has no significant digits beyond the second decimal place.
pub fn has_currency_precision(amount: Decimal) -> bool {
    amount.normalize().scale() <= CURRENCY_SCALE
}

/// Portion of a VAT-inclusive `gross` that is VAT: `gross - gross / (1 + rate)`, rounded half-up.
pub fn vat_portion(gross: Decimal, rate: Decimal) -> Decimal {
    if rate.is_zero() || gross.is_zero() {
        return Decimal::ZERO;
    }
    let net = gross / (Decimal::ONE + rate);
    round_currency(gross - net)
}

/// Split a VAT-inclusive amount into `(net_ex_vat, vat)`; the two always add back to `gross`.
pub fn split_vat_inclusive(gross: Decimal, rate: Decimal) -> (Decimal, Decimal) {
    let vat = vat_portion(gross, rate);
    (gross - vat, vat)
}

/// VAT charged on an amount quoted ex VAT: `net * rate`, rounded half-up.
pub fn vat_on_net(net: Decimal, rate: Decimal) -> Decimal {
    round_currency(net * rate)
}

/// Fix the scale of an exact amount at two places for display and storage.
pub fn to_currency_scale(amount: Decimal) -> Decimal {
    let mut scaled = amount;
    scaled.rescale(CURRENCY_SCALE);
    scaled
}
