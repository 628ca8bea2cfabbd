//! Per-model token pricing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) USD cost per token for known models.
///
/// Unknown models cost zero so that metering never fails a run.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let per_million = match model {
        m if m.starts_with("gpt-4o-mini") => (dec!(0.15), dec!(0.60)),
        m if m.starts_with("gpt-4o") => (dec!(2.50), dec!(10.00)),
        m if m.starts_with("gpt-4.1-mini") => (dec!(0.40), dec!(1.60)),
        m if m.starts_with("gpt-4.1") => (dec!(2.00), dec!(8.00)),
        m if m.starts_with("o3-mini") || m.starts_with("o4-mini") => (dec!(1.10), dec!(4.40)),
        m if m.starts_with("o3") => (dec!(2.00), dec!(8.00)),
        _ => (Decimal::ZERO, Decimal::ZERO),
    };
    let million = dec!(1000000);
    (per_million.0 / million, per_million.1 / million)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mini_is_cheaper_than_full() {
        let (mini_in, _) = model_cost("gpt-4o-mini");
        let (full_in, _) = model_cost("gpt-4o-2024-08-06");
        assert!(mini_in < full_in);
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(model_cost("local-llama"), (Decimal::ZERO, Decimal::ZERO));
    }

    #[test]
    fn per_token_scale() {
        let (input, output) = model_cost("o3-mini");
        assert_eq!(input * dec!(1000000), dec!(1.10));
        assert_eq!(output * dec!(1000000), dec!(4.40));
    }
}
