//! Betting math: expected value and Kelly criterion stake sizing.

/// Expected value of a wager at decimal odds.
///
/// EV > 1.0 indicates a positive edge.
pub fn calculate_ev(probability: f64, price: f64) -> f64 {
    probability * price
}

/// Kelly criterion fraction for decimal odds.
///
/// Kelly fraction = (p * b - q) / b, with b the net odds (price - 1) and
/// q = 1 - p. Zero when the edge is negative or the price returns nothing.
pub fn calculate_kelly_fraction(probability: f64, price: f64) -> f64 {
    if probability <= 0.0 || price <= 1.0 {
        return 0.0;
    }
    let b = price - 1.0;
    let q = 1.0 - probability;
    ((probability * b - q) / b).max(0.0)
}

/// Recommended stake under fractional Kelly.
///
/// `kelly_multiplier` scales full Kelly down (0.25 for quarter Kelly).
pub fn kelly_stake(probability: f64, price: f64, bankroll: f64, kelly_multiplier: f64) -> f64 {
    bankroll * calculate_kelly_fraction(probability, price) * kelly_multiplier
}
