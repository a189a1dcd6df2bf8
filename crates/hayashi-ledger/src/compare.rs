//! Offer ordering.

use stellar_xdr::curr::OfferEntry;

/// Whether `lhs` is a strictly better offer than `rhs`.
///
/// A strictly lower price ratio `n/d` wins; at an exactly equal ratio the
/// lower offer id wins (older offers have priority). The ratio comparison
/// cross-multiplies in `i64`, which is exact: price components are `i32`,
/// so the products cannot overflow.
///
/// Both offers must be for the same asset pair; the comparison does not
/// look at the assets.
pub fn is_better_offer(lhs: &OfferEntry, rhs: &OfferEntry) -> bool {
    let lhs_cross = lhs.price.n as i64 * rhs.price.d as i64;
    let rhs_cross = rhs.price.n as i64 * lhs.price.d as i64;

    match lhs_cross.cmp(&rhs_cross) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => lhs.offer_id < rhs.offer_id,
    }
}
